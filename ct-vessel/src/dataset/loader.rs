//! 批次加载器.
//!
//! 提供迭代器风格的批次获取模式: 每次调用 [`DataLoader::iter`] 即为一轮 (epoch).

use std::sync::Arc;

use ndarray::{Array5, ArrayView4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{CacheDataset, DatasetError};
use crate::data::{Affine, Key, Sample};

/// 一个批次. 图像与标签均为 `(N, C, i, j, k)` 格式.
///
/// 一个病例可产生多个样本 (如训练流水线的 8 个子块), 它们被展平到批次维 `N` 上.
#[derive(Clone, Debug)]
pub struct Batch {
    /// 图像.
    pub image: Array5<f32>,
    /// 标签.
    pub label: Array5<f32>,
    /// 每个样本的来源病例.
    pub patients: Vec<Option<u32>>,
    /// 每个样本图像的仿射变换.
    pub affines: Vec<Affine>,
}

impl Batch {
    /// 将若干样本的 `image`, `label` 字段拼接为批次.
    ///
    /// 样本为空, 字段缺失, 维数不是 4 或形状不一致时返回 `Err`.
    pub fn collate(samples: &[Sample]) -> Result<Self, DatasetError> {
        if samples.is_empty() {
            return Err(DatasetError::Collate("空批次".to_string()));
        }
        let image = stack_key(samples, Key::Image)?;
        let label = stack_key(samples, Key::Label)?;
        let mut affines = Vec::with_capacity(samples.len());
        for s in samples {
            let v = s
                .volume("collate", Key::Image)
                .map_err(|e| DatasetError::Collate(e.to_string()))?;
            affines.push(*v.affine());
        }
        Ok(Self {
            image,
            label,
            patients: samples.iter().map(Sample::patient).collect(),
            affines,
        })
    }

    /// 批次中的样本个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.image.len_of(Axis(0))
    }

    /// 是否为空批次?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn stack_key(samples: &[Sample], key: Key) -> Result<Array5<f32>, DatasetError> {
    let views = samples
        .iter()
        .map(|s| s.volume("collate", key)?.view4("collate", key))
        .collect::<Result<Vec<ArrayView4<'_, f32>>, _>>()
        .map_err(|e| DatasetError::Collate(e.to_string()))?;
    ndarray::stack(Axis(0), &views)
        .map_err(|e| DatasetError::Collate(format!("字段 `{key}` 形状不一致: {e}")))
}

/// 数据加载器.
///
/// 每批取 `batch_size` 个病例, 将它们变换后的全部样本拼接为一个 [`Batch`].
/// 多个加载器可共享同一个 [`CacheDataset`].
#[derive(Debug)]
pub struct DataLoader {
    dataset: Arc<CacheDataset>,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl DataLoader {
    /// 创建加载器. 随机数生成器由系统熵初始化.
    ///
    /// `batch_size` 为 0 时按 1 处理.
    pub fn new(dataset: Arc<CacheDataset>, batch_size: usize, shuffle: bool) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
            rng: StdRng::from_entropy(),
        }
    }

    /// 以固定种子重置随机数生成器. 打乱顺序与随机变换都由它驱动.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// 底层数据集.
    #[inline]
    pub fn dataset(&self) -> &Arc<CacheDataset> {
        &self.dataset
    }

    /// 每轮的批次数.
    #[inline]
    pub fn len(&self) -> usize {
        (self.dataset.len() + self.batch_size - 1) / self.batch_size
    }

    /// 是否没有任何批次?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// 每批的病例数.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// 是否每轮打乱?
    #[inline]
    pub fn is_shuffled(&self) -> bool {
        self.shuffle
    }

    /// 开始新的一轮.
    pub fn iter(&mut self) -> Batches<'_> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        order.reverse();
        Batches {
            loader: self,
            data_rev: order,
        }
    }
}

impl<'a> IntoIterator for &'a mut DataLoader {
    type Item = Result<Batch, DatasetError>;
    type IntoIter = Batches<'a>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// 一轮中的批次迭代器.
#[derive(Debug)]
pub struct Batches<'a> {
    loader: &'a mut DataLoader,
    data_rev: Vec<usize>,
}

impl<'a> Iterator for Batches<'a> {
    type Item = Result<Batch, DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data_rev.is_empty() {
            return None;
        }
        let rest = self.data_rev.len().saturating_sub(self.loader.batch_size);
        let indices: Vec<usize> = self.data_rev.drain(rest..).rev().collect();

        let mut samples = Vec::new();
        for idx in indices {
            match self.loader.dataset.get(idx, &mut self.loader.rng) {
                Ok(out) => samples.extend(out),
                Err(e) => return Some(Err(e)),
            }
        }
        Some(Batch::collate(&samples))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.len();
        (n, Some(n))
    }
}

impl<'a> ExactSizeIterator for Batches<'a> {
    #[inline]
    fn len(&self) -> usize {
        let b = self.loader.batch_size;
        (self.data_rev.len() + b - 1) / b
    }
}
