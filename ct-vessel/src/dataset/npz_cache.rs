//! 缓存的 npz 持久化.
//!
//! 每个缓存样本的每个字段存为两个数组:
//!
//! - `{index}_{n}_{key}`: `f32` 体数据, 维数任意;
//! - `{index}_{n}_{key}_affine`: `f64` 4x4 仿射矩阵.
//!
//! 其中 `index` 为病例在数据集中的位置, `n` 为该病例输出样本的序号.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array2, ArrayD, Ix2, IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter, ReadNpzError, WriteNpzError};

use super::{CacheDataset, DatasetError, FileRecord};
use crate::data::{Affine, Key, Sample, Volume};
use crate::transforms::Compose;

const AFFINE_SUFFIX: &str = "_affine";

/// npz 缓存读写错误.
#[derive(Debug)]
pub enum NpzError {
    /// 读取 npz 文件错误.
    Read(ReadNpzError),

    /// 写入 npz 文件错误.
    Write(WriteNpzError),

    /// 其他底层 I/O 错误.
    Io(std::io::Error),

    /// 文件内容不符合缓存布局.
    Layout(String),
}

impl std::fmt::Display for NpzError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NpzError::Read(e) => write!(f, "读取失败: {e}"),
            NpzError::Write(e) => write!(f, "写入失败: {e}"),
            NpzError::Io(e) => write!(f, "I/O 错误: {e}"),
            NpzError::Layout(reason) => write!(f, "非法的缓存布局: {reason}"),
        }
    }
}

impl std::error::Error for NpzError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NpzError::Read(e) => Some(e),
            NpzError::Write(e) => Some(e),
            NpzError::Io(e) => Some(e),
            NpzError::Layout(_) => None,
        }
    }
}

impl From<ReadNpzError> for NpzError {
    fn from(e: ReadNpzError) -> Self {
        NpzError::Read(e)
    }
}

impl From<WriteNpzError> for NpzError {
    fn from(e: WriteNpzError) -> Self {
        NpzError::Write(e)
    }
}

impl From<std::io::Error> for NpzError {
    fn from(e: std::io::Error) -> Self {
        NpzError::Io(e)
    }
}

/// 硬盘上的 [`CacheDataset`] 缓存文件.
#[derive(Clone, Debug)]
pub struct NpzCache {
    path: PathBuf,
}

/// 解析后的数组名.
#[derive(Debug, PartialEq)]
struct EntryName {
    index: usize,
    n: usize,
    key: Key,
    affine: bool,
}

impl EntryName {
    fn data(index: usize, n: usize, key: Key) -> String {
        format!("{index}_{n}_{key}")
    }

    fn affine(index: usize, n: usize, key: Key) -> String {
        format!("{index}_{n}_{key}{AFFINE_SUFFIX}")
    }

    /// 解析数组名. 兼容带 `.npy` 后缀的名字.
    fn parse(name: &str) -> Option<Self> {
        let name = name.strip_suffix(".npy").unwrap_or(name);
        let mut it = name.splitn(3, '_');
        let index = it.next()?.parse().ok()?;
        let n = it.next()?.parse().ok()?;
        let rest = it.next()?;
        let (key, affine) = match rest.strip_suffix(AFFINE_SUFFIX) {
            Some(k) => (k, true),
            None => (rest, false),
        };
        Some(Self {
            index,
            n,
            key: Key::from_name(key)?,
            affine,
        })
    }
}

fn affine_to_array(a: &Affine) -> Array2<f64> {
    Array2::from_shape_fn((4, 4), |(r, c)| a.rows()[r][c])
}

fn array_to_affine(a: &Array2<f64>, name: &str) -> Result<Affine, NpzError> {
    if a.dim() != (4, 4) {
        return Err(NpzError::Layout(format!(
            "`{name}` 的形状为 {:?}, 应为 (4, 4)",
            a.dim()
        )));
    }
    let mut rows = [[0.0; 4]; 4];
    for ((r, c), v) in a.indexed_iter() {
        rows[r][c] = *v;
    }
    Ok(Affine::from_rows(rows))
}

impl NpzCache {
    /// 指定缓存文件路径.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_owned(),
        }
    }

    /// 缓存文件路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 缓存文件是否存在?
    #[inline]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// 将 `dataset` 的全部缓存写入文件 (压缩), 返回写入的样本个数.
    pub fn save(&self, dataset: &CacheDataset) -> Result<usize, DatasetError> {
        Ok(self.save_inner(dataset)?)
    }

    fn save_inner(&self, dataset: &CacheDataset) -> Result<usize, NpzError> {
        let file = File::create(&self.path)?;
        let mut npz = NpzWriter::new_compressed(file);
        let mut written = 0;
        for index in 0..dataset.cached_len() {
            let samples = dataset.cached(index).unwrap_or_default();
            for (n, sample) in samples.iter().enumerate() {
                for (key, v) in sample.volumes() {
                    npz.add_array(EntryName::data(index, n, key), v.data())?;
                    npz.add_array(
                        EntryName::affine(index, n, key),
                        &affine_to_array(v.affine()),
                    )?;
                }
                written += 1;
            }
        }
        npz.finish()?;
        log::info!(
            "saved {written} cached samples to {}",
            self.path.display()
        );
        Ok(written)
    }

    /// 读取缓存文件. 返回值的第 `i` 项为第 `i` 个病例的全部缓存样本.
    ///
    /// 病例编号不在文件中; 见 [`NpzCache::restore`].
    pub fn load(&self) -> Result<Vec<Vec<Sample>>, DatasetError> {
        Ok(self.load_inner()?)
    }

    fn load_inner(&self) -> Result<Vec<Vec<Sample>>, NpzError> {
        let file = OpenOptions::new().read(true).open(&self.path)?;
        let mut npz = NpzReader::new(file)?;

        let mut data: BTreeMap<(usize, usize, Key), ArrayD<f32>> = BTreeMap::new();
        let mut affines: BTreeMap<(usize, usize, Key), Affine> = BTreeMap::new();
        for name in npz.names()? {
            let entry = EntryName::parse(&name)
                .ok_or_else(|| NpzError::Layout(format!("无法解析数组名 `{name}`")))?;
            let slot = (entry.index, entry.n, entry.key);
            if entry.affine {
                let a = npz.by_name::<OwnedRepr<f64>, Ix2>(&name)?;
                affines.insert(slot, array_to_affine(&a, &name)?);
            } else {
                data.insert(slot, npz.by_name::<OwnedRepr<f32>, IxDyn>(&name)?);
            }
        }

        let mut out: Vec<Vec<Sample>> = Vec::new();
        for ((index, n, key), array) in data {
            let affine = affines.remove(&(index, n, key)).ok_or_else(|| {
                NpzError::Layout(format!("缺少 `{}`", EntryName::affine(index, n, key)))
            })?;
            if index == out.len() {
                out.push(Vec::new());
            } else if index > out.len() {
                return Err(NpzError::Layout(format!("缺少第 {} 个病例", out.len())));
            }
            let samples = &mut out[index];
            if n == samples.len() {
                samples.push(Sample::new());
            } else if n > samples.len() {
                return Err(NpzError::Layout(format!(
                    "第 {index} 个病例缺少第 {} 个样本",
                    samples.len()
                )));
            }
            samples[n].insert_volume(key, Volume::new(array, affine));
        }
        if let Some((index, n, key)) = affines.into_keys().next() {
            return Err(NpzError::Layout(format!(
                "缺少 `{}`",
                EntryName::data(index, n, key)
            )));
        }
        log::info!(
            "loaded cache of {} patients from {}",
            out.len(),
            self.path.display()
        );
        Ok(out)
    }

    /// 读取缓存并重建数据集. 缓存样本的病例编号取自 `records`.
    ///
    /// 缓存的病例数多于 `records` 时返回 `Err`.
    pub fn restore(
        &self,
        records: Vec<FileRecord>,
        transform: Arc<Compose>,
    ) -> Result<CacheDataset, DatasetError> {
        let mut cache = self.load()?;
        if cache.len() > records.len() {
            return Err(NpzError::Layout(format!(
                "缓存了 {} 个病例, 但只有 {} 条记录",
                cache.len(),
                records.len()
            ))
            .into());
        }
        for (samples, record) in cache.iter_mut().zip(&records) {
            for s in samples.iter_mut() {
                *s = std::mem::take(s).with_patient(record.patient());
            }
        }
        Ok(CacheDataset::with_cache(records, transform, cache))
    }
}
