//! 样本变换.
//!
//! 每个变换步骤都是一个实现了 [`Transform`] 的对象, 自带全部参数.
//! [`Compose`] 按序串联若干步骤. 除 [`RandCropByPosNegLabel`] 外,
//! 所有步骤都是一进一出.
//!
//! 随机步骤从调用方传入的 `RngCore` 取随机数, 并在同一步骤的所有字段间共享抽到的参数.

use std::fmt::Formatter;
use std::ops::Range;

use rand::RngCore;

use crate::data::{Key, Sample};
use crate::io::LoadError;

mod crop;
mod intensity;
mod label;
mod load;
mod patch;
mod presets;
mod resample;
mod spatial;

pub use crop::{foreground_bbox, BBox, CropForeground};
pub use intensity::{RandShiftIntensity, ScaleIntensityRange};
pub use label::MergeLabel;
pub use load::{EnsureChannelFirst, LoadImage};
pub use patch::RandCropByPosNegLabel;
pub use presets::{train_transforms_aug, val_transforms, TRAIN_TRANSFORMS_AUG, VAL_TRANSFORMS};
pub use resample::Interpolation;
pub use spatial::{Orientation, RandRotate90, RandZoom, Spacing};

/// 变换运行时错误. 对应输入数据不满足步骤约定 (字段缺失, 维数错误, 形状不一致等).
#[derive(Debug)]
pub enum TransformError {
    /// 样本中缺少字段.
    MissingKey {
        /// 出错的步骤.
        step: &'static str,
        /// 缺少的字段.
        key: Key,
    },

    /// 字段尚未加载 (仍是路径).
    NotLoaded {
        /// 出错的步骤.
        step: &'static str,
        /// 未加载的字段.
        key: Key,
    },

    /// 数据维数不符合约定 (例如缺少通道维).
    Rank {
        /// 出错的步骤.
        step: &'static str,
        /// 出错的字段.
        key: Key,
        /// 期望的维数.
        expected: usize,
        /// 实际的维数.
        found: usize,
    },

    /// 不同字段的空间形状不一致.
    ShapeMismatch {
        /// 出错的步骤.
        step: &'static str,
        /// 出错的字段.
        key: Key,
        /// 期望的形状.
        expected: Vec<usize>,
        /// 实际的形状.
        found: Vec<usize>,
    },

    /// 前景包围盒所依据的字段全为背景.
    EmptyForeground {
        /// 出错的步骤.
        step: &'static str,
        /// 全为背景的字段.
        key: Key,
    },

    /// 既没有正样本中心也没有负样本中心可供采样.
    NoCandidates {
        /// 出错的步骤.
        step: &'static str,
    },

    /// 加载字段失败.
    Load {
        /// 加载失败的字段.
        key: Key,
        /// 底层错误.
        source: LoadError,
    },
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformError::MissingKey { step, key } => write!(f, "[{step}] 样本缺少字段 `{key}`"),
            TransformError::NotLoaded { step, key } => write!(f, "[{step}] 字段 `{key}` 尚未加载"),
            TransformError::Rank {
                step,
                key,
                expected,
                found,
            } => write!(
                f,
                "[{step}] 字段 `{key}` 维数为 {found}, 期望 {expected} (C, i, j, k)"
            ),
            TransformError::ShapeMismatch {
                step,
                key,
                expected,
                found,
            } => write!(
                f,
                "[{step}] 字段 `{key}` 空间形状 {found:?} 与期望 {expected:?} 不一致"
            ),
            TransformError::EmptyForeground { step, key } => {
                write!(f, "[{step}] 字段 `{key}` 没有前景体素")
            }
            TransformError::NoCandidates { step } => write!(f, "[{step}] 没有可采样的子块中心"),
            TransformError::Load { key, source } => write!(f, "加载字段 `{key}` 失败: {source}"),
        }
    }
}

impl std::error::Error for TransformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransformError::Load { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// 变换结果.
pub type TransformResult<T> = Result<T, TransformError>;

/// 单个变换步骤.
pub trait Transform: Send + Sync {
    /// 步骤名, 用于日志和错误信息.
    fn name(&self) -> &'static str;

    /// 该步骤是否使用随机数? 缓存只会保存第一个随机步骤之前的结果.
    fn is_random(&self) -> bool {
        false
    }

    /// 对 `sample` 实施变换. 绝大多数步骤返回恰好一个样本.
    fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> TransformResult<Vec<Sample>>;
}

/// 按序串联的变换步骤.
#[derive(Default)]
pub struct Compose {
    steps: Vec<Box<dyn Transform>>,
}

/// 只打印步骤名.
impl std::fmt::Debug for Compose {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl Compose {
    /// 创建空流水线.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 在末尾追加一个步骤.
    #[inline]
    pub fn then<T: Transform + 'static>(mut self, step: T) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// 将 `other` 的所有步骤追加到末尾.
    #[inline]
    pub fn extend(mut self, other: Compose) -> Self {
        self.steps.extend(other.steps);
        self
    }

    /// 步骤个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// 是否没有任何步骤?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 按序获取所有步骤名.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.steps.iter().map(|s| s.name())
    }

    /// 是否包含随机步骤?
    #[inline]
    pub fn is_random(&self) -> bool {
        self.steps.iter().any(|s| s.is_random())
    }

    /// 第一个随机步骤的位置. 没有随机步骤时为 `self.len()`.
    ///
    /// `0..self.first_random()` 是可缓存的确定性前缀.
    pub fn first_random(&self) -> usize {
        self.steps
            .iter()
            .position(|s| s.is_random())
            .unwrap_or(self.steps.len())
    }

    /// 依次运行全部步骤.
    #[inline]
    pub fn apply(&self, sample: Sample, rng: &mut dyn RngCore) -> TransformResult<Vec<Sample>> {
        self.apply_range(0..self.steps.len(), vec![sample], rng)
    }

    /// 对 `samples` 依次运行第 `range` 个步骤. 多输出步骤的结果会被展平.
    ///
    /// `range` 越界时 panic.
    pub fn apply_range(
        &self,
        range: Range<usize>,
        samples: Vec<Sample>,
        rng: &mut dyn RngCore,
    ) -> TransformResult<Vec<Sample>> {
        let mut samples = samples;
        for step in &self.steps[range] {
            let mut next = Vec::with_capacity(samples.len());
            for s in samples {
                next.extend(step.apply(s, rng)?);
            }
            samples = next;
        }
        Ok(samples)
    }
}

/// 检查 `found` 与 `expected` 空间形状是否一致.
pub(crate) fn check_spatial(
    step: &'static str,
    key: Key,
    expected: [usize; 3],
    found: [usize; 3],
) -> TransformResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(TransformError::ShapeMismatch {
            step,
            key,
            expected: expected.to_vec(),
            found: found.to_vec(),
        })
    }
}

/// 获取 `(C, i, j, k)` 数组的空间形状.
#[inline]
pub(crate) fn spatial_of<S, A>(a: &ndarray::ArrayBase<S, ndarray::Ix4>) -> [usize; 3]
where
    S: ndarray::Data<Elem = A>,
{
    let (_, i, j, k) = a.dim();
    [i, j, k]
}


#[cfg(test)]
mod tests {
    use super::testing::{rng, sample_of};
    use super::{Compose, Transform, TransformResult};
    use crate::data::{Key, Sample};
    use ndarray::Array4;
    use rand::RngCore;

    struct Dup;

    impl Transform for Dup {
        fn name(&self) -> &'static str {
            "Dup"
        }

        fn is_random(&self) -> bool {
            true
        }

        fn apply(&self, sample: Sample, _: &mut dyn RngCore) -> TransformResult<Vec<Sample>> {
            Ok(vec![sample.clone(), sample])
        }
    }

    struct Noop;

    impl Transform for Noop {
        fn name(&self) -> &'static str {
            "Noop"
        }

        fn apply(&self, sample: Sample, _: &mut dyn RngCore) -> TransformResult<Vec<Sample>> {
            Ok(vec![sample])
        }
    }

    #[test]
    fn test_compose_flatten() {
        let c = Compose::new().then(Noop).then(Dup).then(Noop).then(Dup);
        assert_eq!(c.len(), 4);
        assert_eq!(c.first_random(), 1);
        assert!(c.is_random());
        assert_eq!(c.names().collect::<Vec<_>>(), ["Noop", "Dup", "Noop", "Dup"]);

        let s = sample_of([(Key::Image, Array4::zeros((1, 2, 2, 2)))]);
        let out = c.apply(s.clone(), &mut rng(0)).unwrap();
        assert_eq!(out.len(), 4);

        let out = c.apply_range(0..1, vec![s], &mut rng(0)).unwrap();
        assert_eq!(out.len(), 1);
        assert!(!Compose::new().then(Noop).is_random());
    }
}
