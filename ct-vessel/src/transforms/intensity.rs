use rand::{Rng, RngCore};

use super::{Transform, TransformResult};
use crate::data::{CtWindow, Key, Sample};

/// 将强度从窗口 `[a_min, a_max]` 线性映射到 `[b_min, b_max]`, 可选截断.
#[derive(Clone, Debug)]
pub struct ScaleIntensityRange {
    keys: Vec<Key>,
    window: CtWindow,
    b_min: f32,
    b_max: f32,
    clip: bool,
}

impl ScaleIntensityRange {
    /// 将 `keys` 的强度从 `window` 映射到 `[0, 1]`, 并截断窗外的值.
    pub fn new<I: IntoIterator<Item = Key>>(keys: I, window: CtWindow) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            window,
            b_min: 0.0,
            b_max: 1.0,
            clip: true,
        }
    }

    /// 修改输出范围.
    pub fn with_output(mut self, b_min: f32, b_max: f32) -> Self {
        self.b_min = b_min;
        self.b_max = b_max;
        self
    }

    /// 设置是否截断到输出范围.
    pub fn with_clip(mut self, clip: bool) -> Self {
        self.clip = clip;
        self
    }

    /// 对单个强度值求映射结果.
    #[inline]
    pub fn eval(&self, v: f32) -> f32 {
        let out = self.window.normalize(v) * (self.b_max - self.b_min) + self.b_min;
        if self.clip {
            let (lo, hi) = if self.b_min <= self.b_max {
                (self.b_min, self.b_max)
            } else {
                (self.b_max, self.b_min)
            };
            out.clamp(lo, hi)
        } else {
            out
        }
    }
}

impl Transform for ScaleIntensityRange {
    fn name(&self) -> &'static str {
        "ScaleIntensityRange"
    }

    fn apply(&self, mut sample: Sample, _: &mut dyn RngCore) -> TransformResult<Vec<Sample>> {
        for &key in &self.keys {
            let data = sample.volume_mut(self.name(), key)?.data_mut();
            data.par_mapv_inplace(|v| self.eval(v));
        }
        Ok(vec![sample])
    }
}

/// 以概率 `prob` 给强度整体加上一个随机偏移, 偏移在 `[-offset, offset]` 内均匀抽取.
#[derive(Clone, Debug)]
pub struct RandShiftIntensity {
    keys: Vec<Key>,
    offset: f32,
    prob: f64,
}

impl RandShiftIntensity {
    /// `offset` 取绝对值.
    pub fn new<I: IntoIterator<Item = Key>>(keys: I, offset: f32, prob: f64) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            offset: offset.abs(),
            prob,
        }
    }
}

impl Transform for RandShiftIntensity {
    fn name(&self) -> &'static str {
        "RandShiftIntensity"
    }

    fn is_random(&self) -> bool {
        true
    }

    fn apply(&self, mut sample: Sample, rng: &mut dyn RngCore) -> TransformResult<Vec<Sample>> {
        if rng.gen::<f64>() >= self.prob {
            return Ok(vec![sample]);
        }
        let shift = rng.gen_range(-self.offset..=self.offset);
        for &key in &self.keys {
            let data = sample.volume_mut(self.name(), key)?.data_mut();
            data.par_mapv_inplace(|v| v + shift);
        }
        Ok(vec![sample])
    }
}
