//! 空间变换: 方向统一, 分辨率重采样, 随机缩放与随机旋转.
//!
//! 所有变换都同步更新仿射变换. 记 "新索引 -> 旧索引" 的映射矩阵为 `M`,
//! 则新的仿射变换为 `A * M`.

use ndarray::{ArrayView4, Axis};
use rand::{Rng, RngCore};

use super::resample::{map_channels, resample, resize, Interpolation};
use super::{spatial_of, Transform, TransformResult};
use crate::data::{Affine, AxCodes, Key, Sample, Volume};

/// 为 `keys` 中的每个字段配对插值方式. `modes` 比 `keys` 短时, 剩余字段沿用最后一个.
fn pair_modes(keys: Vec<Key>, modes: Vec<Interpolation>) -> Vec<(Key, Interpolation)> {
    let last = modes.last().copied().unwrap_or(Interpolation::Nearest);
    keys.into_iter()
        .enumerate()
        .map(|(i, k)| (k, modes.get(i).copied().unwrap_or(last)))
        .collect()
}

/// 将体素轴重排为目标方向 (默认 `RAS`).
#[derive(Clone, Debug)]
pub struct Orientation {
    keys: Vec<Key>,
    target: AxCodes,
}

impl Orientation {
    /// 将 `keys` 重排为 `target` 方向.
    pub fn new<I: IntoIterator<Item = Key>>(keys: I, target: AxCodes) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            target,
        }
    }

    /// 重排单个体数据.
    fn orient(&self, volume: &mut Volume, key: Key) -> TransformResult<()> {
        let (order, flips) = volume.affine().axcodes().transform_to(&self.target);
        if order == [0, 1, 2] && flips == [false; 3] {
            return Ok(());
        }

        let data = volume.view4(self.name(), key)?;
        let old = spatial_of(&data);
        let mut view = data.permuted_axes([0, order[0] + 1, order[1] + 1, order[2] + 1]);
        let mut m = [[0.0; 4]; 4];
        m[3][3] = 1.0;
        for t in 0..3 {
            let s = order[t];
            if flips[t] {
                view.invert_axis(Axis(t + 1));
                m[s][t] = -1.0;
                m[s][3] = old[s].saturating_sub(1) as f64;
            } else {
                m[s][t] = 1.0;
            }
        }
        let out = view.as_standard_layout().into_owned().into_dyn();
        let affine = volume.affine().compose(&Affine::from_rows(m));
        volume.replace(out, affine);
        Ok(())
    }
}

impl Transform for Orientation {
    fn name(&self) -> &'static str {
        "Orientation"
    }

    fn apply(&self, mut sample: Sample, _: &mut dyn RngCore) -> TransformResult<Vec<Sample>> {
        for &key in &self.keys {
            let volume = sample.volume_mut(self.name(), key)?;
            self.orient(volume, key)?;
        }
        Ok(vec![sample])
    }
}

/// 重采样到给定的体素分辨率 (毫米).
///
/// 每个轴的输出长度为 `round((n - 1) * old / new) + 1`, 越界处取边界值.
#[derive(Clone, Debug)]
pub struct Spacing {
    keys: Vec<(Key, Interpolation)>,
    pixdim: [f64; 3],
}

impl Spacing {
    /// `modes` 与 `keys` 一一对应.
    pub fn new<I, M>(keys: I, pixdim: [f64; 3], modes: M) -> Self
    where
        I: IntoIterator<Item = Key>,
        M: IntoIterator<Item = Interpolation>,
    {
        Self {
            keys: pair_modes(keys.into_iter().collect(), modes.into_iter().collect()),
            pixdim,
        }
    }

    /// 求重采样后的空间形状与 "新索引 -> 旧索引" 的缩放因子.
    pub fn output_geometry(&self, shape: [usize; 3], spacing: [f64; 3]) -> ([usize; 3], [f64; 3]) {
        let factors = [0, 1, 2].map(|a| self.pixdim[a] / spacing[a]);
        let out = [0, 1, 2].map(|a| {
            let extent = (shape[a].saturating_sub(1)) as f64 / factors[a];
            extent.round() as usize + 1
        });
        (out, factors)
    }
}

impl Transform for Spacing {
    fn name(&self) -> &'static str {
        "Spacing"
    }

    fn apply(&self, mut sample: Sample, _: &mut dyn RngCore) -> TransformResult<Vec<Sample>> {
        for &(key, mode) in &self.keys {
            let volume = sample.volume_mut(self.name(), key)?;
            let data = volume.view4(self.name(), key)?;
            let (shape, factors) = self.output_geometry(spatial_of(&data), volume.spacing());
            let out = map_channels(data, shape, |c| resample(c, shape, factors, mode));
            let affine = volume.affine().scaled(factors);
            log::debug!("resampled `{key}` to {shape:?} ({mode:?})");
            volume.replace(out.into_dyn(), affine);
        }
        Ok(vec![sample])
    }
}

/// 以概率 `prob` 做各向同性随机缩放, 缩放因子在 `[min_zoom, max_zoom]` 内均匀抽取.
///
/// 缩放后居中裁剪 (放大) 或以边界值居中填充 (缩小) 回原空间大小.
#[derive(Clone, Debug)]
pub struct RandZoom {
    keys: Vec<(Key, Interpolation)>,
    prob: f64,
    min_zoom: f64,
    max_zoom: f64,
}

impl RandZoom {
    /// `modes` 与 `keys` 一一对应.
    pub fn new<I, M>(keys: I, prob: f64, min_zoom: f64, max_zoom: f64, modes: M) -> Self
    where
        I: IntoIterator<Item = Key>,
        M: IntoIterator<Item = Interpolation>,
    {
        Self {
            keys: pair_modes(keys.into_iter().collect(), modes.into_iter().collect()),
            prob,
            min_zoom: min_zoom.min(max_zoom),
            max_zoom: max_zoom.max(min_zoom),
        }
    }
}

/// 将 `(C, i, j, k)` 数据以因子 `zoom` 缩放, 再居中裁剪/填充回原大小.
pub(crate) fn zoom_keep_size(
    data: ArrayView4<'_, f32>,
    affine: &Affine,
    zoom: f64,
    mode: Interpolation,
) -> (ndarray::Array4<f32>, Affine) {
    let shape = spatial_of(&data);
    let zoomed = shape.map(|n| ((n as f64 * zoom).floor() as usize).max(1));
    // 缩放结果中与输出索引 0 对齐的位置; 负数表示填充.
    let offset = [0, 1, 2].map(|a| (zoomed[a] as isize - shape[a] as isize) / 2);

    let out = map_channels(data, shape, |c| {
        let z = resize(c, zoomed, mode);
        ndarray::Array3::from_shape_fn(shape, |(i, j, k)| {
            let at = |o: usize, a: usize| {
                (o as isize + offset[a]).clamp(0, zoomed[a] as isize - 1) as usize
            };
            z[[at(i, 0), at(j, 1), at(k, 2)]]
        })
    });

    let f = [0, 1, 2].map(|a| shape[a] as f64 / zoomed[a] as f64);
    let t = [0, 1, 2].map(|a| f[a] * offset[a] as f64 + (f[a] - 1.0) / 2.0);
    (out, affine.shifted(t).scaled(f))
}

impl Transform for RandZoom {
    fn name(&self) -> &'static str {
        "RandZoom"
    }

    fn is_random(&self) -> bool {
        true
    }

    fn apply(&self, mut sample: Sample, rng: &mut dyn RngCore) -> TransformResult<Vec<Sample>> {
        if rng.gen::<f64>() >= self.prob {
            return Ok(vec![sample]);
        }
        let zoom = rng.gen_range(self.min_zoom..=self.max_zoom);
        for &(key, mode) in &self.keys {
            let volume = sample.volume_mut(self.name(), key)?;
            let data = volume.view4(self.name(), key)?;
            let (out, affine) = zoom_keep_size(data, volume.affine(), zoom, mode);
            volume.replace(out.into_dyn(), affine);
        }
        Ok(vec![sample])
    }
}

/// 以概率 `prob` 在空间平面 `axes` 内旋转 `k * 90` 度, `k` 在 `1..=max_k` 内均匀抽取.
///
/// 旋转方向与 `numpy.rot90` 相同: 从第一个轴转向第二个轴.
#[derive(Clone, Debug)]
pub struct RandRotate90 {
    keys: Vec<Key>,
    prob: f64,
    max_k: u32,
    axes: (usize, usize),
}

impl RandRotate90 {
    /// `axes` 为空间轴编号 (不含通道维), 两者必须不同且小于 3.
    pub fn new<I: IntoIterator<Item = Key>>(
        keys: I,
        prob: f64,
        max_k: u32,
        axes: (usize, usize),
    ) -> Self {
        assert!(axes.0 < 3 && axes.1 < 3 && axes.0 != axes.1, "非法的旋转平面 {axes:?}");
        Self {
            keys: keys.into_iter().collect(),
            prob,
            max_k: max_k.max(1),
            axes,
        }
    }
}

/// 在空间平面 `(a0, a1)` 内旋转 `k * 90` 度.
pub(crate) fn rot90(
    data: ArrayView4<'_, f32>,
    affine: &Affine,
    k: u32,
    (a0, a1): (usize, usize),
) -> (ndarray::Array4<f32>, Affine) {
    let mut out = data.to_owned();
    let mut affine = *affine;
    for _ in 0..k % 4 {
        let n1 = out.len_of(Axis(a1 + 1));
        let mut view = out.view();
        view.invert_axis(Axis(a1 + 1));
        view.swap_axes(a0 + 1, a1 + 1);
        let next = view.as_standard_layout().into_owned();

        // 旧 a0 = 新 a1, 旧 a1 = n1 - 1 - 新 a0.
        let mut m = [[0.0; 4]; 4];
        m[3][3] = 1.0;
        let other = 3 - a0 - a1;
        m[other][other] = 1.0;
        m[a0][a1] = 1.0;
        m[a1][a0] = -1.0;
        m[a1][3] = n1.saturating_sub(1) as f64;
        affine = affine.compose(&Affine::from_rows(m));
        out = next;
    }
    (out, affine)
}

impl Transform for RandRotate90 {
    fn name(&self) -> &'static str {
        "RandRotate90"
    }

    fn is_random(&self) -> bool {
        true
    }

    fn apply(&self, mut sample: Sample, rng: &mut dyn RngCore) -> TransformResult<Vec<Sample>> {
        if rng.gen::<f64>() >= self.prob {
            return Ok(vec![sample]);
        }
        let k = rng.gen_range(0..self.max_k) + 1;
        for &key in &self.keys {
            let volume = sample.volume_mut(self.name(), key)?;
            let data = volume.view4(self.name(), key)?;
            let (out, affine) = rot90(data, volume.affine(), k, self.axes);
            volume.replace(out.into_dyn(), affine);
        }
        Ok(vec![sample])
    }
}
