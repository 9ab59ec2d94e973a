//! 三维插值核.
//!
//! 所有函数都作用于单通道 `(i, j, k)` 数据; 多通道数据由 [`map_channels`] 逐通道处理.
//! 插值是可分离的: 先为每个轴预先计算采样表, 再逐体素组合.

use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis, Slice, Zip};

/// 插值方式.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Interpolation {
    /// 最近邻. 标签必须使用该方式, 以保证输出仍是原有标签值.
    Nearest,

    /// (三) 线性.
    Bilinear,

    /// 区域平均 (自适应平均池化). 仅用于缩放.
    Area,
}

/// 单个轴的采样表. 输出索引 `o` 取 `(1 - w[o]) * src[lo[o]] + w[o] * src[hi[o]]`.
#[derive(Clone, Debug)]
struct Taps {
    lo: Vec<usize>,
    hi: Vec<usize>,
    w: Vec<f32>,
}

impl Taps {
    /// 由每个输出索引对应的源坐标构建. 坐标被截断到 `[0, n_in - 1]`.
    fn from_coords<I: Iterator<Item = f64>>(n_in: usize, coords: I, nearest: bool) -> Self {
        let last = n_in.saturating_sub(1);
        let (mut lo, mut hi, mut w) = (vec![], vec![], vec![]);
        for x in coords {
            let x = x.clamp(0.0, last as f64);
            if nearest {
                let i = (x.round() as usize).min(last);
                lo.push(i);
                hi.push(i);
                w.push(0.0);
            } else {
                let i = (x.floor() as usize).min(last);
                lo.push(i);
                hi.push((i + 1).min(last));
                w.push((x - i as f64) as f32);
            }
        }
        Self { lo, hi, w }
    }

    /// 源坐标为 `o * factor` (体素中心对齐, 用于按分辨率重采样).
    fn scaled(n_in: usize, n_out: usize, factor: f64, nearest: bool) -> Self {
        Self::from_coords(n_in, (0..n_out).map(|o| o as f64 * factor), nearest)
    }

    /// 源坐标为 `(o + 0.5) * n_in / n_out - 0.5` (半像素对齐, 用于缩放).
    fn resized(n_in: usize, n_out: usize) -> Self {
        let scale = n_in as f64 / n_out as f64;
        Self::from_coords(
            n_in,
            (0..n_out).map(|o| (o as f64 + 0.5) * scale - 0.5),
            false,
        )
    }

    /// 最近邻缩放: 源索引为 `floor(o * n_in / n_out)`.
    fn resized_nearest(n_in: usize, n_out: usize) -> Self {
        let lo: Vec<usize> = (0..n_out).map(|o| (o * n_in / n_out).min(n_in - 1)).collect();
        Self {
            hi: lo.clone(),
            w: vec![0.0; n_out],
            lo,
        }
    }

    #[inline]
    fn at(&self, o: usize) -> [(usize, f32); 2] {
        let w = self.w[o];
        [(self.lo[o], 1.0 - w), (self.hi[o], w)]
    }
}

/// 按三个轴的采样表组合出输出.
fn sample_separable(src: ArrayView3<'_, f32>, taps: &[Taps; 3]) -> Array3<f32> {
    let shape = [taps[0].lo.len(), taps[1].lo.len(), taps[2].lo.len()];
    let mut dst = Array3::<f32>::zeros(shape);
    Zip::indexed(&mut dst).par_for_each(|(i, j, k), v| {
        let mut acc = 0.0;
        for (ii, wi) in taps[0].at(i) {
            for (jj, wj) in taps[1].at(j) {
                for (kk, wk) in taps[2].at(k) {
                    let w = wi * wj * wk;
                    if w != 0.0 {
                        acc += w * src[[ii, jj, kk]];
                    }
                }
            }
        }
        *v = acc;
    });
    dst
}

/// 沿 `axis` 以自适应平均池化缩放到 `n_out`.
fn area_axis(src: ArrayView3<'_, f32>, axis: usize, n_out: usize) -> Array3<f32> {
    let n_in = src.len_of(Axis(axis));
    let mut shape = src.raw_dim();
    shape[axis] = n_out;
    let mut dst = Array3::<f32>::zeros(shape);
    for (o, mut plane) in dst.axis_iter_mut(Axis(axis)).enumerate() {
        let start = o * n_in / n_out;
        let end = ((o + 1) * n_in + n_out - 1) / n_out;
        let slab = src.slice_axis(Axis(axis), Slice::from(start..end.max(start + 1)));
        if let Some(mean) = slab.mean_axis(Axis(axis)) {
            plane.assign(&mean);
        }
    }
    dst
}

/// 按分辨率重采样: 输出索引 `o` 对应源坐标 `o * factors[axis]`, 越界处取边界值.
///
/// [`Interpolation::Area`] 在这里按 [`resize`] 处理.
pub(crate) fn resample(
    src: ArrayView3<'_, f32>,
    shape: [usize; 3],
    factors: [f64; 3],
    mode: Interpolation,
) -> Array3<f32> {
    let nearest = match mode {
        Interpolation::Nearest => true,
        Interpolation::Bilinear => false,
        Interpolation::Area => return resize(src, shape, mode),
    };
    let (ni, nj, nk) = src.dim();
    let taps = [
        Taps::scaled(ni, shape[0], factors[0], nearest),
        Taps::scaled(nj, shape[1], factors[1], nearest),
        Taps::scaled(nk, shape[2], factors[2], nearest),
    ];
    sample_separable(src, &taps)
}

/// 缩放到 `shape`.
///
/// - `Nearest`: 源索引 `floor(o * n_in / n_out)`;
/// - `Bilinear`: 半像素对齐的线性插值;
/// - `Area`: 各轴依次做自适应平均池化.
pub(crate) fn resize(
    src: ArrayView3<'_, f32>,
    shape: [usize; 3],
    mode: Interpolation,
) -> Array3<f32> {
    let (ni, nj, nk) = src.dim();
    let dims = [ni, nj, nk];
    match mode {
        Interpolation::Nearest => {
            let taps = [0, 1, 2].map(|a| Taps::resized_nearest(dims[a], shape[a]));
            sample_separable(src, &taps)
        }
        Interpolation::Bilinear => {
            let taps = [0, 1, 2].map(|a| Taps::resized(dims[a], shape[a]));
            sample_separable(src, &taps)
        }
        Interpolation::Area => {
            let mut out = src.to_owned();
            for (axis, &n) in shape.iter().enumerate() {
                if out.len_of(Axis(axis)) != n {
                    out = area_axis(out.view(), axis, n);
                }
            }
            out
        }
    }
}

/// 对 `(C, i, j, k)` 数据的每个通道执行 `op`. 所有通道的输出形状必须是 `shape`.
pub(crate) fn map_channels<F>(data: ArrayView4<'_, f32>, shape: [usize; 3], op: F) -> Array4<f32>
where
    F: Fn(ArrayView3<'_, f32>) -> Array3<f32>,
{
    let c = data.len_of(Axis(0));
    let mut out = Array4::<f32>::zeros((c, shape[0], shape[1], shape[2]));
    for (src, mut dst) in data.outer_iter().zip(out.outer_iter_mut()) {
        dst.assign(&op(src));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{map_channels, resample, resize, Interpolation};
    use ndarray::{Array3, Array4};

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_resample_linear_ramp() {
        // 沿 i 轴的线性斜坡, 线性插值应精确复现.
        let src = Array3::from_shape_fn((5, 2, 2), |(i, _, _)| i as f32 * 10.0);
        let out = resample(src.view(), [9, 2, 2], [0.5, 1.0, 1.0], Interpolation::Bilinear);
        assert_eq!(out.dim(), (9, 2, 2));
        for o in 0..9 {
            assert!(float_eq(out[[o, 1, 0]], o as f32 * 5.0));
        }

        // 越界坐标取边界值.
        let out = resample(src.view(), [4, 2, 2], [1.5, 1.0, 1.0], Interpolation::Bilinear);
        assert!(float_eq(out[[3, 0, 0]], 40.0));
    }

    #[test]
    fn test_resample_nearest_keeps_values() {
        let src = Array3::from_shape_fn((7, 6, 5), |(i, j, k)| ((i + j + k) % 2) as f32);
        let out = resample(src.view(), [10, 4, 8], [0.7, 1.6, 0.55], Interpolation::Nearest);
        assert!(out.iter().all(|&v| v == 0.0 || v == 1.0));
        assert_eq!(out[[0, 0, 0]], src[[0, 0, 0]]);
    }

    #[test]
    fn test_resize_area_and_nearest() {
        let src = Array3::from_shape_fn((4, 4, 2), |(i, _, _)| i as f32);
        let out = resize(src.view(), [2, 4, 2], Interpolation::Area);
        assert_eq!(out.dim(), (2, 4, 2));
        assert!(float_eq(out[[0, 0, 0]], 0.5));
        assert!(float_eq(out[[1, 3, 1]], 2.5));

        // 放大时区域平均退化为复制.
        let out = resize(src.view(), [8, 4, 2], Interpolation::Area);
        assert!(float_eq(out[[6, 0, 0]], 3.0));
        assert!(float_eq(out[[1, 0, 0]], 0.0));

        let out = resize(src.view(), [6, 4, 2], Interpolation::Nearest);
        let col: Vec<f32> = (0..6).map(|o| out[[o, 0, 0]]).collect();
        assert_eq!(col, [0.0, 0.0, 1.0, 2.0, 2.0, 3.0]);
    }

    #[test]
    fn test_map_channels() {
        let data = Array4::from_shape_fn((2, 4, 4, 4), |(c, _, _, _)| c as f32);
        let out = map_channels(data.view(), [2, 2, 2], |v| {
            resize(v, [2, 2, 2], Interpolation::Area)
        });
        assert_eq!(out.dim(), (2, 2, 2, 2));
        assert!(out.outer_iter().enumerate().all(|(c, ch)| ch.iter().all(|&v| v == c as f32)));
    }
}
