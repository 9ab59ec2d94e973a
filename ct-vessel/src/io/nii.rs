//! NIfTI 文件读取.

use std::path::Path;

use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use super::{LoadError, LoadResult};
use crate::data::{Affine, Volume};

/// 由 header 的 `pixdim` 获取 `(i, j, k)` 方向的体素分辨率.
/// 非正值 (未填写) 视为 1.
#[inline]
fn pix_dim(h: &NiftiHeader) -> [f64; 3] {
    let [_, i, j, k, ..] = h.pixdim;
    [i, j, k].map(|v| if v > 0.0 { v as f64 } else { 1.0 })
}

/// 由 header 构建体素到 RAS 的仿射变换.
///
/// 优先使用 sform, 其次 qform (四元数), 都没有时退化为仅包含分辨率的对角矩阵.
pub(crate) fn affine_from_header(h: &NiftiHeader) -> Affine {
    if h.sform_code > 0 {
        let row = |r: [f32; 4]| r.map(|v| v as f64);
        return Affine::from_rows([
            row(h.srow_x),
            row(h.srow_y),
            row(h.srow_z),
            [0.0, 0.0, 0.0, 1.0],
        ]);
    }

    let spacing = pix_dim(h);
    if h.qform_code <= 0 {
        return Affine::from_spacing(spacing);
    }

    let (b, c, d) = (
        h.quatern_b as f64,
        h.quatern_c as f64,
        h.quatern_d as f64,
    );
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
    let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
    let r = [
        [
            a * a + b * b - c * c - d * d,
            2.0 * (b * c - a * d),
            2.0 * (b * d + a * c),
        ],
        [
            2.0 * (b * c + a * d),
            a * a + c * c - b * b - d * d,
            2.0 * (c * d - a * b),
        ],
        [
            2.0 * (b * d - a * c),
            2.0 * (c * d + a * b),
            a * a + d * d - c * c - b * b,
        ],
    ];
    let scale = [spacing[0], spacing[1], spacing[2] * qfac];
    let columns = [0, 1, 2].map(|col| [0, 1, 2].map(|row| r[row][col] * scale[col]));
    let origin = [h.quatern_x, h.quatern_y, h.quatern_z].map(|v| v as f64);
    Affine::from_columns(columns, origin)
}

/// 打开 nii 格式的体数据. `path` 为 `.nii` 或 `.nii.gz` 文件的本地路径.
///
/// 数据按 NIfTI 原生的 `(i, j, k[, t])` 顺序保存, 并应用
/// `scl_slope` / `scl_inter`.
pub fn load_nifti<P: AsRef<Path>>(path: P) -> LoadResult<Volume> {
    let path = path.as_ref();
    let nifti_err = |source| LoadError::Nifti {
        path: path.to_owned(),
        source,
    };
    let obj = ReaderOptions::new().read_file(path).map_err(nifti_err)?;
    let affine = affine_from_header(obj.header());
    let data = obj
        .into_volume()
        .into_ndarray::<f32>()
        .map_err(nifti_err)?
        .as_standard_layout()
        .into_owned();
    Ok(Volume::new(data, affine))
}
