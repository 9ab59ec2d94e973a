//! DICOM 序列读取.
//!
//! 3D-IRCADb-01 的扫描与掩膜均以一个目录一组切片 (`image_0`, `image_1`, ...)
//! 的方式存储. 该模块仅支持非压缩、小端序、单采样的像素数据.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::{open_file, InMemDicomObject};
use ndarray::Array3;

use super::{LoadError, LoadResult};
use crate::data::{Affine, Volume};

/// 大端序显式 VR 传输语法. 已被 DICOM 标准废弃, 这里不支持.
const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";

/// 单张切片中对重建体数据有用的信息.
struct DicomSlice {
    rows: usize,
    cols: usize,
    position: Option<[f64; 3]>,
    orientation: Option<[f64; 6]>,
    /// `[行间距, 列间距]`, 即 `PixelSpacing` 的原始顺序.
    pixel_spacing: Option<[f64; 2]>,
    thickness: Option<f64>,
    instance: Option<i64>,
    pixels: Vec<f32>,
}

#[inline]
fn dicom_err<E: Display>(path: &Path, e: E) -> LoadError {
    LoadError::Dicom {
        path: path.to_owned(),
        reason: e.to_string(),
    }
}

fn int_attr(obj: &InMemDicomObject, tag: Tag, path: &Path) -> LoadResult<Option<i64>> {
    match obj.element(tag) {
        Ok(e) => e.to_int::<i64>().map(Some).map_err(|e| dicom_err(path, e)),
        Err(_) => Ok(None),
    }
}

fn float_attr(obj: &InMemDicomObject, tag: Tag, path: &Path) -> LoadResult<Option<f64>> {
    match obj.element(tag) {
        Ok(e) => e.to_float64().map(Some).map_err(|e| dicom_err(path, e)),
        Err(_) => Ok(None),
    }
}

/// 读取定长多值浮点属性. 值个数不符时视为错误.
fn floats_attr<const N: usize>(
    obj: &InMemDicomObject,
    tag: Tag,
    path: &Path,
) -> LoadResult<Option<[f64; N]>> {
    let Ok(e) = obj.element(tag) else {
        return Ok(None);
    };
    let v = e.to_multi_float64().map_err(|e| dicom_err(path, e))?;
    let arr: [f64; N] = v
        .try_into()
        .map_err(|v: Vec<f64>| dicom_err(path, format!("期望 {N} 个值, 实际为 {}", v.len())))?;
    Ok(Some(arr))
}

fn required_usize(
    obj: &InMemDicomObject,
    tag: Tag,
    name: &'static str,
    path: &Path,
) -> LoadResult<usize> {
    let v = int_attr(obj, tag, path)?.ok_or_else(|| LoadError::MissingAttribute {
        path: path.to_owned(),
        name,
    })?;
    usize::try_from(v).map_err(|_| dicom_err(path, format!("{name} 为负数: {v}")))
}

impl DicomSlice {
    fn read(path: &Path, obj: &InMemDicomObject, transfer_syntax: &str) -> LoadResult<Self> {
        let unsupported = |reason: String| LoadError::UnsupportedPixelData {
            path: path.to_owned(),
            reason,
        };

        if transfer_syntax.trim_end_matches('\0') == EXPLICIT_VR_BIG_ENDIAN {
            return Err(unsupported("大端序传输语法".to_string()));
        }

        let rows = required_usize(obj, tags::ROWS, "Rows", path)?;
        let cols = required_usize(obj, tags::COLUMNS, "Columns", path)?;
        let samples = int_attr(obj, tags::SAMPLES_PER_PIXEL, path)?.unwrap_or(1);
        if samples != 1 {
            return Err(unsupported(format!("SamplesPerPixel = {samples}")));
        }
        let bits = int_attr(obj, tags::BITS_ALLOCATED, path)?.unwrap_or(16);
        let signed = int_attr(obj, tags::PIXEL_REPRESENTATION, path)?.unwrap_or(0) == 1;
        let slope = float_attr(obj, tags::RESCALE_SLOPE, path)?.unwrap_or(1.0) as f32;
        let intercept = float_attr(obj, tags::RESCALE_INTERCEPT, path)?.unwrap_or(0.0) as f32;

        let raw = obj
            .element(tags::PIXEL_DATA)
            .map_err(|_| LoadError::MissingAttribute {
                path: path.to_owned(),
                name: "PixelData",
            })?
            .to_bytes()
            .map_err(|e| unsupported(e.to_string()))?;

        let n = rows * cols;
        let mut pixels: Vec<f32> = match (bits, signed) {
            (8, false) => raw.iter().take(n).map(|&b| b as f32).collect(),
            (8, true) => raw.iter().take(n).map(|&b| b as i8 as f32).collect(),
            (16, false) => raw
                .chunks_exact(2)
                .take(n)
                .map(|c| u16::from_le_bytes([c[0], c[1]]) as f32)
                .collect(),
            (16, true) => raw
                .chunks_exact(2)
                .take(n)
                .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32)
                .collect(),
            (32, false) => raw
                .chunks_exact(4)
                .take(n)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32)
                .collect(),
            (32, true) => raw
                .chunks_exact(4)
                .take(n)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32)
                .collect(),
            (bits, _) => return Err(unsupported(format!("BitsAllocated = {bits}"))),
        };
        if pixels.len() < n {
            return Err(unsupported(format!(
                "像素数据长度不足: 期望 {n} 个像素, 实际为 {}",
                pixels.len()
            )));
        }
        if slope != 1.0 || intercept != 0.0 {
            pixels.iter_mut().for_each(|p| *p = *p * slope + intercept);
        }

        Ok(Self {
            rows,
            cols,
            position: floats_attr::<3>(obj, tags::IMAGE_POSITION_PATIENT, path)?,
            orientation: floats_attr::<6>(obj, tags::IMAGE_ORIENTATION_PATIENT, path)?,
            pixel_spacing: floats_attr::<2>(obj, tags::PIXEL_SPACING, path)?,
            thickness: float_attr(obj, tags::SLICE_THICKNESS, path)?,
            instance: int_attr(obj, tags::INSTANCE_NUMBER, path)?,
            pixels,
        })
    }
}

#[inline]
fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// 文件名的自然排序键: `image_10` 排在 `image_9` 之后.
fn natural_key(path: &Path) -> (String, u64) {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let (stem, num) = name.split_at(name.len() - digits);
    (stem.to_string(), num.parse().unwrap_or(0))
}

/// 收集目录下的所有常规文件, 按文件名自然序排列.
fn list_files(dir: &Path) -> LoadResult<Vec<PathBuf>> {
    let io_err = |source| LoadError::Io {
        path: dir.to_owned(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let p = entry.map_err(io_err)?.path();
        if p.is_file() {
            files.push(p);
        }
    }
    files.sort_by_cached_key(|p| natural_key(p));
    Ok(files)
}

/// 按切片法向对切片排序. 若有切片缺少位置信息, 则依次退化为
/// `InstanceNumber` 顺序和文件名顺序.
fn sort_slices(slices: &mut [DicomSlice], normal: &[f64; 3]) {
    if slices.iter().all(|s| s.position.is_some()) {
        slices.sort_by(|a, b| {
            let da = a.position.as_ref().map_or(0.0, |p| dot(p, normal));
            let db = b.position.as_ref().map_or(0.0, |p| dot(p, normal));
            da.total_cmp(&db)
        });
    } else if slices.iter().all(|s| s.instance.is_some()) {
        slices.sort_by_key(|s| s.instance);
    }
}

/// 读取目录 `dir` 下的 DICOM 序列, 重建为 `(i, j, k)` 体数据.
///
/// - `i` 沿切片列方向 (`ImageOrientationPatient` 前三个分量),
/// - `j` 沿切片行方向 (后三个分量),
/// - `k` 沿切片法向, 按 `ImagePositionPatient` 排序.
///
/// 仿射变换由 DICOM 的 LPS 坐标转换为 RAS 坐标. 目录中无法解析为 DICOM
/// 的文件会被跳过.
pub fn load_dicom_series<P: AsRef<Path>>(dir: P) -> LoadResult<Volume> {
    let dir = dir.as_ref();
    let mut slices = Vec::new();
    for path in list_files(dir)? {
        let obj = match open_file(&path) {
            Ok(obj) => obj,
            Err(e) => {
                log::debug!("跳过非 DICOM 文件 `{}`: {e}", path.display());
                continue;
            }
        };
        let ts = obj.meta().transfer_syntax().to_string();
        slices.push(DicomSlice::read(&path, &obj, &ts)?);
    }
    if slices.is_empty() {
        return Err(LoadError::EmptySeries(dir.to_owned()));
    }

    let inconsistent = |reason: String| LoadError::InconsistentSeries {
        path: dir.to_owned(),
        reason,
    };
    let (rows, cols) = (slices[0].rows, slices[0].cols);
    if let Some(s) = slices.iter().find(|s| (s.rows, s.cols) != (rows, cols)) {
        return Err(inconsistent(format!(
            "切片尺寸 {}x{} 与首张切片 {rows}x{cols} 不符",
            s.rows, s.cols
        )));
    }

    let o = slices[0]
        .orientation
        .unwrap_or([1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    let row_dir = [o[0], o[1], o[2]];
    let col_dir = [o[3], o[4], o[5]];
    let normal = cross(&row_dir, &col_dir);
    sort_slices(&mut slices, &normal);

    let n = slices.len();
    let [dy, dx] = slices[0].pixel_spacing.unwrap_or([1.0, 1.0]);
    let k_col = match (slices[0].position, slices[n - 1].position) {
        (Some(first), Some(last)) if n > 1 => {
            let steps = (n - 1) as f64;
            [0, 1, 2].map(|a| (last[a] - first[a]) / steps)
        }
        _ => {
            let dz = slices[0].thickness.unwrap_or(1.0);
            normal.map(|v| v * dz)
        }
    };
    let origin = slices[0].position.unwrap_or([0.0; 3]);

    // LPS -> RAS: x, y 分量取反.
    let ras = |v: [f64; 3]| [-v[0], -v[1], v[2]];
    let affine = Affine::from_columns(
        [
            ras(row_dir.map(|v| v * dx)),
            ras(col_dir.map(|v| v * dy)),
            ras(k_col),
        ],
        ras(origin),
    );

    let data = Array3::from_shape_fn((cols, rows, n), |(i, j, k)| slices[k].pixels[j * cols + i]);
    log::debug!(
        "读取 DICOM 序列 `{}`: 形状 {:?}, 方向 {}",
        dir.display(),
        data.shape(),
        affine.axcodes()
    );
    Ok(Volume::new(data.into_dyn(), affine))
}

#[cfg(test)]
mod tests {
    use super::{cross, load_dicom_series, natural_key, sort_slices, DicomSlice};
    use crate::io::testing::Series;
    use std::path::Path;

    fn slice_at(z: f64, instance: i64) -> DicomSlice {
        DicomSlice {
            rows: 1,
            cols: 1,
            position: Some([0.0, 0.0, z]),
            orientation: None,
            pixel_spacing: None,
            thickness: None,
            instance: Some(instance),
            pixels: vec![z as f32],
        }
    }

    #[test]
    fn test_natural_key() {
        let mut names = ["image_10", "image_2", "image_0", "image_1"]
            .map(|n| Path::new("/d").join(n))
            .to_vec();
        names.sort_by_cached_key(|p| natural_key(p));
        let sorted: Vec<_> = names
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(sorted, ["image_0", "image_1", "image_2", "image_10"]);
    }

    #[test]
    fn test_sort_by_position() {
        let normal = cross(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert_eq!(normal, [0.0, 0.0, 1.0]);

        let mut slices = vec![slice_at(5.0, 1), slice_at(-2.5, 3), slice_at(1.0, 2)];
        sort_slices(&mut slices, &normal);
        let zs: Vec<f32> = slices.iter().map(|s| s.pixels[0]).collect();
        assert_eq!(zs, [-2.5, 1.0, 5.0]);

        // 缺少位置信息时按 InstanceNumber 排序.
        slices[0].position = None;
        sort_slices(&mut slices, &normal);
        let ins: Vec<_> = slices.iter().map(|s| s.instance.unwrap()).collect();
        assert_eq!(ins, [1, 2, 3]);
    }

    /// 切片在磁盘上乱序存放, 重建后按位置排列.
    #[test]
    fn test_load_shuffled_series() {
        let dir = tempfile::tempdir().unwrap();
        let series = Series {
            shape: [3, 2, 3],
            spacing: [0.7, 0.5, 2.5],
            origin: [10.0, -20.0, 0.0],
            intercept: -1024.0,
        };
        // 文件顺序对应 z = 5, 0, 2.5.
        series.write(dir.path(), &[2, 0, 1], |i, j, k| (k * 100 + j * 3 + i) as i16);
        std::fs::write(dir.path().join("DIRINFO"), b"not a slice").unwrap();

        let v = load_dicom_series(dir.path()).unwrap();
        assert_eq!(v.data().shape(), [3, 2, 3]);
        assert_eq!(v.data()[[2, 1, 0]], -1019.0);
        assert_eq!(v.data()[[1, 0, 2]], -823.0);
        assert_eq!(v.data()[[0, 0, 1]], -924.0);

        let sp = v.spacing();
        for (a, b) in sp.iter().zip([0.7, 0.5, 2.5]) {
            assert!((a - b).abs() < 1e-9, "{sp:?}");
        }
        assert_eq!(v.affine().axcodes().to_string(), "LPS");
        assert_eq!(v.affine().origin(), [-10.0, 20.0, 0.0]);
    }
}
