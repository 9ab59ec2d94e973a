//! 体数据加载.
//!
//! 目录按 DICOM 序列读取, `.nii` / `.nii.gz` 文件按 NIfTI 读取.
//! 返回的 [`Volume`] 为空间三维 `(i, j, k)`, 仿射变换以 RAS 世界坐标表示.

use std::fmt::Formatter;
use std::path::{Path, PathBuf};

use crate::data::Volume;

mod dicom;
mod nii;

pub use dicom::load_dicom_series;
pub use nii::load_nifti;

/// 体数据加载错误.
#[derive(Debug)]
pub enum LoadError {
    /// 底层 I/O 错误 (包括路径不存在).
    Io {
        /// 出错的路径.
        path: PathBuf,
        /// 底层错误.
        source: std::io::Error,
    },

    /// 解析 DICOM 文件错误.
    Dicom {
        /// 出错的文件.
        path: PathBuf,
        /// 错误描述.
        reason: String,
    },

    /// 解析 NIfTI 文件错误.
    Nifti {
        /// 出错的文件.
        path: PathBuf,
        /// 底层错误.
        source: nifti::NiftiError,
    },

    /// 缺少必需的 DICOM 属性.
    MissingAttribute {
        /// 出错的文件.
        path: PathBuf,
        /// 属性名.
        name: &'static str,
    },

    /// 不支持的像素数据格式 (压缩传输语法, 大端序, 多采样等).
    UnsupportedPixelData {
        /// 出错的文件.
        path: PathBuf,
        /// 错误描述.
        reason: String,
    },

    /// 目录中没有可读的 DICOM 文件.
    EmptySeries(PathBuf),

    /// 序列内各切片的尺寸或方向不一致.
    InconsistentSeries {
        /// 序列目录.
        path: PathBuf,
        /// 错误描述.
        reason: String,
    },

    /// 既不是目录也不是 NIfTI 文件.
    UnknownFormat(PathBuf),
}

impl LoadError {
    /// 出错的路径.
    pub fn path(&self) -> &Path {
        match self {
            LoadError::Io { path, .. }
            | LoadError::Dicom { path, .. }
            | LoadError::Nifti { path, .. }
            | LoadError::MissingAttribute { path, .. }
            | LoadError::UnsupportedPixelData { path, .. }
            | LoadError::InconsistentSeries { path, .. } => path,
            LoadError::EmptySeries(path) | LoadError::UnknownFormat(path) => path,
        }
    }

    /// 是否是路径不存在错误?
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LoadError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io { path, source } => write!(f, "读取 `{}` 失败: {source}", path.display()),
            LoadError::Dicom { path, reason } => {
                write!(f, "解析 DICOM 文件 `{}` 失败: {reason}", path.display())
            }
            LoadError::Nifti { path, source } => {
                write!(f, "解析 NIfTI 文件 `{}` 失败: {source}", path.display())
            }
            LoadError::MissingAttribute { path, name } => {
                write!(f, "DICOM 文件 `{}` 缺少属性 {name}", path.display())
            }
            LoadError::UnsupportedPixelData { path, reason } => {
                write!(f, "`{}` 像素数据不受支持: {reason}", path.display())
            }
            LoadError::EmptySeries(path) => {
                write!(f, "目录 `{}` 中没有可读的 DICOM 文件", path.display())
            }
            LoadError::InconsistentSeries { path, reason } => {
                write!(f, "DICOM 序列 `{}` 不一致: {reason}", path.display())
            }
            LoadError::UnknownFormat(path) => write!(f, "无法识别 `{}` 的格式", path.display()),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io { source, .. } => Some(source),
            LoadError::Nifti { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// 加载结果.
pub type LoadResult<T> = Result<T, LoadError>;

/// `path` 是否具有 NIfTI 扩展名 (`.nii` 或 `.nii.gz`)?
pub fn is_nifti_path<P: AsRef<Path>>(path: P) -> bool {
    let Some(name) = path.as_ref().file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_ascii_lowercase();
    name.ends_with(".nii") || name.ends_with(".nii.gz")
}

/// 加载 `path` 处的体数据.
///
/// - `path` 是目录时, 按 DICOM 序列读取目录下的所有切片;
/// - `path` 是 `.nii` / `.nii.gz` 文件时, 按 NIfTI 读取.
///
/// 路径不存在时返回 `LoadError::Io` (`NotFound`). 该函数不做任何缓存.
pub fn load_volume<P: AsRef<Path>>(path: P) -> LoadResult<Volume> {
    let path = path.as_ref();
    let meta = std::fs::metadata(path).map_err(|source| LoadError::Io {
        path: path.to_owned(),
        source,
    })?;
    if meta.is_dir() {
        load_dicom_series(path)
    } else if is_nifti_path(path) {
        load_nifti(path)
    } else {
        Err(LoadError::UnknownFormat(path.to_owned()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 测试用的合成 DICOM 序列.

    use std::path::Path;

    use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
    use dicom_dictionary_std::tags;
    use dicom_object::mem::InMemElement;
    use dicom_object::{FileMetaTableBuilder, InMemDicomObject};

    const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
    const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
    const AXIAL: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

    fn ds(values: &[f64]) -> PrimitiveValue {
        PrimitiveValue::Strs(values.iter().map(|v| v.to_string()).collect())
    }

    fn elem(tag: Tag, vr: VR, value: PrimitiveValue) -> InMemElement {
        DataElement::new(tag, vr, value)
    }

    /// 一组轴对齐 (LPS 方向) 的切片. 存储值为有符号 16 位整数.
    pub struct Series {
        /// 重建后 `(i, j, k)` 的形状, 即 `[列数, 行数, 切片数]`.
        pub shape: [usize; 3],
        /// `(i, j, k)` 三个方向的间距.
        pub spacing: [f64; 3],
        /// 第 0 张切片的 LPS 位置.
        pub origin: [f64; 3],
        /// `RescaleIntercept`.
        pub intercept: f64,
    }

    impl Series {
        /// 写入 `dir`. 文件 `image_{n}` 存放第 `order[n]` 张切片.
        pub fn write<F>(&self, dir: &Path, order: &[usize], value: F)
        where
            F: Fn(usize, usize, usize) -> i16,
        {
            std::fs::create_dir_all(dir).unwrap();
            let [cols, rows, _] = self.shape;
            let [si, sj, sk] = self.spacing;
            for (n, &k) in order.iter().enumerate() {
                let mut pixels = Vec::with_capacity(rows * cols * 2);
                for j in 0..rows {
                    for i in 0..cols {
                        pixels.extend_from_slice(&value(i, j, k).to_le_bytes());
                    }
                }
                let [x, y, z] = self.origin;
                let position = [x, y, z + k as f64 * sk];
                let uid = format!("1.2.826.0.1.3680043.2.1125.{}.{k}", std::process::id());

                let obj = InMemDicomObject::from_element_iter([
                    elem(tags::SOP_CLASS_UID, VR::UI, CT_IMAGE_STORAGE.into()),
                    elem(tags::SOP_INSTANCE_UID, VR::UI, uid.into()),
                    elem(tags::INSTANCE_NUMBER, VR::IS, (k + 1).to_string().into()),
                    elem(tags::IMAGE_POSITION_PATIENT, VR::DS, ds(&position)),
                    elem(tags::IMAGE_ORIENTATION_PATIENT, VR::DS, ds(&AXIAL)),
                    elem(tags::SAMPLES_PER_PIXEL, VR::US, 1u16.into()),
                    elem(tags::ROWS, VR::US, (rows as u16).into()),
                    elem(tags::COLUMNS, VR::US, (cols as u16).into()),
                    elem(tags::PIXEL_SPACING, VR::DS, ds(&[sj, si])),
                    elem(tags::BITS_ALLOCATED, VR::US, 16u16.into()),
                    elem(tags::BITS_STORED, VR::US, 16u16.into()),
                    elem(tags::PIXEL_REPRESENTATION, VR::US, 1u16.into()),
                    elem(tags::RESCALE_SLOPE, VR::DS, ds(&[1.0])),
                    elem(tags::RESCALE_INTERCEPT, VR::DS, ds(&[self.intercept])),
                    elem(tags::PIXEL_DATA, VR::OB, pixels.into()),
                ]);
                obj.with_meta(
                    FileMetaTableBuilder::new()
                        .media_storage_sop_class_uid(CT_IMAGE_STORAGE)
                        .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN),
                )
                .unwrap()
                .write_to_file(dir.join(format!("image_{n}")))
                .unwrap();
            }
        }
    }
}
