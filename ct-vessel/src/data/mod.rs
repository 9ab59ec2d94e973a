use std::collections::BTreeMap;
use std::fmt::Formatter;
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, ArrayView4, ArrayViewMut4, Ix4};

use crate::transforms::{TransformError, TransformResult};

pub mod affine;
pub mod window;

pub use affine::{Affine, AxCodes, AxisCode};
pub use window::CtWindow;

/// 样本中的字段名.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Key {
    /// CT 扫描.
    Image,

    /// 主标签 (静脉系统); 并入次标签后即为最终的血管标签.
    Label,

    /// 肝脏 ROI 掩膜, 仅用于初次裁剪.
    Mask,

    /// 次标签 (动脉).
    Label2,
}

impl Key {
    /// 全部字段, 按 `image, label, mask, label2` 排列.
    pub const ALL: [Key; 4] = [Key::Image, Key::Label, Key::Mask, Key::Label2];

    /// 字段的字符串名.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Key::Image => "image",
            Key::Label => "label",
            Key::Mask => "mask",
            Key::Label2 => "label2",
        }
    }

    /// 由字符串名解析字段.
    pub fn from_name(name: &str) -> Option<Key> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `f32` 体数据与其仿射变换.
///
/// 刚加载时数据为空间三维 `(i, j, k)`; 经过
/// [`crate::transforms::EnsureChannelFirst`] 之后为 `(C, i, j, k)`.
/// 标签同样以 `f32` 存储.
#[derive(Clone, Debug)]
pub struct Volume {
    data: ArrayD<f32>,
    affine: Affine,
}

impl Volume {
    /// 直接由数据和仿射变换创建.
    #[inline]
    pub fn new(data: ArrayD<f32>, affine: Affine) -> Self {
        Self { data, affine }
    }

    /// 获取底层数据.
    #[inline]
    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    /// 获取底层可变数据.
    #[inline]
    pub fn data_mut(&mut self) -> &mut ArrayD<f32> {
        &mut self.data
    }

    /// 获取仿射变换.
    #[inline]
    pub fn affine(&self) -> &Affine {
        &self.affine
    }

    /// 替换数据与仿射变换.
    #[inline]
    pub fn replace(&mut self, data: ArrayD<f32>, affine: Affine) {
        self.data = data;
        self.affine = affine;
    }

    /// 数据维数.
    #[inline]
    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// 体素分辨率, 见 [`Affine::spacing`].
    #[inline]
    pub fn spacing(&self) -> [f64; 3] {
        self.affine.spacing()
    }

    /// 空间形状, 即数据最后三维. 维数不足时返回 `None`.
    pub fn spatial_shape(&self) -> Option<[usize; 3]> {
        match self.data.shape() {
            [.., i, j, k] => Some([*i, *j, *k]),
            _ => None,
        }
    }

    /// 以 `(C, i, j, k)` 格式获取不可变视图. 维数不是 4 时返回 `Err`.
    pub fn view4(&self, step: &'static str, key: Key) -> TransformResult<ArrayView4<'_, f32>> {
        let found = self.ndim();
        self.data
            .view()
            .into_dimensionality::<Ix4>()
            .map_err(|_| TransformError::Rank {
                step,
                key,
                expected: 4,
                found,
            })
    }

    /// 以 `(C, i, j, k)` 格式获取可变视图. 维数不是 4 时返回 `Err`.
    pub fn view4_mut(
        &mut self,
        step: &'static str,
        key: Key,
    ) -> TransformResult<ArrayViewMut4<'_, f32>> {
        let found = self.ndim();
        self.data
            .view_mut()
            .into_dimensionality::<Ix4>()
            .map_err(|_| TransformError::Rank {
                step,
                key,
                expected: 4,
                found,
            })
    }
}

/// 样本字段的值: 尚未加载的路径, 或已加载的体数据.
#[derive(Clone, Debug)]
pub enum Field {
    /// 尚未加载的路径.
    Path(PathBuf),

    /// 已加载的体数据.
    Volume(Volume),
}

/// 一个样本: 字段名到字段值的有序映射, 附带来源病例编号.
#[derive(Clone, Debug, Default)]
pub struct Sample {
    patient: Option<u32>,
    fields: BTreeMap<Key, Field>,
}

impl Sample {
    /// 创建空样本.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 由一组路径创建未加载的样本.
    pub fn from_paths<I, P>(patient: Option<u32>, paths: I) -> Self
    where
        I: IntoIterator<Item = (Key, P)>,
        P: AsRef<Path>,
    {
        let fields = paths
            .into_iter()
            .map(|(k, p)| (k, Field::Path(p.as_ref().to_owned())))
            .collect();
        Self { patient, fields }
    }

    /// 来源病例编号.
    #[inline]
    pub fn patient(&self) -> Option<u32> {
        self.patient
    }

    /// 设置来源病例编号.
    #[inline]
    pub fn with_patient(mut self, patient: u32) -> Self {
        self.patient = Some(patient);
        self
    }

    /// 插入体数据字段, 返回旧值 (若有).
    #[inline]
    pub fn insert_volume(&mut self, key: Key, volume: Volume) -> Option<Field> {
        self.fields.insert(key, Field::Volume(volume))
    }

    /// 插入字段, 返回旧值 (若有).
    #[inline]
    pub fn insert(&mut self, key: Key, field: Field) -> Option<Field> {
        self.fields.insert(key, field)
    }

    /// 移除字段.
    #[inline]
    pub fn remove(&mut self, key: Key) -> Option<Field> {
        self.fields.remove(&key)
    }

    /// 样本是否包含字段 `key`?
    #[inline]
    pub fn contains(&self, key: Key) -> bool {
        self.fields.contains_key(&key)
    }

    /// 按序获取所有字段名.
    #[inline]
    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.fields.keys().copied()
    }

    /// 获取字段.
    #[inline]
    pub fn get(&self, key: Key) -> Option<&Field> {
        self.fields.get(&key)
    }

    /// 获取已加载的体数据. 字段缺失或尚未加载时返回 `Err`.
    pub fn volume(&self, step: &'static str, key: Key) -> TransformResult<&Volume> {
        match self.fields.get(&key) {
            Some(Field::Volume(v)) => Ok(v),
            Some(Field::Path(_)) => Err(TransformError::NotLoaded { step, key }),
            None => Err(TransformError::MissingKey { step, key }),
        }
    }

    /// 获取已加载的可变体数据. 字段缺失或尚未加载时返回 `Err`.
    pub fn volume_mut(&mut self, step: &'static str, key: Key) -> TransformResult<&mut Volume> {
        match self.fields.get_mut(&key) {
            Some(Field::Volume(v)) => Ok(v),
            Some(Field::Path(_)) => Err(TransformError::NotLoaded { step, key }),
            None => Err(TransformError::MissingKey { step, key }),
        }
    }

    /// 按序迭代所有已加载的体数据.
    pub fn volumes(&self) -> impl Iterator<Item = (Key, &Volume)> + '_ {
        self.fields.iter().filter_map(|(k, f)| match f {
            Field::Volume(v) => Some((*k, v)),
            Field::Path(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Affine, Field, Key, Sample, Volume};
    use crate::transforms::TransformError;
    use ndarray::ArrayD;
    use ndarray::IxDyn;

    #[test]
    fn test_key_names() {
        for k in Key::ALL {
            assert_eq!(Key::from_name(k.as_str()), Some(k));
        }
        assert_eq!(Key::from_name("label3"), None);
        assert_eq!(Key::Label2.to_string(), "label2");
    }

    #[test]
    fn test_sample_access() {
        let mut s = Sample::from_paths(Some(4), [(Key::Image, "/a"), (Key::Mask, "/b")]);
        assert_eq!(s.patient(), Some(4));
        assert!(matches!(
            s.volume("test", Key::Image),
            Err(TransformError::NotLoaded { .. })
        ));
        assert!(matches!(
            s.volume("test", Key::Label),
            Err(TransformError::MissingKey { .. })
        ));

        let v = Volume::new(ArrayD::zeros(IxDyn(&[2, 3, 4])), Affine::identity());
        assert!(matches!(s.insert_volume(Key::Image, v), Some(Field::Path(_))));
        let v = s.volume("test", Key::Image).unwrap();
        assert_eq!(v.spatial_shape(), Some([2, 3, 4]));
        assert!(matches!(
            v.view4("test", Key::Image),
            Err(TransformError::Rank {
                expected: 4,
                found: 3,
                ..
            })
        ));
        assert_eq!(s.volumes().count(), 1);
        assert_eq!(s.keys().collect::<Vec<_>>(), vec![Key::Image, Key::Mask]);
    }
}
