use ndarray::Axis;
use rand::RngCore;

use super::{Transform, TransformError, TransformResult};
use crate::data::{Field, Key, Sample};
use crate::io::load_volume;

/// 将路径字段加载为体数据. 已加载的字段保持不变.
#[derive(Clone, Debug)]
pub struct LoadImage {
    keys: Vec<Key>,
}

impl LoadImage {
    /// 加载 `keys` 中的所有字段.
    pub fn new<I: IntoIterator<Item = Key>>(keys: I) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }
}

impl Transform for LoadImage {
    fn name(&self) -> &'static str {
        "LoadImage"
    }

    fn apply(&self, mut sample: Sample, _: &mut dyn RngCore) -> TransformResult<Vec<Sample>> {
        for &key in &self.keys {
            let path = match sample.get(key) {
                Some(Field::Path(p)) => p.clone(),
                Some(Field::Volume(_)) => continue,
                None => {
                    return Err(TransformError::MissingKey {
                        step: self.name(),
                        key,
                    })
                }
            };
            let volume = load_volume(&path).map_err(|source| TransformError::Load { key, source })?;
            log::debug!(
                "loaded `{key}` from `{}`: shape {:?}, spacing {:?}",
                path.display(),
                volume.data().shape(),
                volume.spacing()
            );
            sample.insert_volume(key, volume);
        }
        Ok(vec![sample])
    }
}

/// 在最前面插入通道维.
///
/// - 3 维 `(i, j, k)` 数据变为 `(1, i, j, k)`;
/// - 4 维 `(i, j, k, c)` 数据 (多分量 NIfTI) 变为 `(c, i, j, k)`.
#[derive(Clone, Debug)]
pub struct EnsureChannelFirst {
    keys: Vec<Key>,
}

impl EnsureChannelFirst {
    /// 处理 `keys` 中的所有字段.
    pub fn new<I: IntoIterator<Item = Key>>(keys: I) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }
}

impl Transform for EnsureChannelFirst {
    fn name(&self) -> &'static str {
        "EnsureChannelFirst"
    }

    fn apply(&self, mut sample: Sample, _: &mut dyn RngCore) -> TransformResult<Vec<Sample>> {
        for &key in &self.keys {
            let volume = sample.volume_mut(self.name(), key)?;
            let data = std::mem::take(volume.data_mut());
            let data = match data.ndim() {
                3 => data.insert_axis(Axis(0)),
                4 => data.permuted_axes(vec![3, 0, 1, 2]).as_standard_layout().into_owned(),
                found => {
                    *volume.data_mut() = data;
                    return Err(TransformError::Rank {
                        step: self.name(),
                        key,
                        expected: 3,
                        found,
                    });
                }
            };
            *volume.data_mut() = data;
        }
        Ok(vec![sample])
    }
}

#[cfg(test)]
mod tests {
    use super::{EnsureChannelFirst, LoadImage};
    use crate::data::{Affine, Field, Key, Sample, Volume};
    use crate::io::LoadError;
    use crate::transforms::testing::rng;
    use crate::transforms::{Transform, TransformError};
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_load_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let s = Sample::from_paths(Some(1), [(Key::Image, dir.path().join("PATIENT_DICOM"))]);
        let err = LoadImage::new([Key::Image])
            .apply(s, &mut rng(0))
            .unwrap_err();
        match err {
            TransformError::Load { key, source } => {
                assert_eq!(key, Key::Image);
                assert!(source.is_not_found());
                assert!(matches!(source, LoadError::Io { .. }));
            }
            e => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_load_keeps_volume_and_reports_missing() {
        let mut s = Sample::new();
        let v = Volume::new(ArrayD::zeros(IxDyn(&[2, 2, 2])), Affine::identity());
        s.insert_volume(Key::Image, v);
        let out = LoadImage::new([Key::Image])
            .apply(s.clone(), &mut rng(0))
            .unwrap();
        assert!(matches!(out[0].get(Key::Image), Some(Field::Volume(_))));

        let err = LoadImage::new([Key::Image, Key::Label])
            .apply(s, &mut rng(0))
            .unwrap_err();
        assert!(matches!(
            err,
            TransformError::MissingKey {
                key: Key::Label,
                ..
            }
        ));
    }

    #[test]
    fn test_ensure_channel_first() {
        let mut s = Sample::new();
        s.insert_volume(
            Key::Image,
            Volume::new(ArrayD::zeros(IxDyn(&[4, 5, 6])), Affine::identity()),
        );
        let mut multi = ArrayD::<f32>::zeros(IxDyn(&[4, 5, 6, 2]));
        multi[&[1, 2, 3, 1][..]] = 7.0;
        s.insert_volume(Key::Label, Volume::new(multi, Affine::identity()));

        let step = EnsureChannelFirst::new([Key::Image, Key::Label]);
        let out = step.apply(s, &mut rng(0)).unwrap().remove(0);
        let image = out.volume("test", Key::Image).unwrap();
        assert_eq!(image.data().shape(), &[1, 4, 5, 6]);
        let label = out.volume("test", Key::Label).unwrap();
        assert_eq!(label.data().shape(), &[2, 4, 5, 6]);
        assert_eq!(label.data()[&[1, 1, 2, 3][..]], 7.0);

        let mut s = Sample::new();
        s.insert_volume(
            Key::Image,
            Volume::new(ArrayD::zeros(IxDyn(&[4, 5])), Affine::identity()),
        );
        assert!(matches!(
            step.apply(s, &mut rng(0)),
            Err(TransformError::Rank { found: 2, .. })
        ));
    }
}
