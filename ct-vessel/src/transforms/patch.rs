use ndarray::{s, Array3, Array4, ArrayView4, Axis};
use rand::{Rng, RngCore};

use super::{check_spatial, spatial_of, Transform, TransformError, TransformResult};
use crate::consts::gray::is_foreground;
use crate::data::{Field, Key, Sample, Volume};

/// 按正负样本比例随机裁剪固定大小的子块. 一个输入样本产生 `num_samples` 个输出.
///
/// - 正样本中心取自标签 (任一通道) 为前景的体素;
/// - 负样本中心取自标签为背景, 且图像 (任一通道) 大于 `image_threshold` 的体素.
///
/// 子块中心被限制在保证子块完全位于体数据内部的范围内. 空间尺寸小于子块的轴,
/// 会先以 0 居中填充到子块大小. 正样本候选为空时全部按负样本采样, 反之亦然.
///
/// 不在 `keys` 中的字段原样复制到每个输出样本.
#[derive(Clone, Debug)]
pub struct RandCropByPosNegLabel {
    keys: Vec<Key>,
    label_key: Key,
    spatial_size: [usize; 3],
    pos: f64,
    neg: f64,
    num_samples: usize,
    image_key: Option<Key>,
    image_threshold: f32,
}

impl RandCropByPosNegLabel {
    /// 以 `label_key` 为依据, 从 `keys` 中裁剪 `num_samples` 个 `spatial_size` 子块.
    ///
    /// 比例默认为 `pos : neg = 1 : 1`, 且不使用图像筛选负样本.
    pub fn new<I: IntoIterator<Item = Key>>(
        keys: I,
        label_key: Key,
        spatial_size: [usize; 3],
        num_samples: usize,
    ) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            label_key,
            spatial_size: spatial_size.map(|v| v.max(1)),
            pos: 1.0,
            neg: 1.0,
            num_samples,
            image_key: None,
            image_threshold: 0.0,
        }
    }

    /// 设置正负样本比例. 两者必须非负且不同时为 0.
    pub fn with_ratio(mut self, pos: f64, neg: f64) -> Self {
        assert!(
            pos >= 0.0 && neg >= 0.0 && pos + neg > 0.0,
            "非法的正负样本比例 {pos}:{neg}"
        );
        self.pos = pos;
        self.neg = neg;
        self
    }

    /// 负样本中心还须满足 `image > threshold`.
    pub fn with_image(mut self, image_key: Key, threshold: f32) -> Self {
        self.image_key = Some(image_key);
        self.image_threshold = threshold;
        self
    }

    /// 参与填充的字段: `keys`, 以及标签与图像字段.
    fn padded_keys(&self) -> Vec<Key> {
        let mut keys = self.keys.clone();
        for key in std::iter::once(self.label_key).chain(self.image_key) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// 将过小的轴以 0 居中填充到子块大小, 并平移仿射变换.
    fn pad_to_patch(&self, sample: &mut Sample) -> TransformResult<()> {
        for key in self.padded_keys() {
            let volume = sample.volume_mut(self.name(), key)?;
            let data = volume.view4(self.name(), key)?;
            let shape = spatial_of(&data);
            if (0..3).all(|a| shape[a] >= self.spatial_size[a]) {
                continue;
            }
            let target = [0, 1, 2].map(|a| shape[a].max(self.spatial_size[a]));
            let before = [0, 1, 2].map(|a| (target[a] - shape[a]) / 2);
            let channels = data.len_of(Axis(0));
            let mut out = Array4::<f32>::zeros((channels, target[0], target[1], target[2]));
            let [bi, bj, bk] = before;
            out.slice_mut(s![
                ..,
                bi..bi + shape[0],
                bj..bj + shape[1],
                bk..bk + shape[2]
            ])
            .assign(&data);
            let affine = volume.affine().shifted(before.map(|v| -(v as f64)));
            volume.replace(out.into_dyn(), affine);
        }
        Ok(())
    }

    /// 求正负样本中心候选.
    fn candidates(&self, sample: &Sample) -> TransformResult<(Vec<[usize; 3]>, Vec<[usize; 3]>)> {
        let name = self.name();
        let label = sample.volume(name, self.label_key)?.view4(name, self.label_key)?;
        let shape = spatial_of(&label);
        let fg: Array3<bool> =
            label.map_axis(Axis(0), |lane| lane.iter().any(|&p| is_foreground(p)));
        let valid: Option<Array3<bool>> = match self.image_key {
            Some(key) => {
                let image = sample.volume(name, key)?.view4(name, key)?;
                check_spatial(name, key, shape, spatial_of(&image))?;
                let t = self.image_threshold;
                Some(image.map_axis(Axis(0), |lane| lane.iter().any(|&p| p > t)))
            }
            None => None,
        };

        let mut pos = vec![];
        let mut neg = vec![];
        for ((i, j, k), &f) in fg.indexed_iter() {
            if f {
                pos.push([i, j, k]);
            } else if valid.as_ref().map_or(true, |v| v[[i, j, k]]) {
                neg.push([i, j, k]);
            }
        }
        Ok((pos, neg))
    }

    /// 随机生成 `num_samples` 个子块起点.
    fn starts(
        &self,
        shape: [usize; 3],
        pos: &[[usize; 3]],
        neg: &[[usize; 3]],
        rng: &mut dyn RngCore,
    ) -> TransformResult<Vec<[usize; 3]>> {
        if pos.is_empty() && neg.is_empty() {
            return Err(TransformError::NoCandidates { step: self.name() });
        }
        if pos.is_empty() || neg.is_empty() {
            log::warn!(
                "[{}] only {} candidates available ({} pos, {} neg)",
                self.name(),
                if pos.is_empty() { "negative" } else { "positive" },
                pos.len(),
                neg.len()
            );
        }

        let ratio = self.pos / (self.pos + self.neg);
        let mut ans = Vec::with_capacity(self.num_samples);
        for _ in 0..self.num_samples {
            let want_pos = rng.gen::<f64>() < ratio;
            let set = match (want_pos, pos.is_empty(), neg.is_empty()) {
                (true, false, _) | (false, _, true) => pos,
                _ => neg,
            };
            let center = set[rng.gen_range(0..set.len())];
            ans.push([0, 1, 2].map(|a| {
                let half = self.spatial_size[a] / 2;
                center[a]
                    .saturating_sub(half)
                    .min(shape[a] - self.spatial_size[a])
            }));
        }
        Ok(ans)
    }
}

/// 裁剪 `(C, i, j, k)` 数据中以 `start` 为起点的子块.
fn crop_patch(data: ArrayView4<'_, f32>, start: [usize; 3], size: [usize; 3]) -> Array4<f32> {
    let [i, j, k] = start;
    let [si, sj, sk] = size;
    data.slice(s![.., i..i + si, j..j + sj, k..k + sk]).to_owned()
}

impl Transform for RandCropByPosNegLabel {
    fn name(&self) -> &'static str {
        "RandCropByPosNegLabel"
    }

    fn is_random(&self) -> bool {
        true
    }

    fn apply(&self, mut sample: Sample, rng: &mut dyn RngCore) -> TransformResult<Vec<Sample>> {
        let name = self.name();
        let spatial = |s: &Sample, key: Key| -> TransformResult<[usize; 3]> {
            Ok(spatial_of(&s.volume(name, key)?.view4(name, key)?))
        };
        let shape = spatial(&sample, self.label_key)?;
        for &key in &self.keys {
            check_spatial(name, key, shape, spatial(&sample, key)?)?;
        }

        self.pad_to_patch(&mut sample)?;
        let shape = spatial(&sample, self.label_key)?;
        let (pos, neg) = self.candidates(&sample)?;
        let starts = self.starts(shape, &pos, &neg, rng)?;

        let mut out = Vec::with_capacity(starts.len());
        for start in starts {
            let mut patch = Sample::new();
            if let Some(id) = sample.patient() {
                patch = patch.with_patient(id);
            }
            for key in sample.keys() {
                let field = match sample.get(key) {
                    Some(Field::Volume(v)) if self.keys.contains(&key) => {
                        let data = crop_patch(v.view4(name, key)?, start, self.spatial_size);
                        let affine = v.affine().shifted(start.map(|s| s as f64));
                        Field::Volume(Volume::new(data.into_dyn(), affine))
                    }
                    Some(f) => f.clone(),
                    None => continue,
                };
                patch.insert(key, field);
            }
            out.push(patch);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::RandCropByPosNegLabel;
    use crate::data::{Affine, Field, Key};
    use crate::transforms::testing::{array_of, cube_label, rng, sample_of, volume};
    use crate::transforms::{Transform, TransformError};
    use ndarray::Array4;

    fn cropper() -> RandCropByPosNegLabel {
        RandCropByPosNegLabel::new([Key::Image, Key::Label], Key::Label, [48, 48, 48], 8)
            .with_ratio(1.0, 1.0)
            .with_image(Key::Image, -1.0)
    }

    #[test]
    fn test_eight_patches() {
        let label = cube_label(64, 28, 36);
        let image =
            Array4::from_shape_fn((1, 64, 64, 64), |(_, i, j, k)| (i + j + k) as f32 / 192.0);
        let s = sample_of([(Key::Image, image), (Key::Label, label)]).with_patient(9);

        let patches = cropper().apply(s, &mut rng(42)).unwrap();
        assert_eq!(patches.len(), 8);
        for p in &patches {
            assert_eq!(p.patient(), Some(9));
            assert_eq!(array_of(p, Key::Image).dim(), (1, 48, 48, 48));
            assert_eq!(array_of(p, Key::Label).dim(), (1, 48, 48, 48));
        }
    }

    #[test]
    fn test_positive_patches_centered_on_foreground() {
        let label = cube_label(64, 28, 36);
        let s = sample_of([(Key::Image, Array4::zeros((1, 64, 64, 64))), (Key::Label, label)]);
        let step = RandCropByPosNegLabel::new([Key::Image, Key::Label], Key::Label, [48, 48, 48], 8)
            .with_ratio(1.0, 0.0);
        for seed in 0..4 {
            for p in step.apply(s.clone(), &mut rng(seed)).unwrap() {
                let label = array_of(&p, Key::Label);
                assert_eq!(label[[0, 24, 24, 24]], 1.0);
                let origin = p.volume("test", Key::Label).unwrap().affine().origin();
                assert!(origin.iter().all(|&o| (4.0..=16.0).contains(&o)));
            }
        }
    }

    /// 1:1 比例下, 约一半子块以前景为中心.
    #[test]
    fn test_pos_neg_ratio() {
        let label = cube_label(96, 40, 56);
        let s = sample_of([(Key::Image, Array4::zeros((1, 96, 96, 96))), (Key::Label, label)]);
        let step = cropper();
        let (mut positive, mut total) = (0, 0);
        for seed in 0..40 {
            for p in step.apply(s.clone(), &mut rng(seed)).unwrap() {
                total += 1;
                if array_of(&p, Key::Label)[[0, 24, 24, 24]] == 1.0 {
                    positive += 1;
                }
            }
        }
        assert_eq!(total, 320);
        assert!((120..=200).contains(&positive), "{positive} / {total}");
    }

    #[test]
    fn test_small_volume_is_padded() {
        let label = cube_label(30, 10, 12);
        let image = Array4::from_elem((1, 30, 30, 30), 0.5f32);
        let mut s = sample_of([(Key::Label, label)]);
        s.insert_volume(Key::Image, volume(image, Affine::from_spacing([1.0, 1.0, 2.5])));
        s.insert(Key::Mask, Field::Path("/dev/null".into()));

        let patches = cropper().apply(s, &mut rng(3)).unwrap();
        assert_eq!(patches.len(), 8);
        for p in &patches {
            let image = array_of(p, Key::Image);
            assert_eq!(image.dim(), (1, 48, 48, 48));
            // 填充区域为 0, 原数据区域为 0.5.
            assert_eq!(image[[0, 0, 0, 0]], 0.0);
            assert_eq!(image[[0, 24, 24, 24]], 0.5);
            assert_eq!(array_of(p, Key::Label).sum(), 8.0);
            assert!(matches!(p.get(Key::Mask), Some(Field::Path(_))));
            let origin = p.volume("test", Key::Image).unwrap().affine().origin();
            assert_eq!(origin, [-9.0, -9.0, -22.5]);
        }
    }

    #[test]
    fn test_no_foreground_falls_back_to_negative() {
        let s = sample_of([
            (Key::Image, Array4::from_elem((1, 50, 50, 50), 0.2)),
            (Key::Label, Array4::zeros((1, 50, 50, 50))),
        ]);
        let patches = cropper().apply(s, &mut rng(0)).unwrap();
        assert_eq!(patches.len(), 8);

        // 图像全部不大于阈值且无前景.
        let s = sample_of([
            (Key::Image, Array4::from_elem((1, 50, 50, 50), -1.0)),
            (Key::Label, Array4::zeros((1, 50, 50, 50))),
        ]);
        assert!(matches!(
            cropper().apply(s, &mut rng(0)),
            Err(TransformError::NoCandidates { .. })
        ));
    }

    #[test]
    fn test_seeded_crop_is_reproducible() {
        let label = cube_label(56, 20, 30);
        let image = Array4::from_shape_fn((1, 56, 56, 56), |(_, i, j, k)| (i * j + k) as f32);
        let s = sample_of([(Key::Image, image), (Key::Label, label)]);
        let a = cropper().apply(s.clone(), &mut rng(5)).unwrap();
        let b = cropper().apply(s, &mut rng(5)).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(array_of(x, Key::Image), array_of(y, Key::Image));
        }
    }
}
