use ndarray::{s, Array3, ArrayView4, Axis};
use rand::RngCore;

use super::{check_spatial, spatial_of, Transform, TransformError, TransformResult};
use crate::consts::gray::is_foreground;
use crate::data::{Key, Sample};

/// 三维包围盒, 左闭右开.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BBox {
    /// 各轴起点 (含).
    pub start: [usize; 3],
    /// 各轴终点 (不含).
    pub end: [usize; 3],
}

impl BBox {
    /// 包围盒形状.
    #[inline]
    pub fn shape(&self) -> [usize; 3] {
        [0, 1, 2].map(|a| self.end[a] - self.start[a])
    }

    /// 包围盒体素数.
    #[inline]
    pub fn volume(&self) -> usize {
        self.shape().iter().product()
    }

    /// `index` 是否在包围盒内?
    #[inline]
    pub fn contains(&self, index: [usize; 3]) -> bool {
        (0..3).all(|a| (self.start[a]..self.end[a]).contains(&index[a]))
    }
}

/// 求 `(C, i, j, k)` 数据中前景 (任一通道 `> 0`) 的包围盒. 全为背景时返回 `None`.
pub fn foreground_bbox(data: ArrayView4<'_, f32>) -> Option<BBox> {
    let mask: Array3<bool> = data.map_axis(Axis(0), |lane| lane.iter().any(|&p| is_foreground(p)));
    let mut start = [0; 3];
    let mut end = [0; 3];
    for axis in 0..3 {
        let mut planes = mask.axis_iter(Axis(axis));
        start[axis] = planes.position(|p| p.iter().any(|&b| b))?;
        let mut planes = mask.axis_iter(Axis(axis));
        end[axis] = planes.rposition(|p| p.iter().any(|&b| b))? + 1;
    }
    Some(BBox { start, end })
}

/// 按 `source` 字段的前景包围盒裁剪 `keys` 中的所有字段.
///
/// 所有字段的空间形状必须与 `source` 一致. 仿射变换随裁剪起点平移.
#[derive(Clone, Debug)]
pub struct CropForeground {
    keys: Vec<Key>,
    source: Key,
    discard_source: bool,
}

impl CropForeground {
    /// 依据 `source` 裁剪 `keys`. 默认保留 `source` 字段.
    pub fn new<I: IntoIterator<Item = Key>>(keys: I, source: Key) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            source,
            discard_source: false,
        }
    }

    /// 裁剪后移除 `source` 字段. `source` 同时出现在 `keys` 中时无效.
    pub fn discard_source(mut self) -> Self {
        self.discard_source = true;
        self
    }
}

impl Transform for CropForeground {
    fn name(&self) -> &'static str {
        "CropForeground"
    }

    fn apply(&self, mut sample: Sample, _: &mut dyn RngCore) -> TransformResult<Vec<Sample>> {
        let name = self.name();
        let (expected, bbox) = {
            let source = sample.volume(name, self.source)?.view4(name, self.source)?;
            let bbox = foreground_bbox(source.view()).ok_or(TransformError::EmptyForeground {
                step: name,
                key: self.source,
            })?;
            (spatial_of(&source), bbox)
        };

        for &key in &self.keys {
            let volume = sample.volume_mut(name, key)?;
            let data = volume.view4(name, key)?;
            check_spatial(name, key, expected, spatial_of(&data))?;
            let ([i0, j0, k0], [i1, j1, k1]) = (bbox.start, bbox.end);
            let cropped = data.slice(s![.., i0..i1, j0..j1, k0..k1]).to_owned();
            let affine = volume.affine().shifted(bbox.start.map(|v| v as f64));
            volume.replace(cropped.into_dyn(), affine);
        }
        log::debug!("cropped to {:?} by `{}`", bbox, self.source);

        if self.discard_source && !self.keys.contains(&self.source) {
            sample.remove(self.source);
        }
        Ok(vec![sample])
    }
}

#[cfg(test)]
mod tests {
    use super::{foreground_bbox, BBox, CropForeground};
    use crate::data::{Affine, Key};
    use crate::transforms::testing::{array_of, cube_label, rng, sample_of, volume};
    use crate::transforms::{Transform, TransformError};
    use ndarray::Array4;

    #[test]
    fn test_bbox() {
        let mut a = Array4::<f32>::zeros((2, 6, 5, 4));
        assert_eq!(foreground_bbox(a.view()), None);
        a[[0, 1, 2, 3]] = 1.0;
        a[[1, 4, 0, 1]] = 255.0;
        let bbox = foreground_bbox(a.view()).unwrap();
        assert_eq!(
            bbox,
            BBox {
                start: [1, 0, 1],
                end: [5, 3, 4]
            }
        );
        assert_eq!(bbox.shape(), [4, 3, 3]);
        assert_eq!(bbox.volume(), 36);
        assert!(bbox.contains([1, 2, 3]));
        assert!(!bbox.contains([5, 2, 3]));

        // 负值不是前景.
        let b = Array4::<f32>::from_elem((1, 2, 2, 2), -1.0);
        assert_eq!(foreground_bbox(b.view()), None);
    }

    #[test]
    fn test_crop_by_mask() {
        let image = Array4::from_shape_fn((1, 8, 8, 8), |(_, i, j, k)| (i * 64 + j * 8 + k) as f32);
        let mut s = sample_of([
            (Key::Label, cube_label(8, 3, 5)),
            (Key::Mask, cube_label(8, 2, 6)),
        ]);
        s.insert_volume(Key::Image, volume(image, Affine::from_spacing([0.5, 0.5, 2.0])));

        let out = CropForeground::new([Key::Image, Key::Label], Key::Mask)
            .discard_source()
            .apply(s, &mut rng(0))
            .unwrap()
            .remove(0);
        assert!(!out.contains(Key::Mask));

        let image = array_of(&out, Key::Image);
        assert_eq!(image.dim(), (1, 4, 4, 4));
        assert_eq!(image[[0, 0, 0, 0]], (2 * 64 + 2 * 8 + 2) as f32);
        assert_eq!(array_of(&out, Key::Label).sum(), 8.0);

        let affine = out.volume("test", Key::Image).unwrap().affine();
        assert_eq!(affine.origin(), [1.0, 1.0, 4.0]);
        assert_eq!(affine.spacing(), [0.5, 0.5, 2.0]);
    }

    #[test]
    fn test_crop_errors() {
        let s = sample_of([
            (Key::Image, Array4::zeros((1, 4, 4, 4))),
            (Key::Mask, Array4::zeros((1, 4, 4, 4))),
        ]);
        let step = CropForeground::new([Key::Image], Key::Mask);
        assert!(matches!(
            step.apply(s, &mut rng(0)),
            Err(TransformError::EmptyForeground { key: Key::Mask, .. })
        ));

        let s = sample_of([
            (Key::Image, Array4::zeros((1, 4, 4, 3))),
            (Key::Mask, cube_label(4, 1, 2)),
        ]);
        assert!(matches!(
            step.apply(s, &mut rng(0)),
            Err(TransformError::ShapeMismatch { key: Key::Image, .. })
        ));
    }
}
