use ndarray::{Axis, Zip};
use rand::RngCore;

use super::{check_spatial, spatial_of, Transform, TransformResult};
use crate::consts::gray::{is_foreground, LABEL_BACKGROUND, LABEL_FOREGROUND};
use crate::data::{Key, Sample};

/// 将次标签并入主标签: 主标签或次标签为前景的位置置 1, 其余置 0.
///
/// IRCAD 掩膜以 255 表示前景, 因此任何正值都视为前景.
/// 对于固定的次标签, 该操作是幂等的.
#[derive(Clone, Debug)]
pub struct MergeLabel {
    target: Key,
    source: Key,
    discard_source: bool,
}

impl MergeLabel {
    /// 将 `source` 合并进 `target`. 默认保留 `source` 字段.
    pub fn new(target: Key, source: Key) -> Self {
        Self {
            target,
            source,
            discard_source: false,
        }
    }

    /// 合并后移除 `source` 字段.
    pub fn discard_source(mut self) -> Self {
        self.discard_source = true;
        self
    }
}

impl Transform for MergeLabel {
    fn name(&self) -> &'static str {
        "MergeLabel"
    }

    fn apply(&self, mut sample: Sample, _: &mut dyn RngCore) -> TransformResult<Vec<Sample>> {
        let name = self.name();
        // 次标签有多个通道时, 取各通道的并集.
        let (found, merged) = {
            let source = sample.volume(name, self.source)?.view4(name, self.source)?;
            let merged = source.map_axis(Axis(0), |lane| lane.iter().any(|&p| is_foreground(p)));
            (spatial_of(&source), merged)
        };
        let target = sample.volume_mut(name, self.target)?;
        let mut target = target.view4_mut(name, self.target)?;
        check_spatial(name, self.source, spatial_of(&target), found)?;

        for mut channel in target.outer_iter_mut() {
            Zip::from(&mut channel).and(&merged).for_each(|t, &s| {
                *t = if s || is_foreground(*t) {
                    LABEL_FOREGROUND
                } else {
                    LABEL_BACKGROUND
                };
            });
        }

        if self.discard_source {
            sample.remove(self.source);
        }
        Ok(vec![sample])
    }
}

#[cfg(test)]
mod tests {
    use super::MergeLabel;
    use crate::data::Key;
    use crate::transforms::testing::{array_of, rng, sample_of};
    use crate::transforms::{Transform, TransformError};
    use ndarray::Array4;

    fn labels() -> (Array4<f32>, Array4<f32>) {
        let mut venous = Array4::zeros((1, 4, 4, 2));
        let mut artery = Array4::zeros((1, 4, 4, 2));
        venous[[0, 0, 0, 0]] = 255.0;
        venous[[0, 1, 1, 1]] = 255.0;
        artery[[0, 1, 1, 1]] = 255.0;
        artery[[0, 3, 2, 0]] = 255.0;
        (venous, artery)
    }

    #[test]
    fn test_merge_union() {
        let (venous, artery) = labels();
        let s = sample_of([(Key::Label, venous), (Key::Label2, artery)]);
        let out = MergeLabel::new(Key::Label, Key::Label2)
            .apply(s, &mut rng(0))
            .unwrap()
            .remove(0);
        let merged = array_of(&out, Key::Label);
        assert_eq!(merged.sum(), 3.0);
        assert_eq!(merged[[0, 0, 0, 0]], 1.0);
        assert_eq!(merged[[0, 1, 1, 1]], 1.0);
        assert_eq!(merged[[0, 3, 2, 0]], 1.0);
        assert!(merged.iter().all(|&v| v == 0.0 || v == 1.0));
        assert!(out.contains(Key::Label2));
    }

    #[test]
    fn test_merge_idempotent() {
        let (venous, artery) = labels();
        let s = sample_of([(Key::Label, venous), (Key::Label2, artery)]);
        let step = MergeLabel::new(Key::Label, Key::Label2);
        let once = step.apply(s, &mut rng(0)).unwrap().remove(0);
        let twice = step.apply(once.clone(), &mut rng(0)).unwrap().remove(0);
        assert_eq!(array_of(&once, Key::Label), array_of(&twice, Key::Label));

        let dropped = step
            .clone()
            .discard_source()
            .apply(twice, &mut rng(0))
            .unwrap()
            .remove(0);
        assert!(!dropped.contains(Key::Label2));
    }

    #[test]
    fn test_merge_shape_mismatch() {
        let s = sample_of([
            (Key::Label, Array4::zeros((1, 4, 4, 2))),
            (Key::Label2, Array4::zeros((1, 4, 4, 3))),
        ]);
        assert!(matches!(
            MergeLabel::new(Key::Label, Key::Label2).apply(s, &mut rng(0)),
            Err(TransformError::ShapeMismatch { .. })
        ));
    }
}
