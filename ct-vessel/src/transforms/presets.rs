//! 预定义的训练/验证变换流水线.

use std::sync::Arc;

use once_cell::sync::Lazy;

use super::{
    Compose, CropForeground, EnsureChannelFirst, Interpolation, LoadImage, MergeLabel,
    Orientation, RandCropByPosNegLabel, RandRotate90, RandShiftIntensity, RandZoom,
    ScaleIntensityRange, Spacing,
};
use crate::consts::{PATCHES_PER_SAMPLE, PATCH_SIZE, TARGET_SPACING};
use crate::data::{AxCodes, CtWindow, Key};

/// 全局共享的训练流水线.
pub static TRAIN_TRANSFORMS_AUG: Lazy<Arc<Compose>> =
    Lazy::new(|| Arc::new(train_transforms_aug()));

/// 全局共享的验证流水线.
pub static VAL_TRANSFORMS: Lazy<Arc<Compose>> = Lazy::new(|| Arc::new(val_transforms()));

const IMAGE_LABEL: [Key; 2] = [Key::Image, Key::Label];

/// 训练与验证共用的确定性前处理.
fn preprocess() -> Compose {
    Compose::new()
        .then(LoadImage::new(Key::ALL))
        .then(EnsureChannelFirst::new(Key::ALL))
        .then(MergeLabel::new(Key::Label, Key::Label2).discard_source())
        .then(CropForeground::new(IMAGE_LABEL, Key::Mask).discard_source())
        .then(ScaleIntensityRange::new(
            [Key::Image],
            CtWindow::from_vessel_contrast(),
        ))
        .then(ScaleIntensityRange::new([Key::Label], CtWindow::unit()))
        .then(Orientation::new(IMAGE_LABEL, AxCodes::RAS))
        .then(CropForeground::new(IMAGE_LABEL, Key::Image))
        .then(Spacing::new(
            IMAGE_LABEL,
            TARGET_SPACING,
            [Interpolation::Bilinear, Interpolation::Nearest],
        ))
}

/// 构建训练流水线: 前处理, 随机缩放/旋转/强度偏移, 最后按正负样本 1:1 裁剪 8 个 48^3 子块.
pub fn train_transforms_aug() -> Compose {
    preprocess()
        .then(RandZoom::new(
            IMAGE_LABEL,
            0.2,
            1.0,
            1.5,
            [Interpolation::Area, Interpolation::Nearest],
        ))
        .then(RandRotate90::new(IMAGE_LABEL, 0.1, 3, (0, 1)))
        .then(RandShiftIntensity::new([Key::Image], 0.05, 0.2))
        .then(
            RandCropByPosNegLabel::new(IMAGE_LABEL, Key::Label, PATCH_SIZE, PATCHES_PER_SAMPLE)
                .with_ratio(1.0, 1.0)
                .with_image(Key::Image, -1.0),
        )
}

/// 构建验证流水线: 仅前处理, 输出完整体数据.
pub fn val_transforms() -> Compose {
    preprocess()
}
