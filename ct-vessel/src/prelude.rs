//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::data::{Affine, AxCodes, CtWindow, Field, Key, Sample, Volume};

pub use crate::consts::gray::{LABEL_BACKGROUND, LABEL_FOREGROUND};
pub use crate::consts::{IRCAD_PATIENTS, PATCH_SIZE, TARGET_SPACING};

pub use crate::io::{load_volume, LoadError};

pub use crate::transforms::{
    train_transforms_aug, val_transforms, Compose, Transform, TransformError,
    TRAIN_TRANSFORMS_AUG, VAL_TRANSFORMS,
};

pub use crate::dataset::home_dataset_dir_with;
pub use crate::dataset::{
    self, load_dataset, Batch, CacheDataset, DataLoader, DatasetConfig, DatasetError,
};
