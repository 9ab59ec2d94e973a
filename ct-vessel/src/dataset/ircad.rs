//! 3D-IRCADb-01 病例划分与文件索引.
//!
//! 数据集目录结构:
//!
//! ```text
//! {root}/3Dircadb1.{id}/PATIENT_DICOM/
//! {root}/3Dircadb1.{id}/MASKS_DICOM/venoussystem/
//! {root}/3Dircadb1.{id}/MASKS_DICOM/liver/
//! {root}/3Dircadb1.{id}/MASKS_DICOM/artery/
//! ```
//!
//! 划分时不检查目录是否存在; 缺失的目录在首次加载时以 `LoadError` 报告.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{CacheDataset, DataLoader, DatasetConfig, DatasetError};
use crate::consts::{
    IRCAD_DIR_PREFIX, IRCAD_PATIENTS, IRCAD_PATIENTS_LEN, MASKS_DICOM, MASK_ARTERY, MASK_LIVER,
    MASK_VENOUS, PATIENT_DICOM,
};
use crate::data::{Key, Sample};
use crate::io::LoadError;
use crate::transforms::{TRAIN_TRANSFORMS_AUG, VAL_TRANSFORMS};

/// 训练集标签保留比例.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LabelProportion {
    /// 不降采样. 对应原始参数 `-1`.
    Full,

    /// 仅保留训练集前 `floor(n * split * p)` 个病例, `p` 在 `(0, 1]` 内.
    Fraction(f64),
}

impl LabelProportion {
    /// 由原始参数构建: `-1` 表示不降采样, 否则必须在 `(0, 1]` 内.
    pub fn from_raw(p: f64) -> Option<Self> {
        if p == -1.0 {
            Some(Self::Full)
        } else if 0.0 < p && p <= 1.0 {
            Some(Self::Fraction(p))
        } else {
            None
        }
    }

    /// 还原为原始参数.
    #[inline]
    pub fn as_raw(&self) -> f64 {
        match self {
            Self::Full => -1.0,
            Self::Fraction(p) => *p,
        }
    }
}

/// 训练/验证病例划分.
///
/// 验证集总是从未降采样的边界 `floor(n * split)` 开始, 因此降采样后两者之间可能有空隙.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Split {
    /// 训练病例编号.
    pub train: Vec<u32>,
    /// 验证病例编号.
    pub val: Vec<u32>,
}

impl Split {
    /// 划分固定的 8 个病例.
    pub fn new(test_train_split: f64, train_label_proportion: f64) -> Result<Self, DatasetError> {
        Self::of(&IRCAD_PATIENTS, test_train_split, train_label_proportion)
    }

    /// 划分 `patients`. `test_train_split` 必须在 `(0, 1]` 内.
    pub fn of(
        patients: &[u32],
        test_train_split: f64,
        train_label_proportion: f64,
    ) -> Result<Self, DatasetError> {
        let invalid = || DatasetError::InvalidSplit {
            test_train_split,
            train_label_proportion,
        };
        if !(0.0 < test_train_split && test_train_split <= 1.0) {
            return Err(invalid());
        }
        let proportion = LabelProportion::from_raw(train_label_proportion).ok_or_else(invalid)?;

        let n = patients.len() as f64;
        let boundary = ((n * test_train_split) as usize).min(patients.len());
        let train_len = match proportion {
            LabelProportion::Full => boundary,
            LabelProportion::Fraction(p) => ((n * test_train_split * p) as usize).min(boundary),
        };
        Ok(Self {
            train: patients[..train_len].to_vec(),
            val: patients[boundary..].to_vec(),
        })
    }
}

/// 单个病例的四个字段路径. 四个路径都属于同一个病例.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct FileRecord {
    patient: u32,
    image: PathBuf,
    label: PathBuf,
    mask: PathBuf,
    label2: PathBuf,
}

impl FileRecord {
    /// 由数据集根目录与病例编号构建.
    pub fn from_patient<P: AsRef<Path>>(root: P, patient: u32) -> Self {
        let mut dir = root.as_ref().to_owned();
        dir.push(format!("{IRCAD_DIR_PREFIX}.{patient}"));
        let masks = dir.join(MASKS_DICOM);
        Self {
            patient,
            image: dir.join(PATIENT_DICOM),
            label: masks.join(MASK_VENOUS),
            mask: masks.join(MASK_LIVER),
            label2: masks.join(MASK_ARTERY),
        }
    }

    /// 病例编号.
    #[inline]
    pub fn patient(&self) -> u32 {
        self.patient
    }

    /// 获取字段路径.
    #[inline]
    pub fn path(&self, key: Key) -> &Path {
        match key {
            Key::Image => &self.image,
            Key::Label => &self.label,
            Key::Mask => &self.mask,
            Key::Label2 => &self.label2,
        }
    }

    /// 按 `image, label, mask, label2` 顺序获取所有字段路径.
    pub fn paths(&self) -> [(Key, &Path); 4] {
        Key::ALL.map(|k| (k, self.path(k)))
    }

    /// 转换为未加载的样本.
    pub fn to_sample(&self) -> Sample {
        Sample::from_paths(Some(self.patient), self.paths())
    }

    /// 检查四个目录是否都存在. 返回第一个缺失目录的错误.
    ///
    /// [`load_dataset`] 不会调用它.
    pub fn check_exists(&self) -> Result<(), LoadError> {
        for (_, p) in self.paths() {
            std::fs::metadata(p).map_err(|source| LoadError::Io {
                path: p.to_owned(),
                source,
            })?;
        }
        Ok(())
    }
}

/// 为 `patients` 中的每个病例构建文件记录.
pub fn records<P: AsRef<Path>>(root: P, patients: &[u32]) -> Vec<FileRecord> {
    patients
        .iter()
        .map(|&id| FileRecord::from_patient(root.as_ref(), id))
        .collect()
}

/// 加载 IRCAD 数据集, 返回 `(train_loader, val_loader, test_loader)`.
///
/// - 训练集使用 [`TRAIN_TRANSFORMS_AUG`], 每轮打乱;
/// - 验证集使用 [`VAL_TRANSFORMS`], 固定顺序;
/// - 测试加载器与验证加载器共享同一个数据集.
///
/// 两个数据集都会立即缓存全部样本的确定性部分, 因此缺失的目录在这里就会报错.
pub fn load_dataset<P: AsRef<Path>>(
    root: P,
    test_train_split: f64,
    train_label_proportion: f64,
) -> Result<(DataLoader, DataLoader, DataLoader), DatasetError> {
    let config = DatasetConfig {
        root: root.as_ref().to_owned(),
        test_train_split,
        train_label_proportion,
        ..DatasetConfig::default()
    };
    load_dataset_with(&config)
}

/// 按 `config` 加载 IRCAD 数据集. 见 [`load_dataset`].
pub fn load_dataset_with(
    config: &DatasetConfig,
) -> Result<(DataLoader, DataLoader, DataLoader), DatasetError> {
    config.validate()?;
    let split = Split::new(config.test_train_split, config.train_label_proportion)?;
    log::info!(
        "IRCAD split: train {:?}, val {:?} (of {IRCAD_PATIENTS_LEN})",
        split.train,
        split.val
    );

    let train_ds = CacheDataset::new(
        records(&config.root, &split.train),
        Arc::clone(&*TRAIN_TRANSFORMS_AUG),
        config.cache_rate,
        config.num_workers,
    )?;
    let val_ds = Arc::new(CacheDataset::new(
        records(&config.root, &split.val),
        Arc::clone(&*VAL_TRANSFORMS),
        config.cache_rate,
        config.num_workers,
    )?);

    let mut train = DataLoader::new(Arc::new(train_ds), config.batch_size, true);
    let mut val = DataLoader::new(Arc::clone(&val_ds), config.batch_size, false);
    let mut test = DataLoader::new(val_ds, config.batch_size, false);
    if let Some(seed) = config.seed {
        train = train.with_seed(seed);
        val = val.with_seed(seed.wrapping_add(1));
        test = test.with_seed(seed.wrapping_add(2));
    }
    Ok((train, val, test))
}
