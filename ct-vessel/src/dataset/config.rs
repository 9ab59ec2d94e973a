use std::path::PathBuf;
use std::str::FromStr;

use super::{home_dataset_dir_with, DatasetError, LabelProportion};
use crate::consts::IRCAD_DIR_PREFIX;

/// 数据集根目录环境变量.
pub const ENV_DIR: &str = "IRCAD_DIR";
/// 训练集占比环境变量.
pub const ENV_SPLIT: &str = "IRCAD_SPLIT";
/// 训练集标签保留比例环境变量.
pub const ENV_LABEL_PROPORTION: &str = "IRCAD_LABEL_PROPORTION";
/// 缓存填充线程数环境变量.
pub const ENV_WORKERS: &str = "IRCAD_WORKERS";
/// 随机种子环境变量.
pub const ENV_SEED: &str = "IRCAD_SEED";

/// 数据集加载配置.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DatasetConfig {
    /// 数据集根目录, 其下为 `3Dircadb1.{id}` 病例目录.
    pub root: PathBuf,

    /// 训练集 (降采样前) 占比, `(0, 1]`.
    pub test_train_split: f64,

    /// 训练集标签保留比例. `-1` 表示不降采样, 否则在 `(0, 1]` 内.
    pub train_label_proportion: f64,

    /// 缓存比例, `[0, 1]`. 缓存前 `floor(n * cache_rate)` 个样本.
    pub cache_rate: f64,

    /// 缓存填充线程数. `None` 表示使用全部 CPU.
    pub num_workers: Option<usize>,

    /// 批大小.
    pub batch_size: usize,

    /// 随机种子. `None` 表示由系统熵初始化.
    pub seed: Option<u64>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            test_train_split: 0.8,
            train_label_proportion: -1.0,
            cache_rate: 1.0,
            num_workers: None,
            batch_size: 1,
            seed: None,
        }
    }
}

/// `{用户主目录}/dataset/3Dircadb1`. 无法获取主目录时退化为相对路径.
fn default_root() -> PathBuf {
    home_dataset_dir_with([IRCAD_DIR_PREFIX]).unwrap_or_else(|| PathBuf::from(IRCAD_DIR_PREFIX))
}

fn parse_env<T: FromStr>(name: &'static str) -> Result<Option<T>, DatasetError> {
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DatasetError::Config { name, value: v }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(v)) => Err(DatasetError::Config {
            name,
            value: v.to_string_lossy().into_owned(),
        }),
    }
}

impl DatasetConfig {
    /// 由环境变量覆盖默认配置:
    ///
    /// - `IRCAD_DIR`: 数据集根目录;
    /// - `IRCAD_SPLIT`: 训练集占比;
    /// - `IRCAD_LABEL_PROPORTION`: 训练集标签保留比例;
    /// - `IRCAD_WORKERS`: 缓存填充线程数;
    /// - `IRCAD_SEED`: 随机种子.
    pub fn from_env() -> Result<Self, DatasetError> {
        let mut config = Self::default();
        if let Some(root) = std::env::var_os(ENV_DIR) {
            config.root = PathBuf::from(root);
        }
        if let Some(v) = parse_env(ENV_SPLIT)? {
            config.test_train_split = v;
        }
        if let Some(v) = parse_env(ENV_LABEL_PROPORTION)? {
            config.train_label_proportion = v;
        }
        if let Some(v) = parse_env(ENV_WORKERS)? {
            config.num_workers = Some(v);
        }
        if let Some(v) = parse_env(ENV_SEED)? {
            config.seed = Some(v);
        }
        config.validate()?;
        Ok(config)
    }

    /// 检查各配置项的取值范围.
    pub fn validate(&self) -> Result<(), DatasetError> {
        let split_ok = 0.0 < self.test_train_split && self.test_train_split <= 1.0;
        if !split_ok || LabelProportion::from_raw(self.train_label_proportion).is_none() {
            return Err(DatasetError::InvalidSplit {
                test_train_split: self.test_train_split,
                train_label_proportion: self.train_label_proportion,
            });
        }
        if !(0.0..=1.0).contains(&self.cache_rate) {
            return Err(DatasetError::Config {
                name: "cache_rate",
                value: self.cache_rate.to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(DatasetError::Config {
                name: "batch_size",
                value: "0".to_string(),
            });
        }
        if self.num_workers == Some(0) {
            return Err(DatasetError::Config {
                name: "num_workers",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// 缓存填充线程数.
    pub fn workers(&self) -> usize {
        self.num_workers.unwrap_or_else(num_cpus::get)
    }
}
