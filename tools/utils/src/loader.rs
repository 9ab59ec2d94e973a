//! 对 `ct-vessel::dataset` 的更一层封装. 提供更直接的数据集加载器.

use ct_vessel::dataset::{self, DataLoader, DatasetConfig, DatasetError};
use std::env;
use std::path::PathBuf;

/// 获取 IRCAD 数据集根目录.
///
/// 1. 若环境变量 `$IRCAD_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/3Dircadb1`;
/// 3. 无法获取主目录时返回相对路径 `3Dircadb1`.
pub fn dataset_dir_from_env_or_home() -> PathBuf {
    match env::var_os("IRCAD_DIR") {
        Some(d) if !d.is_empty() => PathBuf::from(d),
        _ => DatasetConfig::default().root,
    }
}

/// 由环境变量读取完整配置, 见 [`DatasetConfig::from_env`].
#[inline]
pub fn config_from_env_or_home() -> Result<DatasetConfig, DatasetError> {
    DatasetConfig::from_env()
}

/// 从 `$IRCAD_DIR` 或者 `$HOME/dataset/3Dircadb1` 加载 `(train, val, test)` 加载器.
pub fn loaders_from_env_or_home() -> Result<(DataLoader, DataLoader, DataLoader), DatasetError> {
    let config = config_from_env_or_home()?;
    dataset::load_dataset_with(&config)
}
