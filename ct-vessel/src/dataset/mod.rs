//! 数据集操作.
//!
//! [`load_dataset`] 按固定病例列表划分训练/验证集, 建立 [`CacheDataset`]
//! 并包装为 [`DataLoader`].

use std::fmt::Formatter;
use std::path::{Path, PathBuf};

use crate::transforms::TransformError;

mod cache;
mod config;
pub mod ircad;
mod loader;
mod npz_cache;

pub use cache::CacheDataset;
pub use config::DatasetConfig;
pub use ircad::{load_dataset, load_dataset_with, FileRecord, LabelProportion, Split};
pub use loader::{Batch, Batches, DataLoader};
pub use npz_cache::{NpzCache, NpzError};

/// 数据集错误.
#[derive(Debug)]
pub enum DatasetError {
    /// 非法的划分参数.
    InvalidSplit {
        /// 训练集 (含被降采样部分) 占比.
        test_train_split: f64,
        /// 训练集标签保留比例.
        train_label_proportion: f64,
    },

    /// 非法的配置项.
    Config {
        /// 配置项名 (环境变量名或字段名).
        name: &'static str,
        /// 非法值.
        value: String,
    },

    /// 第 `index` 个样本变换失败.
    Transform {
        /// 样本索引.
        index: usize,
        /// 底层错误.
        source: TransformError,
    },

    /// 样本索引越界.
    Index {
        /// 请求的索引.
        index: usize,
        /// 数据集长度.
        len: usize,
    },

    /// 无法将样本拼接为批次 (字段缺失或形状不一致).
    Collate(String),

    /// npz 缓存读写错误.
    Npz(NpzError),

    /// 其他底层 I/O 错误.
    Io(std::io::Error),

    /// 创建线程池失败.
    #[cfg(feature = "rayon")]
    ThreadPool(rayon::ThreadPoolBuildError),
}

impl std::fmt::Display for DatasetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetError::InvalidSplit {
                test_train_split,
                train_label_proportion,
            } => write!(
                f,
                "非法的划分参数: test_train_split = {test_train_split}, \
                 train_label_proportion = {train_label_proportion}"
            ),
            DatasetError::Config { name, value } => write!(f, "非法的配置 {name} = `{value}`"),
            DatasetError::Transform { index, source } => {
                write!(f, "第 {index} 个样本变换失败: {source}")
            }
            DatasetError::Index { index, len } => {
                write!(f, "样本索引 {index} 越界 (共 {len} 个样本)")
            }
            DatasetError::Collate(reason) => write!(f, "无法拼接批次: {reason}"),
            DatasetError::Npz(e) => write!(f, "npz 缓存错误: {e}"),
            DatasetError::Io(e) => write!(f, "I/O 错误: {e}"),
            #[cfg(feature = "rayon")]
            DatasetError::ThreadPool(e) => write!(f, "创建线程池失败: {e}"),
        }
    }
}

impl std::error::Error for DatasetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DatasetError::Transform { source, .. } => Some(source),
            DatasetError::Npz(e) => Some(e),
            DatasetError::Io(e) => Some(e),
            #[cfg(feature = "rayon")]
            DatasetError::ThreadPool(e) => Some(e),
            _ => None,
        }
    }
}

impl From<NpzError> for DatasetError {
    fn from(e: NpzError) -> Self {
        DatasetError::Npz(e)
    }
}

impl From<std::io::Error> for DatasetError {
    fn from(e: std::io::Error) -> Self {
        DatasetError::Io(e)
    }
}

#[cfg(feature = "rayon")]
impl From<rayon::ThreadPoolBuildError> for DatasetError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        DatasetError::ThreadPool(e)
    }
}

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}
