#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 提供 3D-IRCADb-01 数据集肝脏血管分割任务的数据加载、预处理与增强流水线.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 该 crate 只适配 3D-IRCADb-01 的 DICOM 目录组织方式 (`PATIENT_DICOM` 与
//!   `MASKS_DICOM/*`), 同时也能读取单个 nii 文件.
//! 2. 所有失败都以 `Result::Err` 报告, 不会自行重试或跳过病例.
//!
//! # 功能
//!
//! ### 体数据读取 ✅
//!
//! DICOM 序列 (按切片位置排序, 换算 HU) 与 nii 文件, 附带体素到世界坐标的仿射变换.
//!
//! 实现位于 `ct-vessel/src/io`.
//!
//! ### 变换流水线 ✅
//!
//! 加载, 通道前置, 标签合并, 前景裁剪, 强度缩放, 方向统一, 重采样,
//! 以及随机缩放/旋转/强度偏移/正负样本子块裁剪.
//!
//! 实现位于 `ct-vessel/src/transforms`.
//!
//! ### 病例划分与缓存数据集 ✅
//!
//! 固定 8 个病例按比例划分训练/验证集, 训练集可再降采样.
//! 确定性前处理结果并行缓存, 可持久化为 npz 文件.
//!
//! 实现位于 `ct-vessel/src/dataset`.
//!
//! # 示例
//!
//! ```no_run
//! use ct_vessel::dataset::load_dataset;
//!
//! let (mut train, _val, _test) = load_dataset("/data/3Dircadb1", 0.8, -1.0).unwrap();
//! for batch in &mut train {
//!     let batch = batch.unwrap();
//!     assert_eq!(batch.image.dim().0, 8);
//! }
//! ```

/// 体数据, 仿射变换与样本.
pub mod data;

pub use data::{Affine, AxCodes, AxisCode, CtWindow, Field, Key, Sample, Volume};

pub mod consts;

pub mod io;

pub mod transforms;

pub mod dataset;
pub mod prelude;
