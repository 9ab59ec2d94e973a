//! 通用常量.

/// 单通道标签值.
pub mod gray {
    /// 标签中背景体素的值.
    pub const LABEL_BACKGROUND: f32 = 0.0;

    /// 标签中前景 (血管) 体素的值.
    pub const LABEL_FOREGROUND: f32 = 1.0;

    /// 体素是否是前景?
    ///
    /// IRCAD 的 DICOM 掩膜以 255 表示前景, 因此这里按 `> 0` 判断, 而不是 `== 1`.
    #[inline]
    pub fn is_foreground(p: f32) -> bool {
        p > LABEL_BACKGROUND
    }

    /// 体素是否是背景?
    #[inline]
    pub fn is_background(p: f32) -> bool {
        !is_foreground(p)
    }
}

/// 3D-IRCADb-01 中同时具有静脉系统与动脉掩膜的病例编号, 按固定顺序排列.
pub const IRCAD_PATIENTS: [u32; 8] = [1, 4, 5, 6, 7, 8, 9, 17];

/// 可用病例总数.
pub const IRCAD_PATIENTS_LEN: usize = IRCAD_PATIENTS.len();

/// 病例目录名前缀. 病例目录形如 `3Dircadb1.{id}`.
pub const IRCAD_DIR_PREFIX: &str = "3Dircadb1";

/// 病例目录下 CT 扫描 DICOM 序列的相对路径.
pub const PATIENT_DICOM: &str = "PATIENT_DICOM";

/// 病例目录下掩膜 DICOM 序列的父目录.
pub const MASKS_DICOM: &str = "MASKS_DICOM";

/// 静脉系统掩膜目录 (主标签).
pub const MASK_VENOUS: &str = "venoussystem";

/// 动脉掩膜目录 (次标签, 会被并入主标签).
pub const MASK_ARTERY: &str = "artery";

/// 肝脏掩膜目录 (初次裁剪使用的 ROI).
pub const MASK_LIVER: &str = "liver";

/// 血管增强期腹部 CT 强度窗口下限 (HU).
pub const VESSEL_HU_MIN: f32 = -100.0;

/// 血管增强期腹部 CT 强度窗口上限 (HU).
pub const VESSEL_HU_MAX: f32 = 371.0;

/// 重采样目标体素分辨率, 以毫米为单位, 按 `(i, j, k)` 排列.
pub const TARGET_SPACING: [f64; 3] = [1.0, 1.0, 2.5];

/// 训练子块的空间大小.
pub const PATCH_SIZE: [usize; 3] = [48, 48, 48];

/// 每个训练样本裁剪出的子块数.
pub const PATCHES_PER_SAMPLE: usize = 8;
