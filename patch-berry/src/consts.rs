//! 通用常量.

/// 规范字段名. 整个系统只使用这一套命名.
pub mod field {
    /// PET 体数据.
    pub const PET: &str = "PET";

    /// CT 体数据.
    pub const CT: &str = "CT";

    /// PET 与 CT 按通道堆叠的多通道体数据.
    pub const PET_CT: &str = "PET-CT";

    /// GTV 标签体数据.
    pub const GTV_LABELMAP: &str = "GTV-labelmap";
}

/// 标签体素值.
pub mod gray {
    /// 背景的体素值.
    pub const BACKGROUND: u8 = 0;

    /// GTV (肿瘤区域) 的体素值.
    pub const GTV: u8 = 1;

    /// 体素是否是 GTV?
    #[inline]
    pub const fn is_gtv(p: u8) -> bool {
        matches!(p, GTV)
    }

    /// 体素是否是背景?
    #[inline]
    pub const fn is_background(p: u8) -> bool {
        matches!(p, BACKGROUND)
    }
}

/// HECKTOR 数据集 nifti 文件名后缀. 完整文件名为 `{patient_id}{suffix}`.
pub mod nii_suffix {
    /// PET 扫描.
    pub const PET: &str = "_pt.nii.gz";

    /// CT 扫描.
    pub const CT: &str = "_ct.nii.gz";

    /// GTV 标签.
    pub const GTV: &str = "_ct_gtvt.nii.gz";
}

/// npz 归档中的数组名后缀. 完整数组名为 `{patient_id}{suffix}`.
pub mod npy_suffix {
    /// PET 扫描.
    pub const PET: &str = "_pt.npy";

    /// CT 扫描.
    pub const CT: &str = "_ct.npy";

    /// GTV 标签.
    pub const GTV: &str = "_gtv.npy";
}

/// 多通道表示中 PET 所在通道.
pub const CHANNEL_PET: usize = 0;

/// 多通道表示中 CT 所在通道.
pub const CHANNEL_CT: usize = 1;

/// 并发加载 subject 的 worker 个数上限.
pub const MAX_WORKERS: usize = 64;
