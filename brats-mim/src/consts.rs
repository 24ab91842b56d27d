//! 通用常量.

/// 剪裁后每个病人保留的切片数量 (深度).
pub const DEFAULT_SLICE_DEEP: usize = 128;

/// 剪裁后每张切片的宽高.
pub const DEFAULT_SLICE_SIZE: usize = 192;

/// 遮蔽块的边长.
pub const DEFAULT_MASK_KERNEL_SIZE: usize = 12;

/// 默认遮蔽率.
pub const DEFAULT_MASK_RATE: f64 = 0.5;

/// 被遮蔽体素的填充值.
///
/// 归一化区间为 `[0, 1]`, 遮蔽通过乘以 0/1 掩码实现, 因此填充值为 0.
pub const MASK_FILL: f32 = 0.0;

/// 归一化使用的分位数.
pub const CEILING_PERCENTILE: f64 = 99.0;

/// 分位数上界低于该值时视为退化体数据.
pub const MIN_CEILING: f32 = 1e-6;

/// BraTS 原始体数据的切片个数.
pub const BRATS_DEPTH: usize = 155;

/// BraTS 原始体数据切片的宽高.
pub const BRATS_SIZE: usize = 240;

/// 默认 nifti 文件扩展名.
pub const DEFAULT_FILE_EXT: &str = "nii.gz";

/// 峰值信噪比的上限 (重建与目标完全一致时).
pub const PSNR_CAP: f64 = 100.0;
