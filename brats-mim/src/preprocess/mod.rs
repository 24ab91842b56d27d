//! 单模态预处理 (归一化, 剪裁, 翻转) 与多模态拼接.

pub mod compose;
pub mod crop;
pub mod flip;
pub mod normalize;

pub use compose::{compose, modality_region, modality_region_mut, ConcatMethod};
pub use crop::{center_crop, CropSize};
pub use flip::FlipAction;
pub use normalize::{normalize, percentile, NORM_RANGE};
