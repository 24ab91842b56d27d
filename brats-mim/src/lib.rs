#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供 BraTS 格式多模态脑部 MRI 的读取, 预处理, 结构化随机遮蔽,
//! 以及遮蔽重建 (masked image modeling) 训练所需的数据集与训练循环外围组件.
//!
//! # 数据流
//!
//! 读取 (`volume`) -> 归一化, 剪裁, 翻转, 拼接 (`preprocess`) -> 遮蔽 (`mask`)
//! -> 数据集协议 (`dataset`) -> 训练与评估 (`train`).
//!
//! # 注意
//!
//! 1. 四个输入模态的顺序固定为 t1c, t1n, t2w, t2f. 平面拼接时依次位于左上, 右上,
//!   左下, 右下; 通道拼接时依次为通道 0..4. 损失和指标依赖该顺序.
//! 2. 归一化区间为 `[0, 1]`, 被遮蔽体素填充 `0.0`.
//! 3. 体数据小于剪裁尺寸时直接报错, 不做填充.
//!
//! # Features
//!
//! - `rayon`: 四个模态并行预处理, 批次内样本并行生成.
//! - `serde`: 配置的序列化, 以及检查点存储.

/// 三维索引 `(depth, height, width)`.
pub type Idx3d = (usize, usize, usize);

pub mod consts;
pub mod dataset;
mod error;
pub mod mask;
pub mod prelude;
pub mod preprocess;
pub mod preview;
pub mod train;
pub mod volume;

pub use error::{PipelineError, Result};
pub use volume::{Modality, MriVolume, NiftiHeaderAttr, PatientRecord};
