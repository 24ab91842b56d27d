//! 遮蔽重建训练的外围组件: 批次布局, 损失与指标, 学习率调度, 检查点, 训练循环.
//!
//! 网络本身通过 [`Network`] trait 接入. 本 crate 只提供一个用于验证流程的
//! 均值填充基线 [`MeanFill`].

use ndarray::ArrayD;

use crate::error::Result;
use crate::mask::BinaryPattern;

mod baseline;
pub mod batch;
#[cfg(feature = "serde")]
pub mod checkpoint;
mod criterion;
mod driver;
mod scheduler;

pub use baseline::MeanFill;
pub use batch::{step_select, swap_batch_slice, volume_steps, Batch, StepBatch};
pub use criterion::{psnr_from_mse, scored_slots, Criterion, MaskedMse, Metric, Psnr};
pub use driver::{evaluate, evaluate_with, EpochReport, EvalReport, FitSummary, TrainConfig, Trainer};
pub use scheduler::{LrScheduler, Schedule};

#[cfg(feature = "serde")]
pub use checkpoint::{load_checkpoint, CheckpointState, LoadMethod};

/// 重建网络.
///
/// 输入与输出形状相同, 为 `(N, B, ...)` 的切片批次, 末尾的轴符合拼接布局.
pub trait Network: Send {
    /// 模型名. 写入检查点, 加载时用于核对.
    fn name(&self) -> &str;

    /// 前向传播.
    fn forward(&self, input: &ArrayD<f32>) -> ArrayD<f32>;

    /// 前向传播并以学习率 `lr` 更新参数, 返回更新前的输出.
    /// 只有 `pattern` 中启用的模态参与损失.
    fn train_step(
        &mut self,
        input: &ArrayD<f32>,
        target: &ArrayD<f32>,
        pattern: BinaryPattern,
        lr: f64,
    ) -> ArrayD<f32>;

    /// 展平的参数.
    fn parameters(&self) -> Vec<f32>;

    /// 载入展平的参数. 数量不符时返回错误.
    fn load_parameters(&mut self, params: &[f32]) -> Result<()>;
}
