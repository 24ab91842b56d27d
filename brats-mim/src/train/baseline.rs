//! 均值填充基线模型.
//!
//! 每个模态只有一个参数 `θ`: 输入中等于 [`MASK_FILL`] 的体素被替换为该模态的 `θ`,
//! 其余体素原样输出. 在 [`MaskedMse`](super::MaskedMse) 下用梯度下降更新 `θ`, 最终收敛到
//! 被遮蔽体素真值的均值. 用于端到端验证训练循环与检查点逻辑.

use ndarray::ArrayD;

use super::criterion::scored_slots;
use super::Network;
use crate::consts::MASK_FILL;
use crate::error::{PipelineError, Result};
use crate::mask::BinaryPattern;
use crate::preprocess::{modality_region, modality_region_mut, ConcatMethod};

/// 均值填充基线.
#[derive(Clone, Debug, PartialEq)]
pub struct MeanFill {
    method: ConcatMethod,
    fill: [f32; 4],
}

impl MeanFill {
    /// 四个模态的填充值初始为 0.
    pub fn new(method: ConcatMethod) -> Self {
        Self {
            method,
            fill: [MASK_FILL; 4],
        }
    }

    /// 当前的填充值.
    #[inline]
    pub fn fill(&self) -> [f32; 4] {
        self.fill
    }
}

impl Network for MeanFill {
    fn name(&self) -> &str {
        "mean_fill"
    }

    fn forward(&self, input: &ArrayD<f32>) -> ArrayD<f32> {
        let mut out = input.clone();
        for (slot, &theta) in self.fill.iter().enumerate() {
            modality_region_mut(out.view_mut(), self.method, slot).mapv_inplace(|v| {
                if v == MASK_FILL {
                    theta
                } else {
                    v
                }
            });
        }
        out
    }

    fn train_step(
        &mut self,
        input: &ArrayD<f32>,
        target: &ArrayD<f32>,
        pattern: BinaryPattern,
        lr: f64,
    ) -> ArrayD<f32> {
        let out = self.forward(input);
        let slots = scored_slots(pattern);
        let total: usize = slots
            .iter()
            .map(|&slot| modality_region(input.view(), self.method, slot).len())
            .sum();
        if total == 0 {
            return out;
        }

        for slot in slots {
            let inp = modality_region(input.view(), self.method, slot);
            let tgt = modality_region(target.view(), self.method, slot);
            let theta = f64::from(self.fill[slot]);
            let residual: f64 = inp
                .iter()
                .zip(tgt.iter())
                .filter(|(&i, _)| i == MASK_FILL)
                .map(|(_, &t)| theta - f64::from(t))
                .sum();
            let grad = 2.0 * residual / total as f64;
            self.fill[slot] = (theta - lr * grad) as f32;
        }
        out
    }

    fn parameters(&self) -> Vec<f32> {
        self.fill.to_vec()
    }

    fn load_parameters(&mut self, params: &[f32]) -> Result<()> {
        let fill: [f32; 4] = params.try_into().map_err(|_| {
            PipelineError::InvalidConfig(format!(
                "{} expects 4 parameters, got {}",
                self.name(),
                params.len()
            ))
        })?;
        self.fill = fill;
        Ok(())
    }
}
