use ndarray::{Array4, Axis};
use rand::RngCore;

use super::{occlude_blocks, MaskSpec, MaskStrategy, OcclusionMask};
use crate::error::{PipelineError, Result};
use crate::preprocess::ConcatMethod;

/// 通道拼接的掩码. 形状与样本相同 `(D, 4, H, W)`, 每个切片的每个通道独立生成.
#[derive(Clone, Debug)]
pub struct ChannelMask {
    spec: MaskSpec,
}

impl ChannelMask {
    /// 由遮蔽参数创建.
    pub fn new(spec: MaskSpec) -> Self {
        Self { spec }
    }
}

impl MaskStrategy for ChannelMask {
    fn method(&self) -> ConcatMethod {
        ConcatMethod::Channels
    }

    fn generate(&self, sample_shape: &[usize], rng: &mut dyn RngCore) -> Result<OcclusionMask> {
        let &[d, c, h, w] = sample_shape else {
            return Err(PipelineError::MaskShape {
                mask: vec![],
                sample: sample_shape.to_vec(),
            });
        };
        if c != 4 {
            return Err(PipelineError::MaskShape {
                mask: vec![d, 4, h, w],
                sample: sample_shape.to_vec(),
            });
        }

        let mut mask = Array4::<u8>::ones((d, c, h, w));
        let rate = self.spec.rate().draw(&mut *rng);
        let k = self.spec.kernel_size();
        for mut depth in mask.axis_iter_mut(Axis(0)) {
            for slot in self.spec.pattern().slots() {
                occlude_blocks(depth.index_axis_mut(Axis(0), slot), k, rate, &mut *rng);
            }
        }
        Ok(OcclusionMask::new(mask.into_dyn()))
    }
}
