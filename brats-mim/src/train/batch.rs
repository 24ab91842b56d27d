//! 批次布局变换.
//!
//! 按病人加载的批次形状为 `(B, D, ...)`. 训练时把深度轴当作真正的批次轴:
//! 交换前两个轴得到 `(D, B, ...)`, 再按步长从深度轴中挑选切片, 每一步只使用
//! `step_slice` 个切片.

use ndarray::{stack, ArrayD, ArrayViewD, Axis, ErrorKind, ShapeError};

use crate::error::Result;

/// 一批按病人组织的样本, 形状为 `(B, D, ...)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    /// 遮蔽后的输入.
    pub masked: ArrayD<f32>,
    /// 重建目标.
    pub original: ArrayD<f32>,
}

impl Batch {
    /// 把若干个同形状的样本堆叠为一个批次.
    pub fn collate(masked: &[ArrayViewD<'_, f32>], original: &[ArrayViewD<'_, f32>]) -> Result<Self> {
        let masked = stack(Axis(0), masked)?;
        let original = stack(Axis(0), original)?;
        check_same_shape(&masked, &original)?;
        Ok(Self { masked, original })
    }

    /// 批次中的病人数.
    #[inline]
    pub fn len(&self) -> usize {
        self.masked.len_of(Axis(0))
    }

    /// 批次是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 交换批次轴与深度轴, 得到 `(D, B, ...)`.
    pub fn swap_batch_slice(self) -> Self {
        Self {
            masked: swap_batch_slice(self.masked),
            original: swap_batch_slice(self.original),
        }
    }

    /// 深度轴长度. 批次维数不足 2 时为 0.
    #[inline]
    pub fn depth(&self) -> usize {
        self.masked.shape().get(1).copied().unwrap_or(0)
    }
}

/// 一个训练步使用的切片, 形状为 `(N, B, ...)`, `N` 为本步的切片数.
#[derive(Clone, Debug, PartialEq)]
pub struct StepBatch {
    /// 遮蔽后的输入.
    pub masked: ArrayD<f32>,
    /// 重建目标.
    pub original: ArrayD<f32>,
}

impl StepBatch {
    /// 由形状为 `(N, ...)` 的切片堆叠构造, 在第 1 轴插入长度为 1 的批次轴.
    pub fn from_slices(masked: ArrayD<f32>, original: ArrayD<f32>) -> Result<Self> {
        check_same_shape(&masked, &original)?;
        Ok(Self {
            masked: masked.insert_axis(Axis(1)),
            original: original.insert_axis(Axis(1)),
        })
    }

    /// 本步的切片数.
    #[inline]
    pub fn len(&self) -> usize {
        self.masked.len_of(Axis(0))
    }

    /// 是否没有切片.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_same_shape(a: &ArrayD<f32>, b: &ArrayD<f32>) -> Result<()> {
    if a.shape() == b.shape() {
        Ok(())
    } else {
        Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into())
    }
}

/// 交换前两个轴. 只修改步长.
///
/// 维数不足 2 时原样返回.
pub fn swap_batch_slice(mut arr: ArrayD<f32>) -> ArrayD<f32> {
    if arr.ndim() >= 2 {
        arr.swap_axes(0, 1);
    }
    arr
}

/// 每轮 (每个病人批次) 的训练步数: `slice_deep / step_slice`, 至少为 1.
#[inline]
pub fn volume_steps(slice_deep: usize, step_slice: usize) -> usize {
    (slice_deep / step_slice.max(1)).max(1)
}

/// 从 `(D, B, ...)` 布局中挑选第 `step` 步的切片: 下标 `step, step + S, step + 2S, ...`,
/// 其中 `S = steps` 为步数. 所有步合起来恰好覆盖每个切片一次.
pub fn step_select(swapped: &Batch, step: usize, steps: usize) -> StepBatch {
    let depth = swapped.masked.len_of(Axis(0));
    let indices: Vec<usize> = (step..depth).step_by(steps.max(1)).collect();
    StepBatch {
        masked: swapped.masked.select(Axis(0), &indices),
        original: swapped.original.select(Axis(0), &indices),
    }
}

#[cfg(test)]
mod tests {
    use super::{step_select, volume_steps, Batch, StepBatch};
    use ndarray::{ArrayD, Axis, IxDyn};
    use std::collections::HashSet;

    fn batch(b: usize, d: usize) -> Batch {
        let arr = ArrayD::from_shape_fn(IxDyn(&[b, d, 2, 2]), |i| (i[0] * 100 + i[1]) as f32);
        Batch {
            masked: arr.clone(),
            original: arr,
        }
    }

    #[test]
    fn test_swap_moves_depth_first() {
        let swapped = batch(2, 8).swap_batch_slice();
        assert_eq!(swapped.masked.shape(), &[8, 2, 2, 2]);
        assert_eq!(swapped.masked[[5, 1, 0, 0]], 105.0);
    }

    #[test]
    fn test_steps_cover_every_slice_once() {
        let swapped = batch(1, 12).swap_batch_slice();
        let steps = volume_steps(12, 3);
        assert_eq!(steps, 4);
        let mut seen = HashSet::new();
        for step in 0..steps {
            let sb = step_select(&swapped, step, steps);
            assert_eq!(sb.len(), 3);
            for v in sb.masked.index_axis(Axis(2), 0).index_axis(Axis(2), 0).iter() {
                assert!(seen.insert(*v as usize));
            }
        }
        assert_eq!(seen.len(), 12);
        assert_eq!(volume_steps(4, 8), 1);
    }

    #[test]
    fn test_step_batch_inserts_channel_axis() {
        let slices = ArrayD::<f32>::zeros(IxDyn(&[3, 4, 4]));
        let sb = StepBatch::from_slices(slices.clone(), slices).unwrap();
        assert_eq!(sb.masked.shape(), &[3, 1, 4, 4]);
        let other = ArrayD::<f32>::zeros(IxDyn(&[3, 4, 5]));
        assert!(StepBatch::from_slices(ArrayD::zeros(IxDyn(&[3, 4, 4])), other).is_err());
    }
}
