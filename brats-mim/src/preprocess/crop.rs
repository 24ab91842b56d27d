//! 中心剪裁. 不做任何插值.

use ndarray::{s, Array3};

use crate::error::{PipelineError, Result};

/// 剪裁目标尺寸: 深度方向保留 `depth` 张切片, 每张切片剪裁为 `height * width`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CropSize {
    /// 目标深度 (`slice_deep`).
    pub depth: usize,
    /// 目标高度.
    pub height: usize,
    /// 目标宽度.
    pub width: usize,
}

impl CropSize {
    /// 以正方形切片构造.
    #[inline]
    pub const fn square(depth: usize, size: usize) -> Self {
        Self {
            depth,
            height: size,
            width: size,
        }
    }

    /// 以元组形式返回.
    #[inline]
    pub const fn dim(&self) -> (usize, usize, usize) {
        (self.depth, self.height, self.width)
    }
}

/// 深度方向的起点: 以 `len / 2` 为中心, 向前取 `target / 2`.
#[inline]
fn depth_start(len: usize, target: usize) -> usize {
    (len / 2).saturating_sub(target / 2)
}

/// 平面方向的起点: 对称剪裁.
#[inline]
fn plane_start(len: usize, target: usize) -> usize {
    len.saturating_sub(target) / 2
}

/// 检查某个轴是否足够大.
#[inline]
fn check_axis(axis: &'static str, actual: usize, target: usize) -> Result<()> {
    if actual < target {
        Err(PipelineError::Undersized {
            axis,
            actual,
            target,
        })
    } else {
        Ok(())
    }
}

/// 对 `(depth, height, width)` 体数据做中心剪裁, 三个轴各自独立计算起点.
///
/// 任一轴小于目标尺寸时返回 [`PipelineError::Undersized`], 不做填充.
/// 因此成功时输出形状恰为 `size.dim()`.
pub fn center_crop(volume: &Array3<f32>, size: CropSize) -> Result<Array3<f32>> {
    let (d, h, w) = volume.dim();
    check_axis("depth", d, size.depth)?;
    check_axis("height", h, size.height)?;
    check_axis("width", w, size.width)?;

    let sd = depth_start(d, size.depth);
    let sh = plane_start(h, size.height);
    let sw = plane_start(w, size.width);

    let out = volume
        .slice(s![
            sd..sd + size.depth,
            sh..sh + size.height,
            sw..sw + size.width
        ])
        .to_owned();
    debug_assert_eq!(out.dim(), size.dim());
    Ok(out)
}
