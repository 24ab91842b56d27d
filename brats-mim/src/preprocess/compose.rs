//! 模态拼接.
//!
//! 四个模态的顺序固定为 t1c, t1n, t2w, t2f. 平面拼接时分别位于左上, 右上, 左下, 右下;
//! 通道拼接时分别位于通道 0, 1, 2, 3. 下游按该位置索引模态.

use std::fmt;
use std::str::FromStr;

use ndarray::{concatenate, stack, Array3, ArrayD, ArrayViewD, ArrayViewMutD, Axis, Slice};

use crate::error::{PipelineError, Result};
use crate::volume::Modality;

/// 模态拼接方式.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ConcatMethod {
    /// 2D 平铺: `(D, 2H, 2W)`.
    #[default]
    Plane,
    /// 通道堆叠: `(D, 4, H, W)`.
    Channels,
}

impl ConcatMethod {
    /// 配置中使用的名字.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Plane => "plane",
            Self::Channels => "channels",
        }
    }

    /// 由单模态剪裁尺寸 `(D, H, W)` 计算拼接后的形状.
    pub fn composite_shape(self, (d, h, w): (usize, usize, usize)) -> Vec<usize> {
        match self {
            Self::Plane => vec![d, 2 * h, 2 * w],
            Self::Channels => vec![d, 4, h, w],
        }
    }
}

impl fmt::Display for ConcatMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConcatMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plane" => Ok(Self::Plane),
            "channels" => Ok(Self::Channels),
            other => Err(PipelineError::InvalidConcat(other.to_owned())),
        }
    }
}

/// 按 [`Modality::INPUTS`] 顺序拼接四个形状相同的体数据.
pub fn compose(method: ConcatMethod, volumes: [Array3<f32>; 4]) -> Result<ArrayD<f32>> {
    let expected = volumes[0].shape().to_vec();
    for (vol, modality) in volumes.iter().zip(Modality::INPUTS).skip(1) {
        if vol.shape() != expected.as_slice() {
            return Err(PipelineError::ModalityMismatch {
                modality,
                actual: vol.shape().to_vec(),
                expected,
            });
        }
    }

    let [t1c, t1n, t2w, t2f] = &volumes;
    let out = match method {
        ConcatMethod::Plane => {
            let top = concatenate(Axis(2), &[t1c.view(), t1n.view()])?;
            let bottom = concatenate(Axis(2), &[t2w.view(), t2f.view()])?;
            concatenate(Axis(1), &[top.view(), bottom.view()])?.into_dyn()
        }
        ConcatMethod::Channels => {
            stack(Axis(1), &[t1c.view(), t1n.view(), t2w.view(), t2f.view()])?.into_dyn()
        }
    };
    Ok(out)
}

/// 从任意前导维度的拼接布局数组中取出第 `slot` 个模态 (`0..4`, 见 [`Modality::INPUTS`]).
///
/// 平面布局按最后两个轴的象限切分; 通道布局取倒数第三个轴.
///
/// # Panics
///
/// 数组维数不足 (平面布局少于 2 维, 通道布局少于 3 维) 或 `slot >= 4` 时 panic.
pub fn modality_region<A>(
    view: ArrayViewD<'_, A>,
    method: ConcatMethod,
    slot: usize,
) -> ArrayViewD<'_, A> {
    assert!(slot < 4, "modality slot out of range: {slot}");
    let n = view.ndim();
    match method {
        ConcatMethod::Plane => {
            let rows = view.shape()[n - 2] / 2;
            let cols = view.shape()[n - 1] / 2;
            let (r, c) = (slot / 2, slot % 2);
            let mut v = view;
            v.slice_axis_inplace(Axis(n - 2), Slice::from(r * rows..(r + 1) * rows));
            v.slice_axis_inplace(Axis(n - 1), Slice::from(c * cols..(c + 1) * cols));
            v
        }
        ConcatMethod::Channels => view.index_axis_move(Axis(n - 3), slot),
    }
}

/// [`modality_region`] 的可变版本.
pub fn modality_region_mut<A>(
    mut view: ArrayViewMutD<'_, A>,
    method: ConcatMethod,
    slot: usize,
) -> ArrayViewMutD<'_, A> {
    assert!(slot < 4, "modality slot out of range: {slot}");
    let n = view.ndim();
    match method {
        ConcatMethod::Plane => {
            let rows = view.shape()[n - 2] / 2;
            let cols = view.shape()[n - 1] / 2;
            let (r, c) = (slot / 2, slot % 2);
            view.slice_axis_inplace(Axis(n - 2), Slice::from(r * rows..(r + 1) * rows));
            view.slice_axis_inplace(Axis(n - 1), Slice::from(c * cols..(c + 1) * cols));
            view
        }
        ConcatMethod::Channels => view.index_axis_move(Axis(n - 3), slot),
    }
}
