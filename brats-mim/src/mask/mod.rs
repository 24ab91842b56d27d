//! 结构化随机遮蔽.
//!
//! 在每个被启用的象限 (平面拼接) 或通道 (通道拼接) 内, 以该区域的原点为起点划分
//! `k * k` 的规则网格, 每个块独立地以概率 `r` 被遮蔽. 边长不能被 `k` 整除时,
//! 最后一行 / 列的块会更小. 未启用的区域全部保持可见.
//!
//! 掩码约定: `1` 表示可见, `0` 表示被遮蔽.

mod channels;
mod plane;

use std::fmt;
use std::str::FromStr;

use itertools::iproduct;
use ndarray::{s, ArrayD, ArrayViewD, ArrayViewMut2};
use rand::{Rng, RngCore};

use crate::consts::MASK_FILL;
use crate::error::{PipelineError, Result};
use crate::preprocess::{modality_region, ConcatMethod};

pub use channels::ChannelMask;
pub use plane::PlaneMask;

/// 四位二进制遮蔽模式, 按 t1c, t1n, t2w, t2f 的顺序表示各模态是否参与遮蔽.
///
/// 例如 `"1000"` 表示只遮蔽 t1c.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct BinaryPattern([bool; 4]);

impl BinaryPattern {
    /// 遮蔽全部模态.
    pub const ALL: BinaryPattern = BinaryPattern([true; 4]);

    /// 直接由四个开关构造.
    #[inline]
    pub const fn new(bits: [bool; 4]) -> Self {
        Self(bits)
    }

    /// 第 `slot` 个模态是否参与遮蔽.
    #[inline]
    pub fn enabled(&self, slot: usize) -> bool {
        self.0.get(slot).copied().unwrap_or(false)
    }

    /// 参与遮蔽的模态个数.
    #[inline]
    pub fn count(&self) -> usize {
        self.0.iter().filter(|b| **b).count()
    }

    /// 参与遮蔽的模态下标, 升序.
    pub fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..4).filter(|i| self.0[*i])
    }

    /// 四个开关.
    #[inline]
    pub const fn bits(&self) -> [bool; 4] {
        self.0
    }
}

impl Default for BinaryPattern {
    fn default() -> Self {
        Self::ALL
    }
}

impl FromStr for BinaryPattern {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 {
            return Err(PipelineError::InvalidPattern(s.to_owned()));
        }
        let mut bits = [false; 4];
        for (bit, b) in bits.iter_mut().zip(bytes) {
            *bit = match b {
                b'0' => false,
                b'1' => true,
                _ => return Err(PipelineError::InvalidPattern(s.to_owned())),
            };
        }
        Ok(Self(bits))
    }
}

impl fmt::Display for BinaryPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            f.write_str(if b { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl TryFrom<String> for BinaryPattern {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BinaryPattern> for String {
    fn from(value: BinaryPattern) -> Self {
        value.to_string()
    }
}

/// 遮蔽率. `randomized` 为真时, 每次生成掩码都从 `[0, rate]` 中均匀抽取实际遮蔽率.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MaskRate {
    rate: f64,
    randomized: bool,
}

impl MaskRate {
    /// 构造遮蔽率. `rate` 不在 `[0, 1]` 内时返回 [`PipelineError::InvalidRate`].
    pub fn new(rate: f64, randomized: bool) -> Result<Self> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(PipelineError::InvalidRate(rate));
        }
        Ok(Self { rate, randomized })
    }

    /// 固定遮蔽率.
    #[inline]
    pub fn fixed(rate: f64) -> Result<Self> {
        Self::new(rate, false)
    }

    /// 配置的遮蔽率 (随机模式下为上限).
    #[inline]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// 是否每次随机抽取.
    #[inline]
    pub fn is_randomized(&self) -> bool {
        self.randomized
    }

    /// 抽取本次调用使用的遮蔽率.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.randomized && self.rate > 0.0 {
            rng.gen_range(0.0..=self.rate)
        } else {
            self.rate
        }
    }
}

/// 遮蔽算法的全部超参数.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MaskSpec {
    kernel_size: usize,
    pattern: BinaryPattern,
    rate: MaskRate,
}

impl MaskSpec {
    /// 构造. `kernel_size` 为 0 时返回 [`PipelineError::InvalidKernel`].
    pub fn new(kernel_size: usize, pattern: BinaryPattern, rate: MaskRate) -> Result<Self> {
        if kernel_size == 0 {
            return Err(PipelineError::InvalidKernel);
        }
        Ok(Self {
            kernel_size,
            pattern,
            rate,
        })
    }

    /// 遮蔽块边长.
    #[inline]
    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// 遮蔽模式.
    #[inline]
    pub fn pattern(&self) -> BinaryPattern {
        self.pattern
    }

    /// 遮蔽率.
    #[inline]
    pub fn rate(&self) -> MaskRate {
        self.rate
    }
}

/// 遮蔽掩码. 可广播到拼接样本的形状.
#[derive(Clone, Debug, PartialEq)]
pub struct OcclusionMask {
    data: ArrayD<u8>,
}

impl OcclusionMask {
    /// 包装已有掩码数组.
    #[inline]
    pub fn new(data: ArrayD<u8>) -> Self {
        Self { data }
    }

    /// 掩码形状.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// 掩码视图.
    #[inline]
    pub fn view(&self) -> ArrayViewD<'_, u8> {
        self.data.view()
    }

    /// 取出底层数组.
    #[inline]
    pub fn into_inner(self) -> ArrayD<u8> {
        self.data
    }

    /// 被遮蔽体素占全部掩码体素的比例.
    pub fn occluded_fraction(&self) -> f64 {
        fraction_of_zeros(self.data.view())
    }

    /// 第 `slot` 个模态区域内被遮蔽体素的比例.
    pub fn modality_fraction(&self, method: ConcatMethod, slot: usize) -> f64 {
        fraction_of_zeros(modality_region(self.data.view(), method, slot))
    }

    /// 将掩码作用于样本: 可见处保持原值, 遮蔽处置为 [`MASK_FILL`].
    pub fn apply(&self, sample: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let mask = self
            .data
            .broadcast(sample.raw_dim())
            .ok_or_else(|| PipelineError::MaskShape {
                mask: self.data.shape().to_vec(),
                sample: sample.shape().to_vec(),
            })?;
        let mut out = sample.clone();
        out.zip_mut_with(&mask, |x, &m| {
            if m == 0 {
                *x = MASK_FILL;
            }
        });
        Ok(out)
    }
}

fn fraction_of_zeros(view: ArrayViewD<'_, u8>) -> f64 {
    if view.is_empty() {
        return 0.0;
    }
    view.iter().filter(|m| **m == 0).count() as f64 / view.len() as f64
}

/// 掩码生成策略. 不同的拼接方式需要结构不同的掩码.
pub trait MaskStrategy: fmt::Debug + Send + Sync {
    /// 适用的拼接方式.
    fn method(&self) -> ConcatMethod;

    /// 为形状为 `sample_shape` 的拼接样本生成掩码.
    fn generate(&self, sample_shape: &[usize], rng: &mut dyn RngCore) -> Result<OcclusionMask>;

    /// 生成掩码并作用于样本, 返回 (掩码, 遮蔽后样本).
    fn mask_sample(
        &self,
        sample: &ArrayD<f32>,
        rng: &mut dyn RngCore,
    ) -> Result<(OcclusionMask, ArrayD<f32>)> {
        let mask = self.generate(sample.shape(), rng)?;
        let masked = mask.apply(sample)?;
        Ok((mask, masked))
    }
}

/// 根据拼接方式选择掩码策略.
pub fn strategy_for(method: ConcatMethod, spec: MaskSpec) -> Box<dyn MaskStrategy> {
    match method {
        ConcatMethod::Plane => Box::new(PlaneMask::new(spec)),
        ConcatMethod::Channels => Box::new(ChannelMask::new(spec)),
    }
}

/// 在一个 2D 区域内按 `k * k` 网格独立遮蔽, 返回被遮蔽的块数.
pub(crate) fn occlude_blocks<R: Rng + ?Sized>(
    mut region: ArrayViewMut2<'_, u8>,
    k: usize,
    rate: f64,
    rng: &mut R,
) -> usize {
    let (h, w) = region.dim();
    let mut occluded = 0;
    for (br, bc) in iproduct!(0..h.div_ceil(k), 0..w.div_ceil(k)) {
        if rng.gen_bool(rate) {
            let (r0, c0) = (br * k, bc * k);
            region
                .slice_mut(s![r0..(r0 + k).min(h), c0..(c0 + k).min(w)])
                .fill(0);
            occluded += 1;
        }
    }
    occluded
}
