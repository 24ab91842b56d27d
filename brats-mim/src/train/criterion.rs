//! 损失函数与评价指标. 两者都只在模态区域 (象限或通道) 上计算.

use ndarray::ArrayD;

use crate::consts::PSNR_CAP;
use crate::mask::BinaryPattern;
use crate::preprocess::{modality_region, ConcatMethod};

/// 参与损失计算的模态下标. 模式中没有启用任何模态时使用全部四个模态.
pub fn scored_slots(pattern: BinaryPattern) -> Vec<usize> {
    if pattern.count() == 0 {
        (0..4).collect()
    } else {
        pattern.slots().collect()
    }
}

/// 损失函数.
pub trait Criterion {
    /// `output` 与 `target` 形状相同, 末尾的轴符合拼接布局.
    fn loss(&self, output: &ArrayD<f32>, target: &ArrayD<f32>, pattern: BinaryPattern) -> f64;
}

/// 评价指标. 按 t1c, t1n, t2w, t2f 的顺序给出每个模态的得分.
pub trait Metric {
    /// 逐模态得分. 与 `pattern` 无关的实现可以忽略该参数.
    fn scores(&self, output: &ArrayD<f32>, target: &ArrayD<f32>, pattern: BinaryPattern) -> [f64; 4];
}

/// 每个模态区域的平方误差和与体素数.
fn region_sse(
    output: &ArrayD<f32>,
    target: &ArrayD<f32>,
    method: ConcatMethod,
    slot: usize,
) -> (f64, usize) {
    let out = modality_region(output.view(), method, slot);
    let tgt = modality_region(target.view(), method, slot);
    let sse = out
        .iter()
        .zip(tgt.iter())
        .map(|(&o, &t)| {
            let d = f64::from(o) - f64::from(t);
            d * d
        })
        .sum();
    (sse, out.len())
}

/// 只在被遮蔽模态区域上计算的均方误差.
#[derive(Copy, Clone, Debug, Default)]
pub struct MaskedMse {
    method: ConcatMethod,
}

impl MaskedMse {
    /// `method` 决定如何划分模态区域.
    pub fn new(method: ConcatMethod) -> Self {
        Self { method }
    }
}

impl Criterion for MaskedMse {
    fn loss(&self, output: &ArrayD<f32>, target: &ArrayD<f32>, pattern: BinaryPattern) -> f64 {
        let (sse, n) = scored_slots(pattern)
            .into_iter()
            .map(|slot| region_sse(output, target, self.method, slot))
            .fold((0.0, 0), |(s, n), (ds, dn)| (s + ds, n + dn));
        if n == 0 {
            0.0
        } else {
            sse / n as f64
        }
    }
}

/// 峰值信噪比. 数据范围固定为归一化区间的宽度 1. 完全重建时取 [`PSNR_CAP`].
///
/// 四个模态都会计算, 与遮蔽模式无关.
#[derive(Copy, Clone, Debug, Default)]
pub struct Psnr {
    method: ConcatMethod,
}

impl Psnr {
    /// `method` 决定如何划分模态区域.
    pub fn new(method: ConcatMethod) -> Self {
        Self { method }
    }
}

/// 由均方误差计算 PSNR, 数据范围为 1.
pub fn psnr_from_mse(mse: f64) -> f64 {
    if mse <= 0.0 {
        return PSNR_CAP;
    }
    (-10.0 * mse.log10()).min(PSNR_CAP)
}

impl Metric for Psnr {
    fn scores(&self, output: &ArrayD<f32>, target: &ArrayD<f32>, _pattern: BinaryPattern) -> [f64; 4] {
        [0, 1, 2, 3].map(|slot| {
            let (sse, n) = region_sse(output, target, self.method, slot);
            if n == 0 {
                PSNR_CAP
            } else {
                psnr_from_mse(sse / n as f64)
            }
        })
    }
}
