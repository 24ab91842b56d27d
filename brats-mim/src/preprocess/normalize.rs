//! 基于分位数上界的强度归一化.

use ndarray::Array3;
use ordered_float::OrderedFloat;

use crate::consts::{CEILING_PERCENTILE, MIN_CEILING};
use crate::error::{PipelineError, Result};

/// 归一化后的取值区间 (闭区间).
pub const NORM_RANGE: (f32, f32) = (0.0, 1.0);

/// 计算 `values` 的第 `q` 百分位数 (`0 <= q <= 100`), 在两个次序统计量之间线性插值.
///
/// 该操作会打乱 `values` 的顺序 (使用选择而非完全排序). `values` 为空时返回 `None`.
pub fn percentile(values: &mut [f32], q: f64) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 100.0);
    let pos = q / 100.0 * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let frac = pos - lo as f64;

    let (_, nth, right) = values.select_nth_unstable_by_key(lo, |v| OrderedFloat(*v));
    let low = *nth as f64;
    if frac == 0.0 || right.is_empty() {
        return Some(low as f32);
    }
    // 右半部分的最小值即第 `lo + 1` 个次序统计量.
    let high = right.iter().copied().map(OrderedFloat).min()?.0 as f64;
    Some((low + (high - low) * frac) as f32)
}

/// 将体数据截断到 `[0, p99]` 后线性映射到 [`NORM_RANGE`].
///
/// 含有 NaN/Inf 体素时返回 [`PipelineError::NonFiniteIntensity`];
/// 当 99 分位数不超过 [`MIN_CEILING`] 时 (空白或损坏的体数据),
/// 返回 [`PipelineError::DegenerateIntensity`].
pub fn normalize(mut volume: Array3<f32>) -> Result<Array3<f32>> {
    let count = volume.iter().filter(|v| !v.is_finite()).count();
    if count > 0 {
        return Err(PipelineError::NonFiniteIntensity { count });
    }
    let mut buf: Vec<f32> = volume.iter().copied().collect();
    let ceiling = percentile(&mut buf, CEILING_PERCENTILE).unwrap_or(0.0);
    if !ceiling.is_finite() || ceiling <= MIN_CEILING {
        return Err(PipelineError::DegenerateIntensity { ceiling });
    }

    volume.mapv_inplace(|v| v.clamp(0.0, ceiling) / ceiling);
    Ok(volume)
}

#[cfg(test)]
mod tests {
    use super::{normalize, percentile, NORM_RANGE};
    use crate::error::PipelineError;
    use ndarray::Array3;

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_percentile_matches_linear_interpolation() {
        // numpy.percentile(range(1, 11), q)
        let base: Vec<f32> = (1..=10).rev().map(|v| v as f32).collect();
        for (q, expected) in [(0.0, 1.0), (50.0, 5.5), (99.0, 9.91), (100.0, 10.0)] {
            let mut v = base.clone();
            assert!(float_eq(percentile(&mut v, q).unwrap(), expected), "q = {q}");
        }
        assert_eq!(percentile(&mut [], 99.0), None);
        assert_eq!(percentile(&mut [3.0], 99.0), Some(3.0));
    }

    #[test]
    fn test_normalize_bounds() {
        let vol = Array3::from_shape_fn((4, 8, 8), |(d, h, w)| {
            (d * 64 + h * 8 + w) as f32 * 3.0 - 40.0
        });
        let mut buf: Vec<f32> = vol.iter().copied().collect();
        let p99 = percentile(&mut buf, 99.0).unwrap();

        let out = normalize(vol.clone()).unwrap();
        assert_eq!(out.dim(), vol.dim());
        let (lo, hi) = NORM_RANGE;
        assert!(out.iter().all(|v| (lo..=hi).contains(v)));
        // 负值截断为 0, 超过 p99 的截断为 1.
        for (src, dst) in vol.iter().zip(out.iter()) {
            if *src <= 0.0 {
                assert_eq!(*dst, 0.0);
            } else if *src >= p99 {
                assert_eq!(*dst, 1.0);
            } else {
                assert!(float_eq(*dst, src / p99));
            }
        }
    }

    #[test]
    fn test_normalize_constant_volume() {
        let out = normalize(Array3::from_elem((2, 3, 3), 250.0)).unwrap();
        assert!(out.iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_normalize_degenerate_volume() {
        let err = normalize(Array3::zeros((2, 3, 3))).unwrap_err();
        assert!(matches!(err, PipelineError::DegenerateIntensity { ceiling } if ceiling == 0.0));

        // 多数体素为负, 上界仍然为负.
        let err = normalize(Array3::from_elem((2, 2, 2), -5.0)).unwrap_err();
        assert!(matches!(err, PipelineError::DegenerateIntensity { .. }));
    }

    #[test]
    fn test_normalize_rejects_non_finite_voxels() {
        // 少量 NaN 不会影响 p99, 必须单独检出.
        let mut vol = Array3::from_shape_fn((4, 16, 16), |(d, h, w)| (d * 256 + h * 16 + w) as f32);
        vol[[0, 0, 0]] = f32::NAN;
        let err = normalize(vol.clone()).unwrap_err();
        assert!(matches!(err, PipelineError::NonFiniteIntensity { count: 1 }));

        vol[[1, 2, 3]] = f32::INFINITY;
        let err = normalize(vol).unwrap_err();
        assert!(matches!(err, PipelineError::NonFiniteIntensity { count: 2 }));
    }
}
