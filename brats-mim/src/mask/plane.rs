use ndarray::{s, Array2};
use rand::RngCore;

use super::{occlude_blocks, MaskSpec, MaskStrategy, OcclusionMask};
use crate::error::{PipelineError, Result};
use crate::preprocess::ConcatMethod;

/// 平面拼接的掩码. 形状为 `(2H, 2W)`, 沿深度方向广播, 所有切片共享同一个掩码.
#[derive(Clone, Debug)]
pub struct PlaneMask {
    spec: MaskSpec,
}

impl PlaneMask {
    /// 由遮蔽参数创建.
    pub fn new(spec: MaskSpec) -> Self {
        Self { spec }
    }

    /// 直接生成 `(rows, cols)` 平面掩码. `rows`, `cols` 必须为偶数.
    pub fn generate_plane(&self, rows: usize, cols: usize, rng: &mut dyn RngCore) -> Array2<u8> {
        let mut mask = Array2::<u8>::ones((rows, cols));
        let (h, w) = (rows / 2, cols / 2);
        let rate = self.spec.rate().draw(&mut *rng);
        let k = self.spec.kernel_size();
        for slot in self.spec.pattern().slots() {
            let (r0, c0) = ((slot / 2) * h, (slot % 2) * w);
            let quadrant = mask.slice_mut(s![r0..r0 + h, c0..c0 + w]);
            occlude_blocks(quadrant, k, rate, &mut *rng);
        }
        mask
    }
}

impl MaskStrategy for PlaneMask {
    fn method(&self) -> ConcatMethod {
        ConcatMethod::Plane
    }

    fn generate(&self, sample_shape: &[usize], rng: &mut dyn RngCore) -> Result<OcclusionMask> {
        let n = sample_shape.len();
        if n < 2 || sample_shape[n - 2] % 2 != 0 || sample_shape[n - 1] % 2 != 0 {
            return Err(PipelineError::MaskShape {
                mask: vec![],
                sample: sample_shape.to_vec(),
            });
        }
        let plane = self.generate_plane(sample_shape[n - 2], sample_shape[n - 1], rng);
        Ok(OcclusionMask::new(plane.into_dyn()))
    }
}

#[cfg(test)]
mod tests {
    use super::PlaneMask;
    use crate::consts::MASK_FILL;
    use crate::mask::{BinaryPattern, MaskRate, MaskSpec, MaskStrategy};
    use crate::preprocess::{modality_region, ConcatMethod};
    use ndarray::{ArrayD, Axis, IxDyn};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn plane(kernel: usize, pattern: &str, rate: f64, randomized: bool) -> PlaneMask {
        let spec = MaskSpec::new(
            kernel,
            pattern.parse().unwrap(),
            MaskRate::new(rate, randomized).unwrap(),
        )
        .unwrap();
        PlaneMask::new(spec)
    }

    #[test]
    fn test_coverage_tracks_rate() {
        let strategy = plane(4, "1111", 0.5, false);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let trials = 50;
        let total: f64 = (0..trials)
            .map(|_| strategy.generate(&[1, 64, 64], &mut rng).unwrap().occluded_fraction())
            .sum();
        let mean = total / trials as f64;
        assert!((mean - 0.5).abs() < 0.03, "mean coverage = {mean}");
    }

    #[test]
    fn test_disabled_quadrant_is_never_occluded() {
        let strategy = plane(4, "0111", 0.9, false);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..20 {
            let mask = strategy.generate(&[2, 32, 32], &mut rng).unwrap();
            assert_eq!(mask.shape(), &[32, 32]);
            assert_eq!(mask.modality_fraction(ConcatMethod::Plane, 0), 0.0);
            assert!(mask.modality_fraction(ConcatMethod::Plane, 3) > 0.0);
        }
    }

    #[test]
    fn test_full_rate_occludes_whole_quadrant() {
        let strategy = plane(12, "1000", 1.0, false);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let sample = ArrayD::<f32>::from_elem(IxDyn(&[3, 20, 20]), 0.7);
        let (mask, masked) = strategy.mask_sample(&sample, &mut rng).unwrap();
        assert_eq!(mask.modality_fraction(ConcatMethod::Plane, 0), 1.0);
        assert_eq!(mask.occluded_fraction(), 0.25);
        for depth in masked.axis_iter(Axis(0)) {
            let depth = depth.into_dyn();
            assert!(modality_region(depth.view(), ConcatMethod::Plane, 0)
                .iter()
                .all(|v| *v == MASK_FILL));
            for slot in 1..4 {
                assert!(modality_region(depth.view(), ConcatMethod::Plane, slot)
                    .iter()
                    .all(|v| *v == 0.7));
            }
        }
    }

    #[test]
    fn test_zero_rate_and_empty_pattern() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let none = plane(4, "1111", 0.0, false);
        assert_eq!(none.generate(&[1, 16, 16], &mut rng).unwrap().occluded_fraction(), 0.0);
        let off = plane(4, "0000", 1.0, false);
        assert_eq!(off.generate(&[1, 16, 16], &mut rng).unwrap().occluded_fraction(), 0.0);
        assert_eq!(BinaryPattern::new([false; 4]).count(), 0);
    }

    #[test]
    fn test_randomized_rate_averages_half() {
        let strategy = plane(2, "1111", 0.8, true);
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let trials = 400;
        let total: f64 = (0..trials)
            .map(|_| strategy.generate(&[1, 32, 32], &mut rng).unwrap().occluded_fraction())
            .sum();
        let mean = total / trials as f64;
        assert!((mean - 0.4).abs() < 0.05, "mean coverage = {mean}");
    }

    #[test]
    fn test_odd_plane_is_rejected() {
        let strategy = plane(4, "1111", 0.5, false);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(strategy.generate(&[1, 15, 16], &mut rng).is_err());
    }
}
