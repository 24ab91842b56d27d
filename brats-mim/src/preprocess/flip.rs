//! 随机翻转增强. 同一病人的四个模态必须使用同一个翻转动作.

use ndarray::{Array3, Axis};
use rand::Rng;

/// 翻转动作.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum FlipAction {
    /// 不变.
    Keep,
    /// 左右翻转 (宽度方向, 最后一个轴).
    Horizontal,
    /// 上下翻转 (高度方向, 第二个轴).
    Vertical,
}

impl FlipAction {
    /// 所有动作, 按编号 0, 1, 2 排列.
    pub const ALL: [FlipAction; 3] = [Self::Keep, Self::Horizontal, Self::Vertical];

    /// 从三种动作中等概率抽取一个.
    #[inline]
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    /// 由编号构造. 编号超出 `0..=2` 时返回 `None`.
    #[inline]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Keep),
            1 => Some(Self::Horizontal),
            2 => Some(Self::Vertical),
            _ => None,
        }
    }

    /// 对 `(depth, height, width)` 体数据应用该动作.
    ///
    /// 只修改步长, 不复制数据; 结果可能不是标准内存布局.
    pub fn apply(self, mut volume: Array3<f32>) -> Array3<f32> {
        match self {
            Self::Keep => {}
            Self::Horizontal => volume.invert_axis(Axis(2)),
            Self::Vertical => volume.invert_axis(Axis(1)),
        }
        volume
    }
}

#[cfg(test)]
mod tests {
    use super::FlipAction;
    use ndarray::Array3;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample() -> Array3<f32> {
        Array3::from_shape_fn((2, 3, 4), |(d, h, w)| (d * 12 + h * 4 + w) as f32)
    }

    #[test]
    fn test_flip_twice_is_identity() {
        for action in FlipAction::ALL {
            let once = action.apply(sample());
            assert_eq!(action.apply(once), sample());
        }
        assert_eq!(FlipAction::Keep.apply(sample()), sample());
    }

    #[test]
    fn test_flip_axes() {
        let h = FlipAction::Horizontal.apply(sample());
        assert_eq!(h[[1, 2, 0]], sample()[[1, 2, 3]]);
        let v = FlipAction::Vertical.apply(sample());
        assert_eq!(v[[1, 0, 3]], sample()[[1, 2, 3]]);
    }

    #[test]
    fn test_random_covers_all_actions() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut seen = [false; 3];
        for _ in 0..200 {
            let a = FlipAction::random(&mut rng);
            seen[FlipAction::ALL.iter().position(|x| *x == a).unwrap()] = true;
        }
        assert_eq!(seen, [true; 3]);
        assert_eq!(FlipAction::from_code(2), Some(FlipAction::Vertical));
        assert_eq!(FlipAction::from_code(3), None);
    }
}
