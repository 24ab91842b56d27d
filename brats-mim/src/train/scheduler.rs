//! 学习率调度.
//!
//! 调度器每处理完一个病人批次调用一次 [`LrScheduler::step`].

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, Result};

/// 学习率调度策略.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Schedule {
    /// 每 `step_size` 步乘以 `gamma`.
    Step {
        /// 衰减间隔.
        step_size: u64,
        /// 衰减系数.
        gamma: f64,
    },
    /// 每步乘以 `gamma`.
    Exponential {
        /// 衰减系数.
        gamma: f64,
    },
    /// 带热重启的余弦退火. 第 `i` 个周期长度为 `t0 * t_mult^i`.
    CosineWarmRestarts {
        /// 第一个周期的长度.
        t0: u64,
        /// 周期长度的增长倍数.
        t_mult: u64,
        /// 学习率下限.
        eta_min: f64,
    },
    /// 周期为 `2 * t_max` 的余弦退火.
    Cosine {
        /// 半周期长度.
        t_max: u64,
        /// 学习率下限.
        eta_min: f64,
    },
    /// 学习率不变.
    Constant,
}

impl Schedule {
    /// 所有可用的名字.
    pub const NAMES: [&'static str; 5] = ["step_lr", "exp_lr", "cosine_wr", "cosine_lr", "constant"];

    /// 配置中使用的名字.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Step { .. } => "step_lr",
            Self::Exponential { .. } => "exp_lr",
            Self::CosineWarmRestarts { .. } => "cosine_wr",
            Self::Cosine { .. } => "cosine_lr",
            Self::Constant => "constant",
        }
    }

    /// 第 `t` 步的学习率.
    pub fn lr_at(&self, base: f64, t: u64) -> f64 {
        match *self {
            Self::Step { step_size, gamma } => base * gamma.powi((t / step_size.max(1)) as i32),
            Self::Exponential { gamma } => base * gamma.powf(t as f64),
            Self::CosineWarmRestarts { t0, t_mult, eta_min } => {
                let (mut t_cur, mut t_i) = (t, t0.max(1));
                while t_cur >= t_i {
                    t_cur -= t_i;
                    t_i = t_i.saturating_mul(t_mult.max(1));
                }
                cosine(base, eta_min, t_cur as f64 / t_i as f64)
            }
            Self::Cosine { t_max, eta_min } => cosine(base, eta_min, t as f64 / t_max.max(1) as f64),
            Self::Constant => base,
        }
    }
}

fn cosine(base: f64, eta_min: f64, progress: f64) -> f64 {
    eta_min + (base - eta_min) * (1.0 + (PI * progress).cos()) / 2.0
}

impl Default for Schedule {
    fn default() -> Self {
        Self::Constant
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Schedule {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "step_lr" => Self::Step {
                step_size: 30,
                gamma: 0.1,
            },
            "exp_lr" => Self::Exponential { gamma: 0.99 },
            "cosine_wr" => Self::CosineWarmRestarts {
                t0: 10,
                t_mult: 2,
                eta_min: 1e-5,
            },
            "cosine_lr" => Self::Cosine {
                t_max: 100,
                eta_min: 1e-6,
            },
            "constant" => Self::Constant,
            other => {
                return Err(PipelineError::InvalidConfig(format!(
                    "unknown scheduler `{other}`; expected one of: {}",
                    Self::NAMES.join(", ")
                )))
            }
        })
    }
}

/// 有状态的学习率调度器.
#[derive(Clone, Debug, PartialEq)]
pub struct LrScheduler {
    schedule: Schedule,
    base_lr: f64,
    steps: u64,
}

impl LrScheduler {
    /// 从第 0 步开始.
    pub fn new(schedule: Schedule, base_lr: f64) -> Self {
        Self {
            schedule,
            base_lr,
            steps: 0,
        }
    }

    /// 当前学习率.
    #[inline]
    pub fn lr(&self) -> f64 {
        self.schedule.lr_at(self.base_lr, self.steps)
    }

    /// 前进一步.
    #[inline]
    pub fn step(&mut self) {
        self.steps += 1;
    }

    /// 已经前进的步数.
    #[inline]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// 恢复到第 `steps` 步. 用于从检查点继续训练.
    #[inline]
    pub fn set_steps(&mut self, steps: u64) {
        self.steps = steps;
    }

    /// 调度策略.
    #[inline]
    pub fn schedule(&self) -> Schedule {
        self.schedule
    }
}

#[cfg(test)]
mod tests {
    use super::{LrScheduler, Schedule};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_step_and_exponential() {
        let s: Schedule = "step_lr".parse().unwrap();
        assert!(close(s.lr_at(1.0, 29), 1.0));
        assert!(close(s.lr_at(1.0, 30), 0.1));
        let e: Schedule = "exp_lr".parse().unwrap();
        assert!(close(e.lr_at(1.0, 2), 0.9801));
    }

    #[test]
    fn test_warm_restarts() {
        let s: Schedule = "cosine_wr".parse().unwrap();
        let base = 1e-3;
        assert!(close(s.lr_at(base, 0), base));
        // 第一个周期 10 步, 第二个周期从第 10 步开始, 长度 20.
        assert!(close(s.lr_at(base, 10), base));
        assert!(close(s.lr_at(base, 30), base));
        assert!(close(s.lr_at(base, 20), 1e-5 + (base - 1e-5) / 2.0));
        assert!(s.lr_at(base, 9) < s.lr_at(base, 5));
    }

    #[test]
    fn test_cosine_reaches_minimum() {
        let s: Schedule = "cosine_lr".parse().unwrap();
        assert!(close(s.lr_at(0.1, 100), 1e-6));
        assert!(close(s.lr_at(0.1, 0), 0.1));
    }

    #[test]
    fn test_scheduler_state() {
        let mut sch = LrScheduler::new("constant".parse().unwrap(), 0.01);
        for _ in 0..5 {
            sch.step();
        }
        assert_eq!(sch.steps(), 5);
        assert!(close(sch.lr(), 0.01));
        assert!("warmup".parse::<Schedule>().is_err());
        assert_eq!(Schedule::NAMES.map(|n| n.parse::<Schedule>().unwrap().name()), Schedule::NAMES);
    }
}
