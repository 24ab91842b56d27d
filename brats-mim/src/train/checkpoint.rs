//! 检查点的存储与加载. 使用 `bincode` 编码.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{LrScheduler, Network};
use crate::error::{PipelineError, Result};

/// 检查点内容.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// 已经完成的轮数.
    pub epoch: usize,
    /// 目前最好的验证损失.
    pub best_loss: f64,
    /// 保存时的学习率.
    pub learning_rate: f64,
    /// 调度器已经前进的步数.
    pub scheduler_steps: u64,
    /// 模型名.
    pub model: String,
    /// 模型参数.
    pub parameters: Vec<f32>,
}

impl CheckpointState {
    /// 记录模型与训练进度.
    pub fn capture(net: &dyn Network, epoch: usize, best_loss: f64, scheduler: &LrScheduler) -> Self {
        Self {
            epoch,
            best_loss,
            learning_rate: scheduler.lr(),
            scheduler_steps: scheduler.steps(),
            model: net.name().to_owned(),
            parameters: net.parameters(),
        }
    }

    /// 保存到 `path`. 父目录不存在时自动创建.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush().map_err(|e| PipelineError::io(path, e))
    }

    /// 从 `path` 读取.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        Ok(bincode::deserialize_from(BufReader::new(file))?)
    }
}

/// 检查点加载方式.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadMethod {
    /// 恢复模型参数与训练进度 (轮数, 最好损失, 调度器).
    Resume,
    /// 只加载模型参数, 用于预训练权重或评估.
    Model,
}

/// 从 `path` 加载检查点到 `net`, 按 `method` 决定是否恢复调度器状态.
///
/// 模型名不一致时只记录警告.
pub fn load_checkpoint<P: AsRef<Path>>(
    path: P,
    net: &mut dyn Network,
    scheduler: Option<&mut LrScheduler>,
    method: LoadMethod,
) -> Result<CheckpointState> {
    let path = path.as_ref();
    let state = CheckpointState::load(path)?;
    if state.model != net.name() {
        log::warn!(
            "checkpoint {} was saved by model `{}`, loading into `{}`",
            path.display(),
            state.model,
            net.name()
        );
    }
    net.load_parameters(&state.parameters)?;

    if method == LoadMethod::Resume {
        if let Some(scheduler) = scheduler {
            scheduler.set_steps(state.scheduler_steps);
        }
        log::info!(
            "resumed from {} at epoch {}, best loss {:.6}",
            path.display(),
            state.epoch,
            state.best_loss
        );
    } else {
        log::info!("loaded model parameters from {}", path.display());
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::{load_checkpoint, CheckpointState, LoadMethod};
    use crate::preprocess::ConcatMethod;
    use crate::train::{LrScheduler, MeanFill, Network, Schedule};

    #[test]
    fn test_resume_restores_parameters_and_scheduler() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("checkpoint_epoch_10.ckpt");

        let mut net = MeanFill::new(ConcatMethod::Plane);
        net.load_parameters(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        let mut sch = LrScheduler::new(Schedule::Exponential { gamma: 0.99 }, 1e-3);
        for _ in 0..7 {
            sch.step();
        }
        CheckpointState::capture(&net, 10, 0.05, &sch).save(&path).unwrap();

        let mut fresh = MeanFill::new(ConcatMethod::Plane);
        let mut fresh_sch = LrScheduler::new(Schedule::Exponential { gamma: 0.99 }, 1e-3);
        let state = load_checkpoint(&path, &mut fresh, Some(&mut fresh_sch), LoadMethod::Resume).unwrap();
        assert_eq!(state.epoch, 10);
        assert_eq!(fresh.parameters(), net.parameters());
        assert_eq!(fresh_sch.steps(), 7);

        let mut model_only = MeanFill::new(ConcatMethod::Plane);
        let mut untouched = LrScheduler::new(Schedule::Constant, 1e-3);
        load_checkpoint(&path, &mut model_only, Some(&mut untouched), LoadMethod::Model).unwrap();
        assert_eq!(model_only.fill(), [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(untouched.steps(), 0);
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut net = MeanFill::new(ConcatMethod::Plane);
        let err = load_checkpoint(dir.path().join("best.ckpt"), &mut net, None, LoadMethod::Model);
        assert!(err.is_err());
    }
}
