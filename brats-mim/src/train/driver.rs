//! 训练与评估循环.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::ArrayD;

use super::batch::{step_select, volume_steps, StepBatch};
use super::criterion::{Criterion, MaskedMse, Metric, Psnr};
use super::scheduler::{LrScheduler, Schedule};
use super::Network;
use crate::dataset::person::{PatientDataset, PatientLoader};
use crate::error::{PipelineError, Result};
use crate::mask::BinaryPattern;
use crate::volume::Modality;

#[cfg(feature = "serde")]
use super::checkpoint::CheckpointState;

/// 训练配置.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrainConfig {
    /// 模型名, 也是保存目录的一级子目录名.
    pub model: String,
    /// 总轮数.
    pub epochs: usize,
    /// 每个批次的病人数.
    pub batch_size: usize,
    /// 每个训练步使用的切片数.
    pub step_slice: usize,
    /// 初始学习率.
    pub learning_rate: f64,
    /// 学习率调度策略名, 见 [`Schedule::NAMES`].
    pub scheduler: String,
    /// 保存根目录.
    pub save_root: PathBuf,
    /// 每隔多少轮保存一次检查点.
    pub checkpoint_every: usize,
    /// 加载顺序与遮蔽的随机种子.
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            model: "mean_fill".to_owned(),
            epochs: 100,
            batch_size: 1,
            step_slice: 16,
            learning_rate: 1e-3,
            scheduler: "constant".to_owned(),
            save_root: PathBuf::from("result/models"),
            checkpoint_every: 10,
            seed: None,
        }
    }
}

impl TrainConfig {
    /// 本次运行的保存目录 `{save_root}/{model}/{pattern}-{timestamp}`.
    pub fn run_dir(&self, pattern: BinaryPattern, timestamp: &str) -> PathBuf {
        self.save_root
            .join(&self.model)
            .join(format!("{pattern}-{timestamp}"))
    }

    /// 解析学习率调度策略.
    pub fn schedule(&self) -> Result<Schedule> {
        self.scheduler.parse()
    }
}

/// 一次评估的结果.
#[derive(Clone, Debug, PartialEq)]
pub struct EvalReport {
    /// 每步平均损失.
    pub loss: f64,
    /// 每个模态的平均 PSNR, 顺序见 [`Modality::INPUTS`].
    pub psnr: [f64; 4],
    /// 参与平均的步数.
    pub steps: usize,
    /// 因加载失败被跳过的批次数.
    pub skipped: usize,
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loss {:.4}, PSNR", self.loss)?;
        for (m, v) in Modality::INPUTS.iter().zip(self.psnr) {
            write!(f, " {}: {v:.4}", m.display_name())?;
        }
        Ok(())
    }
}

/// 一轮训练的结果.
#[derive(Clone, Debug, PartialEq)]
pub struct EpochReport {
    /// 轮次, 从 1 开始.
    pub epoch: usize,
    /// 训练集上每步的平均损失.
    pub train_loss: f64,
    /// 本轮结束时的验证结果.
    pub valid: EvalReport,
    /// 本轮结束时的学习率.
    pub lr: f64,
}

/// 整个训练过程的结果.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FitSummary {
    /// 最好的验证损失 (包括恢复训练前的记录).
    pub best_loss: f64,
    /// 本次训练中取得最好损失的轮次. 没有改进时为 `None`.
    pub best_epoch: Option<usize>,
    /// 每一轮的结果.
    pub history: Vec<EpochReport>,
}

/// 训练器. 持有调度器与训练进度, 模型与数据集由调用方提供.
#[derive(Debug)]
pub struct Trainer {
    cfg: TrainConfig,
    scheduler: LrScheduler,
    start_epoch: usize,
    best_loss: f64,
}

impl Trainer {
    /// 检查配置并创建调度器. 轮数, 批大小, 步长为 0 或调度策略未知时返回错误.
    pub fn new(cfg: TrainConfig) -> Result<Self> {
        if cfg.epochs == 0 || cfg.batch_size == 0 || cfg.step_slice == 0 {
            return Err(PipelineError::InvalidConfig(
                "epochs, batch_size and step_slice must be positive".to_owned(),
            ));
        }
        let scheduler = LrScheduler::new(cfg.schedule()?, cfg.learning_rate);
        Ok(Self {
            cfg,
            scheduler,
            start_epoch: 0,
            best_loss: f64::INFINITY,
        })
    }

    /// 训练配置.
    #[inline]
    pub fn config(&self) -> &TrainConfig {
        &self.cfg
    }

    /// 学习率调度器.
    #[inline]
    pub fn scheduler(&self) -> &LrScheduler {
        &self.scheduler
    }

    /// 可变的学习率调度器, 用于从检查点恢复.
    #[inline]
    pub fn scheduler_mut(&mut self) -> &mut LrScheduler {
        &mut self.scheduler
    }

    /// 从第 `epoch` 轮之后继续训练, 并沿用之前的最好损失.
    pub fn resume_at(&mut self, epoch: usize, best_loss: f64) {
        self.start_epoch = epoch;
        self.best_loss = best_loss;
    }

    /// 训练 `net`, 每轮结束后在 `valid` 上评估. 检查点写入 `run_dir`.
    pub fn fit(
        &mut self,
        net: &mut dyn Network,
        train: &PatientDataset,
        valid: &PatientDataset,
        run_dir: &Path,
    ) -> Result<FitSummary> {
        if train.is_empty() || valid.is_empty() {
            return Err(PipelineError::EmptyDataset);
        }
        fs::create_dir_all(run_dir).map_err(|e| PipelineError::io(run_dir, e))?;
        log::info!("save model in {}", run_dir.display());
        log::info!("training settings: {:?}", self.cfg);

        let criterion = MaskedMse::new(train.pipeline().method());
        let pattern = train.pipeline().pattern();
        let steps = volume_steps(train.pipeline().sample_shape()[0], self.cfg.step_slice);

        let mut summary = FitSummary {
            best_loss: self.best_loss,
            ..FitSummary::default()
        };
        for epoch in self.start_epoch..self.cfg.epochs {
            let mut running = 0.0;
            let mut count = 0usize;
            let loader = PatientLoader::new(train, self.cfg.batch_size, self.cfg.seed, epoch as u64);
            for batch in loader {
                let batch = match batch {
                    Ok(b) => b.swap_batch_slice(),
                    Err(e) => {
                        log::warn!("epoch {}: skipping batch: {e}", epoch + 1);
                        continue;
                    }
                };
                for step in 0..steps {
                    let sb = step_select(&batch, step, steps);
                    let lr = self.scheduler.lr();
                    let output = net.train_step(&sb.masked, &sb.original, pattern, lr);
                    running += criterion.loss(&output, &sb.original, pattern);
                    count += 1;
                }
                self.scheduler.step();
                log::debug!(
                    "epoch {}/{}: step {count}, avg loss {:.6}",
                    epoch + 1,
                    self.cfg.epochs,
                    running / count.max(1) as f64
                );
            }
            let train_loss = running / count.max(1) as f64;

            let valid_report = evaluate(net, valid, &self.cfg)?;
            log::info!(
                "epoch {}/{}: train loss {train_loss:.6}, lr {:.3e}",
                epoch + 1,
                self.cfg.epochs,
                self.scheduler.lr()
            );
            log::info!("validation {valid_report}");

            if valid_report.loss < self.best_loss {
                self.best_loss = valid_report.loss;
                summary.best_epoch = Some(epoch + 1);
                let path = run_dir.join(format!("best_model_epoch_{}.ckpt", epoch + 1));
                self.save_state(net, epoch + 1, &path)?;
            }
            if self.cfg.checkpoint_every > 0 && (epoch + 1) % self.cfg.checkpoint_every == 0 {
                let path = run_dir.join(format!("checkpoint_epoch_{}.ckpt", epoch + 1));
                self.save_state(net, epoch + 1, &path)?;
            }

            summary.history.push(EpochReport {
                epoch: epoch + 1,
                train_loss,
                valid: valid_report,
                lr: self.scheduler.lr(),
            });
        }
        summary.best_loss = self.best_loss;
        Ok(summary)
    }

    fn save_state(&self, net: &dyn Network, epoch: usize, path: &Path) -> Result<()> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "serde")] {
                CheckpointState::capture(net, epoch, self.best_loss, &self.scheduler).save(path)?;
                log::info!("saved checkpoint at epoch {epoch} to {}", path.display());
            } else {
                let _ = (net, epoch);
                log::warn!("checkpoint support disabled, not saving {}", path.display());
            }
        }
        Ok(())
    }
}

/// 在 `dataset` 上评估 `net`.
pub fn evaluate(net: &dyn Network, dataset: &PatientDataset, cfg: &TrainConfig) -> Result<EvalReport> {
    evaluate_with(net, dataset, cfg, |_, _| Ok(()))
}

/// 在 `dataset` 上评估 `net`, 每一步的输入与输出交给 `inspect` (例如保存预览图).
pub fn evaluate_with<F>(
    net: &dyn Network,
    dataset: &PatientDataset,
    cfg: &TrainConfig,
    mut inspect: F,
) -> Result<EvalReport>
where
    F: FnMut(&StepBatch, &ArrayD<f32>) -> Result<()>,
{
    let method = dataset.pipeline().method();
    let pattern = dataset.pipeline().pattern();
    let criterion = MaskedMse::new(method);
    let metric = Psnr::new(method);
    let steps = volume_steps(dataset.pipeline().sample_shape()[0], cfg.step_slice);

    let mut loss = 0.0;
    let mut psnr = [0.0; 4];
    let mut count = 0usize;
    let mut skipped = 0usize;
    for batch in PatientLoader::new(dataset, cfg.batch_size, cfg.seed, 0) {
        let batch = match batch {
            Ok(b) => b.swap_batch_slice(),
            Err(e) => {
                log::warn!("evaluation: skipping batch: {e}");
                skipped += 1;
                continue;
            }
        };
        for step in 0..steps {
            let sb = step_select(&batch, step, steps);
            let output = net.forward(&sb.masked);
            loss += criterion.loss(&output, &sb.original, pattern);
            for (acc, v) in psnr.iter_mut().zip(metric.scores(&output, &sb.original, pattern)) {
                *acc += v;
            }
            count += 1;
            inspect(&sb, &output)?;
        }
    }
    if count == 0 {
        return Err(PipelineError::EmptyDataset);
    }

    let n = count as f64;
    Ok(EvalReport {
        loss: loss / n,
        psnr: psnr.map(|v| v / n),
        steps: count,
        skipped,
    })
}
