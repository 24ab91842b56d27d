//! 遮蔽重建训练入口.
//!
//! ```text
//! brats-train --config config/brats.toml --concat channels --scheduler cosine_wr
//! ```

use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use brats_mim::dataset::{Mode, PatientDataset};
use brats_mim::preprocess::ConcatMethod;
use brats_mim::train::{load_checkpoint, LoadMethod, MeanFill, Network, Trainer};
use clap::Parser;
use utils::RunConfig;

#[derive(Debug, Parser)]
#[command(name = "brats-train", about = "Masked reconstruction training on BraTS volumes")]
struct Args {
    /// TOML 配置文件.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 拼接方式, 覆盖配置文件: `plane` 或 `channels`.
    #[arg(long, value_parser = parse_concat)]
    concat: Option<ConcatMethod>,

    /// 初始学习率, 覆盖配置文件.
    #[arg(long)]
    learning_rate: Option<f64>,

    /// 学习率调度策略, 覆盖配置文件.
    #[arg(long)]
    scheduler: Option<String>,

    /// 遮蔽率在 `[0, rate]` 内随机抽取.
    #[arg(long)]
    mask_random: bool,

    /// 总轮数, 覆盖配置文件.
    #[arg(long)]
    epochs: Option<usize>,

    /// 从检查点恢复训练进度.
    #[arg(long, conflicts_with = "pretrain")]
    resume: Option<PathBuf>,

    /// 从检查点加载预训练模型参数.
    #[arg(long)]
    pretrain: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_concat(s: &str) -> Result<ConcatMethod, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn build_network(name: &str, method: ConcatMethod) -> Result<Box<dyn Network>> {
    match name {
        "mean_fill" => Ok(Box::new(MeanFill::new(method))),
        other => bail!("unknown model `{other}`, available: mean_fill"),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    utils::init_logger(&args.log_level)?;

    let mut run = RunConfig::from_file_or_default(args.config.as_deref())?;
    if let Some(concat) = args.concat {
        run.data.concat = concat;
    }
    if let Some(lr) = args.learning_rate {
        run.train.learning_rate = lr;
    }
    if let Some(scheduler) = args.scheduler {
        run.train.scheduler = scheduler;
    }
    if let Some(epochs) = args.epochs {
        run.train.epochs = epochs;
    }
    run.mask.is_random |= args.mask_random;
    log::info!("{} cpus available for batch loading", utils::cpus());

    let train_cfg = run.dataset_config(Mode::Train)?;
    let valid_cfg = run.dataset_config(Mode::Valid)?;
    let train_set = PatientDataset::new(&train_cfg).context("failed to load training set")?;
    let valid_set = PatientDataset::new(&valid_cfg).context("failed to load validation set")?;

    let mut net = build_network(&run.train.model, run.data.concat)?;
    let mut trainer = Trainer::new(run.train_config())?;

    if let Some(path) = &args.resume {
        match load_checkpoint(path, net.as_mut(), Some(trainer.scheduler_mut()), LoadMethod::Resume) {
            Ok(state) => trainer.resume_at(state.epoch, state.best_loss),
            Err(e) => {
                log::error!("failed to resume from {}: {e}", path.display());
                process::exit(1);
            }
        }
    } else if let Some(path) = &args.pretrain {
        if let Err(e) = load_checkpoint(path, net.as_mut(), None, LoadMethod::Model) {
            log::error!("failed to load pretrained model from {}: {e}", path.display());
            process::exit(1);
        }
    }

    let run_dir = trainer
        .config()
        .run_dir(train_cfg.binary_mask, &utils::timestamp());
    utils::sep();
    let summary = trainer.fit(net.as_mut(), &train_set, &valid_set, &run_dir)?;
    utils::sep();
    match summary.best_epoch {
        Some(epoch) => log::info!(
            "training finished, best validation loss {:.6} at epoch {epoch}",
            summary.best_loss
        ),
        None => log::info!("training finished without improving on {:.6}", summary.best_loss),
    }
    Ok(())
}
