//! 遮蔽重建评估入口.
//!
//! ```text
//! brats-evaluate --config config/brats.toml --load-dir result/models/mean_fill/1000-10-16-09-30-00/best_model_epoch_12.ckpt --show
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use brats_mim::dataset::{Mode, PatientDataset};
use brats_mim::preprocess::ConcatMethod;
use brats_mim::preview::save_triplet;
use brats_mim::train::{evaluate_with, load_checkpoint, LoadMethod, MeanFill, Network};
use clap::Parser;
use ndarray::Axis;
use utils::RunConfig;

#[derive(Debug, Parser)]
#[command(name = "brats-evaluate", about = "Evaluate masked reconstruction on BraTS volumes")]
struct Args {
    /// TOML 配置文件.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 检查点路径, 覆盖配置文件 `[test] ckpt`.
    #[arg(long)]
    load_dir: Option<PathBuf>,

    /// 拼接方式, 覆盖配置文件: `plane` 或 `channels`.
    #[arg(long, value_parser = parse_concat)]
    concat: Option<ConcatMethod>,

    /// 保存 (遮蔽输入 | 原始 | 重建) 对比图.
    #[arg(long)]
    show: bool,

    /// 最多保存多少张对比图.
    #[arg(long, default_value_t = 16)]
    show_limit: usize,

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
    let Some(ckpt) = args.load_dir.or_else(|| run.test.ckpt.clone()) else {
        bail!("no checkpoint given, use --load-dir or `[test] ckpt`");
    };
    if !ckpt.is_file() {
        bail!("checkpoint file not found at {}", ckpt.display());
    }

    let method = run.data.concat;
    let test_cfg = run.dataset_config(Mode::Test)?;
    let test_set = PatientDataset::new(&test_cfg).context("failed to load test set")?;

    let model = run.test.model.clone().unwrap_or_else(|| run.train.model.clone());
    let mut net = build_network(&model, method)?;
    load_checkpoint(&ckpt, net.as_mut(), None, LoadMethod::Model)?;

    let preview_dir = ckpt
        .parent()
        .map_or_else(|| PathBuf::from("preview"), |p| p.join("preview"));
    let mut shown = 0usize;
    let report = evaluate_with(net.as_ref(), &test_set, &run.train_config(), |batch, output| {
        if !args.show || shown >= args.show_limit {
            return Ok(());
        }
        let path = preview_dir.join(format!("step_{shown}.png"));
        std::fs::create_dir_all(&preview_dir)
            .map_err(|e| brats_mim::PipelineError::io(&preview_dir, e))?;
        save_triplet(
            batch.masked.index_axis(Axis(0), 0),
            batch.original.index_axis(Axis(0), 0),
            output.index_axis(Axis(0), 0),
            method,
            &path,
        )?;
        shown += 1;
        Ok(())
    })?;

    utils::sep();
    log::info!("test pattern {}: {report}", test_cfg.binary_mask);
    log::info!("{} steps evaluated, {} batches skipped", report.steps, report.skipped);
    if shown > 0 {
        log::info!("saved {shown} previews to {}", preview_dir.display());
    }
    Ok(())
}
