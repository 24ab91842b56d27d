//! 数据集位置的查找.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use brats_mim::dataset::home_dataset_dir_with;

/// 获取 BraTS 训练集基本路径.
///
/// 1. 若环境变量 `$BRATS_TRAIN_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/brats/train`.
pub fn train_dir_from_env_or_home() -> Result<PathBuf> {
    dir_from_env_or_home("BRATS_TRAIN_DIR", "train")
}

/// 获取 BraTS 验证 / 测试集基本路径.
///
/// 1. 若环境变量 `$BRATS_TEST_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/brats/test`.
pub fn test_dir_from_env_or_home() -> Result<PathBuf> {
    dir_from_env_or_home("BRATS_TEST_DIR", "test")
}

fn dir_from_env_or_home(var: &str, split: &str) -> Result<PathBuf> {
    match env::var(var) {
        Ok(d) if !d.is_empty() => Ok(PathBuf::from(d)),
        _ => home_dataset_dir_with(["brats", split])
            .with_context(|| format!("${var} is not set and the home directory is unknown")),
    }
}
