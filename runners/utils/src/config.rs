//! 运行配置文件.
//!
//! TOML 格式, 分为 `[data]`, `[train]`, `[mask]`, `[test]` 四节. 缺省的字段使用默认值.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use brats_mim::consts::{
    DEFAULT_FILE_EXT, DEFAULT_MASK_KERNEL_SIZE, DEFAULT_MASK_RATE, DEFAULT_SLICE_DEEP,
    DEFAULT_SLICE_SIZE,
};
use brats_mim::dataset::{DatasetConfig, Mode};
use brats_mim::mask::BinaryPattern;
use brats_mim::preprocess::ConcatMethod;
use brats_mim::train::TrainConfig;
use serde::{Deserialize, Serialize};

use crate::loader;

/// `[data]`: 数据位置与加载方式.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSection {
    /// 训练集根目录. 缺省时见 [`loader::train_dir_from_env_or_home`].
    pub train: Option<PathBuf>,
    /// 验证 / 测试集根目录. 缺省时见 [`loader::test_dir_from_env_or_home`].
    pub test: Option<PathBuf>,
    /// 清单文件目录.
    pub list_dir: PathBuf,
    pub file_ext: String,
    pub concat: ConcatMethod,
    /// 分片流式加载的 worker 数. 按病人批量加载时不使用.
    pub num_workers: usize,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            train: None,
            test: None,
            list_dir: PathBuf::from("data/list"),
            file_ext: DEFAULT_FILE_EXT.to_owned(),
            concat: ConcatMethod::Plane,
            num_workers: 4,
        }
    }
}

/// `[train]`: 训练超参数.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainSection {
    pub model: String,
    pub epochs: usize,
    pub batch_size: usize,
    pub slice_deep: usize,
    pub slice_size: usize,
    pub step_slice: usize,
    pub learning_rate: f64,
    pub scheduler: String,
    pub save_root: PathBuf,
    pub checkpoint_every: usize,
    pub seed: Option<u64>,
}

impl Default for TrainSection {
    fn default() -> Self {
        let t = TrainConfig::default();
        Self {
            model: t.model,
            epochs: t.epochs,
            batch_size: t.batch_size,
            slice_deep: DEFAULT_SLICE_DEEP,
            slice_size: DEFAULT_SLICE_SIZE,
            step_slice: t.step_slice,
            learning_rate: t.learning_rate,
            scheduler: t.scheduler,
            save_root: t.save_root,
            checkpoint_every: t.checkpoint_every,
            seed: t.seed,
        }
    }
}

/// `[mask]`: 训练与测试时的遮蔽参数.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskSection {
    pub mask_kernel_size: usize,
    pub train_binary_mask: BinaryPattern,
    pub test_binary_mask: BinaryPattern,
    pub train_mask_rate: f64,
    pub test_mask_rate: f64,
    pub is_random: bool,
}

impl Default for MaskSection {
    fn default() -> Self {
        Self {
            mask_kernel_size: DEFAULT_MASK_KERNEL_SIZE,
            train_binary_mask: BinaryPattern::ALL,
            test_binary_mask: BinaryPattern::ALL,
            train_mask_rate: DEFAULT_MASK_RATE,
            test_mask_rate: DEFAULT_MASK_RATE,
            is_random: false,
        }
    }
}

/// `[test]`: 评估使用的模型与检查点.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSection {
    pub model: Option<String>,
    pub ckpt: Option<PathBuf>,
}

/// 完整的运行配置.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub data: DataSection,
    pub train: TrainSection,
    pub mask: MaskSection,
    pub test: TestSection,
}

impl RunConfig {
    /// 读取 TOML 配置文件.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// 读取 `path`; 为 `None` 时使用默认配置.
    pub fn from_file_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    /// 某个运行模式下的数据集配置. 训练模式使用训练集根目录与训练遮蔽参数,
    /// 其余模式使用测试集根目录与测试遮蔽参数.
    pub fn dataset_config(&self, mode: Mode) -> Result<DatasetConfig> {
        let (root, pattern, rate) = match mode {
            Mode::Train => (
                self.data.train.clone().map_or_else(loader::train_dir_from_env_or_home, Ok)?,
                self.mask.train_binary_mask,
                self.mask.train_mask_rate,
            ),
            Mode::Valid | Mode::Test => (
                self.data.test.clone().map_or_else(loader::test_dir_from_env_or_home, Ok)?,
                self.mask.test_binary_mask,
                self.mask.test_mask_rate,
            ),
        };
        let cfg = DatasetConfig {
            root,
            list_dir: self.data.list_dir.clone(),
            file_ext: self.data.file_ext.clone(),
            slice_deep: self.train.slice_deep,
            slice_size: self.train.slice_size,
            mask_kernel_size: self.mask.mask_kernel_size,
            binary_mask: pattern,
            mask_rate: rate,
            mode,
            concat_method: self.data.concat,
            num_workers: self.data.num_workers.max(1),
            is_random: self.mask.is_random,
            seed: self.train.seed,
            ..DatasetConfig::default()
        };
        cfg.validate()
            .with_context(|| format!("invalid {mode} dataset configuration"))?;
        Ok(cfg)
    }

    /// 训练循环配置.
    pub fn train_config(&self) -> TrainConfig {
        TrainConfig {
            model: self.train.model.clone(),
            epochs: self.train.epochs,
            batch_size: self.train.batch_size,
            step_slice: self.train.step_slice,
            learning_rate: self.train.learning_rate,
            scheduler: self.train.scheduler.clone(),
            save_root: self.train.save_root.clone(),
            checkpoint_every: self.train.checkpoint_every,
            seed: self.train.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RunConfig;
    use brats_mim::dataset::Mode;
    use brats_mim::preprocess::ConcatMethod;

    const SAMPLE: &str = r#"
[data]
train = "/data/brats/train"
test = "/data/brats/test"
list_dir = "data/list/pre-test-50"
concat = "channels"

[train]
epochs = 50
step_slice = 8
scheduler = "cosine_wr"

[mask]
train_binary_mask = "1000"
test_binary_mask = "0100"
train_mask_rate = 0.75
"#;

    #[test]
    fn test_parse_sections() {
        let cfg: RunConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.data.concat, ConcatMethod::Channels);
        assert_eq!(cfg.train.epochs, 50);
        assert_eq!(cfg.train.slice_deep, 128);

        let train = cfg.dataset_config(Mode::Train).unwrap();
        assert_eq!(train.root, std::path::Path::new("/data/brats/train"));
        assert_eq!(train.binary_mask.to_string(), "1000");
        assert_eq!(train.mask_rate, 0.75);

        let valid = cfg.dataset_config(Mode::Valid).unwrap();
        assert_eq!(valid.root, std::path::Path::new("/data/brats/test"));
        assert_eq!(valid.binary_mask.to_string(), "0100");
        assert_eq!(valid.mask_rate, 0.5);

        let train_cfg = cfg.train_config();
        assert_eq!(train_cfg.scheduler, "cosine_wr");
        assert_eq!(train_cfg.step_slice, 8);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let bad = "[mask]\ntrain_binary_mask = \"10x0\"\n";
        assert!(toml::from_str::<RunConfig>(bad).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brats.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = RunConfig::from_file(&path).unwrap();
        assert_eq!(cfg.mask.test_binary_mask.to_string(), "0100");
        assert!(RunConfig::from_file(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_num_workers_is_clamped() {
        let cfg: RunConfig = toml::from_str(SAMPLE).unwrap();
        let cfg = RunConfig {
            data: super::DataSection {
                num_workers: 0,
                ..cfg.data
            },
            ..cfg
        };
        // 0 个 worker 按 1 个处理, 否则分片加载器没有输出.
        assert_eq!(cfg.dataset_config(Mode::Train).unwrap().num_workers, 1);
    }
}
