//! 数据集操作.
//!
//! 提供两种数据集协议:
//!
//! 1. [`stream`]: 按 worker 分片, 每个 worker 缓存一个病人的全部切片, 逐切片输出.
//! 2. [`person`]: 由清单文件给出病人列表, 按索引随机访问, 每次输出一个病人的完整体数据.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::consts::{
    DEFAULT_FILE_EXT, DEFAULT_MASK_KERNEL_SIZE, DEFAULT_MASK_RATE, DEFAULT_SLICE_DEEP,
    DEFAULT_SLICE_SIZE,
};
use crate::error::{PipelineError, Result};
use crate::mask::{BinaryPattern, MaskRate, MaskSpec};
use crate::preprocess::{ConcatMethod, CropSize};

pub mod person;
mod pipeline;
pub mod stream;

pub use person::{PatientDataset, PatientLoader};
pub use pipeline::{SamplePair, SamplePipeline};
pub use stream::{ShardedLoader, SliceBatcher, SliceItem, SliceStream, WorkerContext};

/// 运行模式. 决定清单文件名以及是否做随机增强与打乱.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Mode {
    /// 训练: 打乱顺序, 随机翻转.
    #[default]
    Train,
    /// 验证.
    Valid,
    /// 测试.
    Test,
}

impl Mode {
    /// 所有模式.
    pub const ALL: [Mode; 3] = [Self::Train, Self::Valid, Self::Test];

    /// 清单文件名 (不含扩展名).
    #[inline]
    pub const fn split_name(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Valid => "valid",
            Self::Test => "test",
        }
    }

    /// 是否为训练模式.
    #[inline]
    pub const fn is_train(self) -> bool {
        matches!(self, Self::Train)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.split_name())
    }
}

impl FromStr for Mode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.split_name() == s)
            .ok_or_else(|| PipelineError::InvalidMode(s.to_owned()))
    }
}

/// 数据集配置.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DatasetConfig {
    /// 病人目录所在的根目录.
    pub root: PathBuf,
    /// 清单文件所在目录.
    pub list_dir: PathBuf,
    /// 模态文件扩展名.
    pub file_ext: String,
    /// 剪裁后的深度.
    pub slice_deep: usize,
    /// 剪裁后的平面边长.
    pub slice_size: usize,
    /// 遮蔽块边长.
    pub mask_kernel_size: usize,
    /// 各模态是否参与遮蔽.
    pub binary_mask: BinaryPattern,
    /// 遮蔽率.
    pub mask_rate: f64,
    /// 运行模式.
    pub mode: Mode,
    /// 模态拼接方式.
    pub concat_method: ConcatMethod,
    /// 分片 worker 数量, 至少为 1.
    pub num_workers: usize,
    /// 每次生成掩码时是否从 `[0, mask_rate]` 中随机抽取遮蔽率.
    pub is_random: bool,
    /// 随机种子. `None` 时使用系统熵.
    pub seed: Option<u64>,
    /// 每个 worker 预取的切片数.
    pub prefetch: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            list_dir: PathBuf::new(),
            file_ext: DEFAULT_FILE_EXT.to_owned(),
            slice_deep: DEFAULT_SLICE_DEEP,
            slice_size: DEFAULT_SLICE_SIZE,
            mask_kernel_size: DEFAULT_MASK_KERNEL_SIZE,
            binary_mask: BinaryPattern::ALL,
            mask_rate: DEFAULT_MASK_RATE,
            mode: Mode::Train,
            concat_method: ConcatMethod::Plane,
            num_workers: 1,
            is_random: false,
            seed: None,
            prefetch: 4,
        }
    }
}

impl DatasetConfig {
    /// 以 `root` 为病人根目录, 其余使用默认值.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_owned();
        Self {
            list_dir: root.clone(),
            root,
            ..Self::default()
        }
    }

    /// 检查配置是否合法.
    pub fn validate(&self) -> Result<()> {
        if self.slice_deep == 0 || self.slice_size == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "crop size must be positive, got depth {} size {}",
                self.slice_deep, self.slice_size
            )));
        }
        if self.num_workers == 0 {
            return Err(PipelineError::InvalidConfig(
                "num_workers must be at least 1".to_owned(),
            ));
        }
        self.mask_spec().map(|_| ())
    }

    /// 剪裁尺寸.
    #[inline]
    pub fn crop_size(&self) -> CropSize {
        CropSize::square(self.slice_deep, self.slice_size)
    }

    /// 遮蔽参数.
    pub fn mask_spec(&self) -> Result<MaskSpec> {
        let rate = MaskRate::new(self.mask_rate, self.is_random)?;
        MaskSpec::new(self.mask_kernel_size, self.binary_mask, rate)
    }

    /// 单个病人拼接样本的形状.
    pub fn sample_shape(&self) -> Vec<usize> {
        self.concat_method.composite_shape(self.crop_size().dim())
    }

    /// 单个切片的形状 (去掉深度轴).
    pub fn slice_shape(&self) -> Vec<usize> {
        self.sample_shape()[1..].to_vec()
    }
}

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

#[cfg(test)]
mod tests {
    use super::{DatasetConfig, Mode};
    use crate::error::PipelineError;

    #[test]
    fn test_mode_parse() {
        assert_eq!("valid".parse::<Mode>().unwrap(), Mode::Valid);
        let err = "eval".parse::<Mode>().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidMode(_)));
        let msg = err.to_string();
        for name in ["train", "valid", "test"] {
            assert!(msg.contains(name));
        }
    }

    #[test]
    fn test_config_validation() {
        let cfg = DatasetConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.sample_shape(), [128, 384, 384]);
        assert_eq!(cfg.slice_shape(), [384, 384]);

        let bad = DatasetConfig {
            mask_rate: 1.2,
            ..DatasetConfig::default()
        };
        assert!(matches!(bad.validate(), Err(PipelineError::InvalidRate(_))));
        let bad = DatasetConfig {
            num_workers: 0,
            ..DatasetConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = DatasetConfig {
            mask_kernel_size: 0,
            ..DatasetConfig::default()
        };
        assert!(matches!(bad.validate(), Err(PipelineError::InvalidKernel)));
    }
}
