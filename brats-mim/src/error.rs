//! 管线运行时错误.

use std::path::PathBuf;

use crate::volume::Modality;

/// 数据管线的统一错误类型.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 期望的模态文件不存在. 整个病人样本不可用.
    #[error("volume file not found: {}", path.display())]
    MissingVolume {
        /// 期望的文件路径.
        path: PathBuf,
    },

    /// nifti 文件解析或写入失败.
    #[error("nifti error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    /// nifti 数据不是 3D 体数据.
    #[error("expected a 3D volume in {}, got shape {shape:?}", path.display())]
    VolumeShape {
        /// 文件路径.
        path: PathBuf,
        /// 实际形状.
        shape: Vec<usize>,
    },

    /// 99 分位数上界为 0 (或接近 0, 或非有限值), 归一化会产生 NaN/Inf.
    #[error("degenerate intensity ceiling {ceiling} (p99); volume is empty or corrupted")]
    DegenerateIntensity {
        /// 计算得到的 99 分位数.
        ceiling: f32,
    },

    /// 体数据中含有 NaN 或 Inf 体素.
    #[error("volume contains {count} non-finite voxels")]
    NonFiniteIntensity {
        /// 非有限体素的个数.
        count: usize,
    },

    /// 体数据在某个轴上小于目标剪裁尺寸.
    #[error("volume too small on {axis} axis: {actual} < target {target}")]
    Undersized {
        /// 轴名 (`depth`, `height`, `width`).
        axis: &'static str,
        /// 原始尺寸.
        actual: usize,
        /// 目标尺寸.
        target: usize,
    },

    /// 同一病人的四个模态形状不一致.
    #[error("modality {modality} has shape {actual:?}, expected {expected:?}")]
    ModalityMismatch {
        /// 出问题的模态.
        modality: Modality,
        /// 实际形状.
        actual: Vec<usize>,
        /// 期望形状 (t1c 的形状).
        expected: Vec<usize>,
    },

    /// 遮蔽模式串不合法.
    #[error("invalid binary mask pattern `{0}`: expected 4 characters of '0'/'1'")]
    InvalidPattern(String),

    /// 遮蔽率不在 `[0, 1]` 内.
    #[error("invalid mask rate {0}: expected a value in [0, 1]")]
    InvalidRate(f64),

    /// 遮蔽块尺寸为 0.
    #[error("mask kernel size must be positive")]
    InvalidKernel,

    /// 未知的运行模式.
    #[error("invalid mode `{0}`; expected one of: 'train', 'valid', 'test'")]
    InvalidMode(String),

    /// 未知的模态拼接方式.
    #[error("invalid concat method `{0}`; expected one of: 'plane', 'channels'")]
    InvalidConcat(String),

    /// 其他配置错误.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// 掩码无法广播到样本形状.
    #[error("mask shape {mask:?} cannot be broadcast to sample shape {sample:?}")]
    MaskShape {
        /// 掩码形状.
        mask: Vec<usize>,
        /// 样本形状.
        sample: Vec<usize>,
    },

    /// 数组形状运算失败.
    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// 清单文件读取失败.
    #[error("manifest error: {0}")]
    Manifest(#[from] csv::Error),

    /// 底层 I/O 错误.
    #[error("io error at {}: {source}", path.display())]
    Io {
        /// 相关路径.
        path: PathBuf,
        /// 原始错误.
        #[source]
        source: std::io::Error,
    },

    /// 数据集为空.
    #[error("dataset is empty")]
    EmptyDataset,

    /// 加载线程异常退出, 其分片中剩余的病人没有输出.
    #[error("loader worker {worker} panicked: {message}")]
    WorkerPanic {
        /// worker 编号.
        worker: usize,
        /// panic 信息.
        message: String,
    },

    /// 检查点编码或解码失败.
    #[cfg(feature = "serde")]
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] bincode::Error),

    /// 预览图像保存失败.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// 管线运行结果.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// 将 `std::io::Error` 与路径绑定.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
