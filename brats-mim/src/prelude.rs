//! 🧠欢迎光临🧪
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::dataset::person::{PatientDataset, PatientLoader};
pub use crate::dataset::stream::{ShardedLoader, SliceBatcher, SliceItem};
pub use crate::dataset::{DatasetConfig, Mode, SamplePair, SamplePipeline};
pub use crate::mask::{BinaryPattern, MaskRate, MaskSpec, MaskStrategy, OcclusionMask};
pub use crate::preprocess::{ConcatMethod, CropSize, FlipAction};
pub use crate::train::{Batch, Network, StepBatch, TrainConfig, Trainer};
pub use crate::{Idx3d, Modality, MriVolume, PatientRecord, PipelineError, Result};
