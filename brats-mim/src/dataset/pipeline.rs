//! 单个病人的完整预处理链: 读取, 归一化, 剪裁, 翻转, 拼接, 遮蔽.

use ndarray::{Array3, ArrayD};
use rand::RngCore;

use super::{DatasetConfig, Mode};
use crate::error::Result;
use crate::mask::{strategy_for, BinaryPattern, MaskStrategy};
use crate::preprocess::{center_crop, compose, normalize, ConcatMethod, CropSize, FlipAction};
use crate::volume::{Modality, PatientRecord};

/// 一个训练样本: 遮蔽后的输入与未遮蔽的原始拼接数据. 两者形状相同.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplePair {
    /// 遮蔽后的拼接样本, 作为网络输入.
    pub masked: ArrayD<f32>,
    /// 未遮蔽的拼接样本, 作为重建目标.
    pub original: ArrayD<f32>,
}

/// 由配置确定的样本生成器. 不持有可变状态, 可在线程间共享.
#[derive(Debug)]
pub struct SamplePipeline {
    file_ext: String,
    crop: CropSize,
    mode: Mode,
    method: ConcatMethod,
    pattern: BinaryPattern,
    strategy: Box<dyn MaskStrategy>,
}

impl SamplePipeline {
    /// 从数据集配置创建. 配置不合法时返回错误.
    pub fn new(cfg: &DatasetConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            file_ext: cfg.file_ext.clone(),
            crop: cfg.crop_size(),
            mode: cfg.mode,
            method: cfg.concat_method,
            pattern: cfg.binary_mask,
            strategy: strategy_for(cfg.concat_method, cfg.mask_spec()?),
        })
    }

    /// 运行模式.
    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// 拼接方式.
    #[inline]
    pub fn method(&self) -> ConcatMethod {
        self.method
    }

    /// 遮蔽模式.
    #[inline]
    pub fn pattern(&self) -> BinaryPattern {
        self.pattern
    }

    /// 输出样本的形状. 只取决于配置.
    #[inline]
    pub fn sample_shape(&self) -> Vec<usize> {
        self.method.composite_shape(self.crop.dim())
    }

    /// 读取并预处理 (归一化, 剪裁) 单个模态.
    pub fn prepare_modality(&self, patient: &PatientRecord, modality: Modality) -> Result<Array3<f32>> {
        let volume = patient.load(modality, &self.file_ext)?;
        let normalized = normalize(volume.into_data())?;
        center_crop(&normalized, self.crop)
    }

    /// 读取并预处理四个输入模态, 按 [`Modality::INPUTS`] 顺序返回.
    pub fn load_modalities(&self, patient: &PatientRecord) -> Result<[Array3<f32>; 4]> {
        let [a, b, c, d] = Modality::INPUTS;
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                let ((t1c, t1n), (t2w, t2f)) = rayon::join(
                    || rayon::join(|| self.prepare_modality(patient, a), || self.prepare_modality(patient, b)),
                    || rayon::join(|| self.prepare_modality(patient, c), || self.prepare_modality(patient, d)),
                );
            } else {
                let (t1c, t1n) = (self.prepare_modality(patient, a), self.prepare_modality(patient, b));
                let (t2w, t2f) = (self.prepare_modality(patient, c), self.prepare_modality(patient, d));
            }
        }
        Ok([t1c?, t1n?, t2w?, t2f?])
    }

    /// 生成未遮蔽的拼接样本. 训练模式下对四个模态施加同一个随机翻转.
    pub fn composite(&self, patient: &PatientRecord, rng: &mut dyn RngCore) -> Result<ArrayD<f32>> {
        let mut volumes = self.load_modalities(patient)?;
        if self.mode.is_train() {
            let action = FlipAction::random(rng);
            volumes = volumes.map(|v| action.apply(v));
        }
        compose(self.method, volumes)
    }

    /// 生成一个病人的 (遮蔽, 原始) 样本对.
    pub fn sample(&self, patient: &PatientRecord, rng: &mut dyn RngCore) -> Result<SamplePair> {
        let original = self.composite(patient, &mut *rng)?;
        let (mask, masked) = self.strategy.mask_sample(&original, rng)?;
        log::debug!(
            "patient {}: sample {:?}, occluded {:.3}",
            patient.id(),
            original.shape(),
            mask.occluded_fraction()
        );
        Ok(SamplePair { masked, original })
    }
}
