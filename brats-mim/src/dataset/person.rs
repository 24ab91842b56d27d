//! 按病人索引访问的数据集.
//!
//! 病人列表来自清单文件 `{list_dir}/{split}.csv`, 每行一个病人编号, 无表头.
//! 每次访问都完整执行一次预处理与遮蔽, 没有缓存, 也没有分片.

use std::path::Path;

use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{DatasetConfig, SamplePair, SamplePipeline};
use crate::error::{PipelineError, Result};
use crate::train::Batch;
use crate::volume::PatientRecord;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 读取清单文件中的病人编号. 空行被忽略.
pub fn read_manifest<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path.as_ref())?;

    let mut ids = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(id) = record.get(0).map(str::trim).filter(|s| !s.is_empty()) {
            ids.push(id.to_owned());
        }
    }
    Ok(ids)
}

/// 按病人索引访问的数据集.
#[derive(Debug)]
pub struct PatientDataset {
    pipeline: SamplePipeline,
    patients: Vec<PatientRecord>,
}

impl PatientDataset {
    /// 按配置中的运行模式读取清单文件 `{list_dir}/{split}.csv` 构建数据集.
    pub fn new(cfg: &DatasetConfig) -> Result<Self> {
        let manifest = cfg.list_dir.join(format!("{}.csv", cfg.mode.split_name()));
        let patients = read_manifest(&manifest)?
            .into_iter()
            .map(|id| PatientRecord::new(&cfg.root, id))
            .collect();
        Self::from_patients(cfg, patients)
    }

    /// 由给定的病人列表构建.
    pub fn from_patients(cfg: &DatasetConfig, patients: Vec<PatientRecord>) -> Result<Self> {
        let pipeline = SamplePipeline::new(cfg)?;
        log::info!(
            "{} dataset: {} patients, sample shape {:?}",
            cfg.mode,
            patients.len(),
            pipeline.sample_shape()
        );
        Ok(Self { pipeline, patients })
    }

    /// 病人数.
    #[inline]
    pub fn len(&self) -> usize {
        self.patients.len()
    }

    /// 是否没有病人.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }

    /// 病人列表.
    #[inline]
    pub fn patients(&self) -> &[PatientRecord] {
        &self.patients
    }

    /// 样本生成器.
    #[inline]
    pub fn pipeline(&self) -> &SamplePipeline {
        &self.pipeline
    }

    /// 生成第 `idx` 个病人的完整深度样本.
    pub fn get(&self, idx: usize, rng: &mut dyn RngCore) -> Result<SamplePair> {
        let patient = self.patients.get(idx).ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "patient index {idx} out of range for {} patients",
                self.patients.len()
            ))
        })?;
        self.pipeline.sample(patient, rng)
    }
}

/// 按批次迭代 [`PatientDataset`].
///
/// 训练模式下每轮打乱顺序. 同一批次中的样本并行生成, 每个样本使用从加载器随机数
/// 生成器中抽取的独立种子, 因此设置种子后结果可复现.
#[derive(Debug)]
pub struct PatientLoader<'a> {
    dataset: &'a PatientDataset,
    batch_size: usize,
    order_rev: Vec<usize>,
    rng: ChaCha8Rng,
}

impl<'a> PatientLoader<'a> {
    /// 创建第 `epoch` 轮的加载器.
    pub fn new(dataset: &'a PatientDataset, batch_size: usize, seed: Option<u64>, epoch: u64) -> Self {
        let mut rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        rng.set_stream(epoch);

        let mut order: Vec<usize> = (0..dataset.len()).collect();
        if dataset.pipeline.mode().is_train() {
            order.shuffle(&mut rng);
        }
        order.reverse();

        Self {
            dataset,
            batch_size: batch_size.max(1),
            order_rev: order,
            rng,
        }
    }

    fn load(&self, jobs: &[(usize, u64)]) -> Result<Vec<SamplePair>> {
        let run = |&(idx, seed): &(usize, u64)| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            self.dataset.get(idx, &mut rng)
        };
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                let samples = jobs.par_iter().map(run).collect();
            } else {
                let samples = jobs.iter().map(run).collect();
            }
        }
        samples
    }
}

impl Iterator for PatientLoader<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.order_rev.is_empty() {
            return None;
        }
        let take = self.batch_size.min(self.order_rev.len());
        let jobs: Vec<(usize, u64)> = (0..take)
            .filter_map(|_| self.order_rev.pop())
            .map(|idx| (idx, self.rng.gen()))
            .collect();

        let batch = self.load(&jobs).and_then(|samples| {
            let masked: Vec<_> = samples.iter().map(|s| s.masked.view()).collect();
            let original: Vec<_> = samples.iter().map(|s| s.original.view()).collect();
            Batch::collate(&masked, &original)
        });
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.len();
        (n, Some(n))
    }
}

impl ExactSizeIterator for PatientLoader<'_> {
    #[inline]
    fn len(&self) -> usize {
        self.order_rev.len().div_ceil(self.batch_size)
    }
}
