//! 分片流式数据集.
//!
//! 病人列表按 `i % num_workers == worker_id` 分给各个 worker. 每个 worker 一次只缓存一个
//! 病人的完整样本, 逐个深度切片输出, 缓存耗尽后再加载下一个病人. worker 之间没有共享的
//! 可变状态.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ndarray::{stack, ArrayD, ArrayViewD, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::{DatasetConfig, SamplePair, SamplePipeline};
use crate::error::{PipelineError, Result};
use crate::train::StepBatch;
use crate::volume::PatientRecord;

/// 取出第 `worker_id` 个 worker 的分片: 下标满足 `i % num_workers == worker_id` 的元素,
/// 保持原有顺序.
///
/// `worker_id >= num_workers` 时分片为空.
pub fn shard<T: Clone>(items: &[T], worker_id: usize, num_workers: usize) -> Vec<T> {
    if worker_id >= num_workers {
        return Vec::new();
    }
    items
        .iter()
        .skip(worker_id)
        .step_by(num_workers)
        .cloned()
        .collect()
}

/// worker 启动时构建一次的上下文: 只读分片与私有随机数生成器.
#[derive(Debug)]
pub struct WorkerContext {
    worker_id: usize,
    queue: VecDeque<PatientRecord>,
    total: usize,
    rng: ChaCha8Rng,
}

impl WorkerContext {
    /// 为第 `epoch` 轮构建 worker 上下文. 训练模式下打乱分片顺序.
    ///
    /// 设置了种子时, 第 `worker_id` 个 worker 使用种子 `seed + worker_id`, 并以 `epoch`
    /// 作为流编号, 因此每一轮的顺序不同但可复现.
    pub fn new(patients: &[PatientRecord], worker_id: usize, cfg: &DatasetConfig, epoch: u64) -> Self {
        let mut rng = match cfg.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_add(worker_id as u64)),
            None => ChaCha8Rng::from_entropy(),
        };
        rng.set_stream(epoch);

        let mut own = shard(patients, worker_id, cfg.num_workers);
        if cfg.mode.is_train() {
            own.shuffle(&mut rng);
        }
        Self {
            worker_id,
            total: own.len(),
            queue: own.into(),
            rng,
        }
    }

    /// worker 编号.
    #[inline]
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// 分片中的病人总数.
    #[inline]
    pub fn len(&self) -> usize {
        self.total
    }

    /// 分片是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// 尚未消费的病人数.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// 按分片顺序查看所有未消费的病人.
    pub fn pending(&self) -> impl Iterator<Item = &PatientRecord> {
        self.queue.iter()
    }
}

/// 单个切片.
#[derive(Clone, Debug, PartialEq)]
pub struct SliceItem {
    /// 遮蔽后的切片.
    pub masked: ArrayD<f32>,
    /// 原始切片.
    pub original: ArrayD<f32>,
    /// 所属病人.
    pub patient_id: String,
    /// 剪裁后体数据中的深度下标.
    pub slice_index: usize,
    /// 产生该切片的 worker.
    pub worker_id: usize,
}

/// 缓存状态.
#[derive(Debug, Default)]
enum CacheState {
    /// 没有缓存, 下一次访问需要加载病人.
    #[default]
    Empty,
    /// 缓存了一个病人的完整样本, `cursor` 指向下一个要输出的深度切片.
    Populated {
        patient_id: String,
        sample: SamplePair,
        cursor: usize,
    },
}

/// 单个 worker 的切片流.
///
/// 状态转移: `Empty -> (加载病人) -> Populated { cursor: 0 } -> (逐切片输出)
/// -> cursor == depth -> Empty`. 分片耗尽且缓存为空时迭代结束.
/// 加载失败的病人输出一个 `Err` 后被跳过.
#[derive(Debug)]
pub struct SliceStream {
    pipeline: Arc<SamplePipeline>,
    ctx: WorkerContext,
    state: CacheState,
    slice_deep: usize,
}

impl SliceStream {
    /// 以 `ctx` 中的分片创建切片流, 初始状态为空缓存.
    pub fn new(pipeline: Arc<SamplePipeline>, ctx: WorkerContext) -> Self {
        let slice_deep = pipeline.sample_shape()[0];
        Self {
            pipeline,
            ctx,
            state: CacheState::Empty,
            slice_deep,
        }
    }

    /// 名义长度: 分片病人数乘以剪裁深度.
    #[inline]
    pub fn nominal_len(&self) -> usize {
        self.ctx.len() * self.slice_deep
    }

    /// 当前是否缓存了病人.
    #[inline]
    pub fn is_populated(&self) -> bool {
        matches!(self.state, CacheState::Populated { .. })
    }

    /// 从缓存中取下一个切片. 缓存耗尽时转入 `Empty` 并返回 `None`.
    fn next_cached(&mut self) -> Option<SliceItem> {
        let CacheState::Populated {
            patient_id,
            sample,
            cursor,
        } = &mut self.state
        else {
            return None;
        };
        if *cursor >= sample.original.len_of(Axis(0)) {
            self.state = CacheState::Empty;
            return None;
        }
        let index = *cursor;
        *cursor += 1;
        Some(SliceItem {
            masked: sample.masked.index_axis(Axis(0), index).to_owned(),
            original: sample.original.index_axis(Axis(0), index).to_owned(),
            patient_id: patient_id.clone(),
            slice_index: index,
            worker_id: self.ctx.worker_id,
        })
    }
}

impl Iterator for SliceStream {
    type Item = Result<SliceItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.next_cached() {
                return Some(Ok(item));
            }
            let patient = self.ctx.queue.pop_front()?;
            match self.pipeline.sample(&patient, &mut self.ctx.rng) {
                Ok(sample) => {
                    self.state = CacheState::Populated {
                        patient_id: patient.id().to_owned(),
                        sample,
                        cursor: 0,
                    };
                }
                Err(e) => {
                    log::warn!(
                        "worker {}: skipping patient {}: {e}",
                        self.ctx.worker_id,
                        patient.id()
                    );
                    return Some(Err(e));
                }
            }
        }
    }
}

/// 一个加载线程: 通道的接收端与线程句柄.
struct Worker {
    id: usize,
    rx: Receiver<Result<SliceItem>>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// 在新线程中把 `items` 逐个送入容量为 `prefetch` 的通道.
    fn spawn<I>(id: usize, items: I, prefetch: usize, stop: Arc<AtomicBool>) -> Result<Self>
    where
        I: Iterator<Item = Result<SliceItem>> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(prefetch.max(1));
        let handle = thread::Builder::new()
            .name(format!("brats-worker-{id}"))
            .spawn(move || {
                for item in items {
                    if stop.load(Ordering::Relaxed) || tx.send(item).is_err() {
                        return;
                    }
                }
            })
            .map_err(|e| PipelineError::io("<worker thread>", e))?;
        Ok(Self { id, rx, handle })
    }

    /// 关闭接收端, 阻塞在发送上的线程随之退出.
    fn close(self) -> (usize, JoinHandle<()>) {
        (self.id, self.handle)
    }
}

/// 等待线程退出. 线程 panic 时返回 [`PipelineError::WorkerPanic`].
fn join_worker(worker: usize, handle: JoinHandle<()>) -> Result<()> {
    handle.join().map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_owned());
        PipelineError::WorkerPanic { worker, message }
    })
}

/// 多 worker 切片加载器.
///
/// 每个 worker 在独立线程中运行一个 [`SliceStream`], 通过有界通道预取, 由消费者按
/// worker 轮转读取. 直接丢弃加载器即可提前结束, worker 会在下一次发送时退出.
/// worker 线程 panic 时输出一个 [`PipelineError::WorkerPanic`], 其余 worker 继续.
pub struct ShardedLoader {
    workers: Vec<Worker>,
    stop: Arc<AtomicBool>,
    next: usize,
    nominal_len: usize,
}

impl ShardedLoader {
    /// 启动第 `epoch` 轮的 worker.
    pub fn spawn(cfg: &DatasetConfig, patients: &[PatientRecord], epoch: u64) -> Result<Self> {
        let pipeline = Arc::new(SamplePipeline::new(cfg)?);
        let stop = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(cfg.num_workers);
        let mut nominal_len = 0;
        for worker_id in 0..cfg.num_workers {
            let ctx = WorkerContext::new(patients, worker_id, cfg, epoch);
            let stream = SliceStream::new(Arc::clone(&pipeline), ctx);
            nominal_len += stream.nominal_len();
            workers.push(Worker::spawn(worker_id, stream, cfg.prefetch, Arc::clone(&stop))?);
        }
        log::debug!(
            "spawned {} workers over {} patients (epoch {epoch})",
            cfg.num_workers,
            patients.len()
        );

        Ok(Self {
            workers,
            stop,
            next: 0,
            nominal_len,
        })
    }

    /// 发现 `cfg.root` 下的所有病人并启动 worker.
    pub fn from_config(cfg: &DatasetConfig, epoch: u64) -> Result<Self> {
        let patients = PatientRecord::discover(&cfg.root)?;
        if patients.is_empty() {
            return Err(PipelineError::EmptyDataset);
        }
        Self::spawn(cfg, &patients, epoch)
    }

    /// 所有 worker 的名义切片数之和.
    #[inline]
    pub fn nominal_len(&self) -> usize {
        self.nominal_len
    }
}

impl Iterator for ShardedLoader {
    type Item = Result<SliceItem>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.workers.is_empty() {
            let i = self.next % self.workers.len();
            match self.workers[i].rx.recv() {
                Ok(item) => {
                    self.next = i + 1;
                    return Some(item);
                }
                // worker 已结束, 正常退出或 panic.
                Err(_) => {
                    let (id, handle) = self.workers.remove(i).close();
                    self.next = i;
                    if let Err(e) = join_worker(id, handle) {
                        log::warn!("{e}");
                        return Some(Err(e));
                    }
                }
            }
        }
        None
    }
}

impl Drop for ShardedLoader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // 先关闭所有接收端再等待.
        let handles: Vec<_> = self.workers.drain(..).map(Worker::close).collect();
        for (id, handle) in handles {
            if let Err(e) = join_worker(id, handle) {
                log::warn!("{e}");
            }
        }
    }
}

/// 把连续的 `step_slice` 个切片合并为一个 [`StepBatch`].
///
/// 最后不足 `step_slice` 的切片单独组成一个较小的批次. 上游的错误直接透传,
/// 已收集的切片保留到下一个批次.
#[derive(Debug)]
pub struct SliceBatcher<I> {
    inner: I,
    step_slice: usize,
    buffer: Vec<SliceItem>,
}

impl<I> SliceBatcher<I>
where
    I: Iterator<Item = Result<SliceItem>>,
{
    /// 每 `step_slice` 个切片组成一个批次. `step_slice` 为 0 时按 1 处理.
    pub fn new(inner: I, step_slice: usize) -> Self {
        let step_slice = step_slice.max(1);
        Self {
            inner,
            step_slice,
            buffer: Vec::with_capacity(step_slice),
        }
    }

    fn flush(&mut self) -> Result<StepBatch> {
        let items = std::mem::take(&mut self.buffer);
        let masked: Vec<ArrayViewD<'_, f32>> = items.iter().map(|s| s.masked.view()).collect();
        let original: Vec<ArrayViewD<'_, f32>> = items.iter().map(|s| s.original.view()).collect();
        StepBatch::from_slices(stack(Axis(0), &masked)?, stack(Axis(0), &original)?)
    }
}

impl<I> Iterator for SliceBatcher<I>
where
    I: Iterator<Item = Result<SliceItem>>,
{
    type Item = Result<StepBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.len() < self.step_slice {
            match self.inner.next() {
                Some(Ok(item)) => self.buffer.push(item),
                Some(Err(e)) => return Some(Err(e)),
                None => break,
            }
        }
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.flush())
    }
}
