//! patch 队列.
//!
//! 队列维护一个有界的 patch 缓冲区. 缓冲区为空时, `pop` 会同步地补充一批:
//! 从游标处取出若干 subject, 每个 subject 随机采样 `samples_per_subject` 个 patch.
//! 一次加载的代价由同一 subject 的多个 patch 分摊.
//!
//! # 确定性
//!
//! 每次补充时, subject 索引和每个 subject 的采样种子都在调用线程上按顺序预留,
//! 结果也按预留顺序追加, 因此输出与 worker 个数无关.

mod cursor;

use std::collections::VecDeque;

use log::{debug, warn};
use ndarray::Dimension;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub use cursor::SubjectCursor;

use crate::config::QueueConfig;
use crate::data::Patch;
use crate::dataset::SubjectSource;
use crate::error::{PatchError, PatchResult};
use crate::sampling::PatchSampler;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 一次补充的结果.
#[derive(Debug, Default)]
pub struct RefillReport {
    /// 成功加载的 subject 索引, 按加载顺序排列.
    pub loaded: Vec<usize>,

    /// 加载失败的 subject. 每一项都是 `PatchError::SubjectLoadFailure`.
    pub failures: Vec<PatchError>,
}

impl RefillReport {
    /// 本次补充是否有 subject 加载失败.
    #[inline]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// 加载第 `index` 个 subject, 并以 `seed` 随机采样 `n` 个 patch.
fn load_and_sample<D, S>(
    source: &S,
    sampler: &PatchSampler<D>,
    n: usize,
    (index, seed): (usize, u64),
) -> PatchResult<Vec<Patch<D>>>
where
    D: Dimension,
    S: SubjectSource<D> + ?Sized,
{
    let subject = source
        .get(index)
        .map_err(|source| PatchError::SubjectLoadFailure { index, source })?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    sampler.random(&subject, n, &mut rng)
}

/// patch 队列.
pub struct PatchQueue<D: Dimension, S: SubjectSource<D>> {
    source: S,
    sampler: PatchSampler<D>,
    config: QueueConfig,
    subjects_per_refill: usize,
    cursor: SubjectCursor,
    buffer: VecDeque<Patch<D>>,
    rng: ChaCha8Rng,

    #[cfg(feature = "rayon")]
    pool: Option<rayon::ThreadPool>,
}

impl<D: Dimension, S: SubjectSource<D>> PatchQueue<D, S> {
    /// 创建队列. 缓冲区初始为空.
    ///
    /// # 返回值
    ///
    /// - 配置非法 (见 [`QueueConfig::validate`]) 或 `source` 中没有 subject 时,
    ///   返回 `Err(InvalidConfiguration)`.
    /// - 否则返回 `Ok(Self)`.
    ///
    /// 队列总是以随机方式采样, `sampler` 的采样方式不影响队列.
    pub fn new(source: S, sampler: PatchSampler<D>, config: QueueConfig) -> PatchResult<Self> {
        let subjects_per_refill = config.validate()?;
        if source.is_empty() {
            return Err(PatchError::config(format!(
                "no subject to draw {} samples from",
                config.samples_per_subject
            )));
        }

        #[cfg(feature = "rayon")]
        let pool = if config.num_workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.num_workers)
                .build()
                .map_err(|e| PatchError::config(format!("cannot build worker pool: {e}")))?;
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            cursor: SubjectCursor::new(config.shuffle_subjects),
            buffer: VecDeque::new(),
            source,
            sampler,
            subjects_per_refill,
            config,
            #[cfg(feature = "rayon")]
            pool,
        })
    }

    /// 使用指定的随机数生成器, 替换由 `seed` 生成的那个.
    #[inline]
    pub fn with_rng(mut self, rng: ChaCha8Rng) -> Self {
        self.rng = rng;
        self
    }

    /// 名义上的一轮 (epoch) 长度: `subject 总数 * samples_per_subject`.
    /// 与缓冲区实际占用无关.
    #[inline]
    pub fn len(&self) -> usize {
        self.source.len() * self.config.samples_per_subject
    }

    /// 名义 epoch 长度是否为 0.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 缓冲区中现有的 patch 个数.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// 每次补充加载的 subject 个数 (尚未与数据源长度取最小值).
    #[inline]
    pub fn subjects_per_refill(&self) -> usize {
        self.subjects_per_refill
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// 数据源.
    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// subject 游标.
    #[inline]
    pub fn cursor(&self) -> &SubjectCursor {
        &self.cursor
    }

    /// 取出一个 patch. 缓冲区为空时先同步补充.
    ///
    /// # 返回值
    ///
    /// - 数据源中没有 subject 时返回 `Err(QueueExhausted)`;
    /// - 本批 subject 全部加载失败时, 返回第一个 `Err(SubjectLoadFailure)`.
    ///   游标已越过这些 subject, 重试会继续加载后续 subject;
    /// - 采样配置与 subject 不匹配时返回 `Err(InvalidConfiguration)`,
    ///   缓冲区和游标保持不变.
    pub fn pop(&mut self) -> PatchResult<Patch<D>> {
        if self.buffer.is_empty() {
            let report = self.refill()?;
            if self.buffer.is_empty() {
                return Err(report
                    .failures
                    .into_iter()
                    .next()
                    .unwrap_or(PatchError::QueueExhausted));
            }
        }
        self.buffer.pop_front().ok_or(PatchError::QueueExhausted)
    }

    /// 补充一批 patch 并追加到缓冲区末尾.
    ///
    /// 单个 subject 加载失败只影响它自己的 patch: 游标越过它, 失败被记录在
    /// [`RefillReport::failures`] 中并输出警告. 其他错误会使整次补充失败,
    /// 此时缓冲区, 游标和随机数状态都保持不变.
    pub fn refill(&mut self) -> PatchResult<RefillReport> {
        let total = self.source.len();
        if total == 0 {
            return Err(PatchError::QueueExhausted);
        }
        let n = self.subjects_per_refill.min(total);
        let cursor = self.cursor.clone();
        let rng = self.rng.clone();

        let mut jobs = Vec::with_capacity(n);
        for _ in 0..n {
            let index = self
                .cursor
                .next(&mut self.rng, total)
                .ok_or(PatchError::QueueExhausted)?;
            jobs.push((index, self.rng.random::<u64>()));
        }
        let results = self.load_batch(&jobs);

        let mut batch = Vec::with_capacity(n * self.config.samples_per_subject);
        let mut report = RefillReport::default();
        for (&(index, _), result) in jobs.iter().zip(results) {
            match result {
                Ok(patches) => {
                    batch.extend(patches);
                    report.loaded.push(index);
                }
                Err(e) if e.is_load_failure() => {
                    warn!("skipping subject #{index}: {e}");
                    report.failures.push(e);
                }
                Err(e) => {
                    self.cursor = cursor;
                    self.rng = rng;
                    return Err(e);
                }
            }
        }

        self.buffer.extend(batch);
        if self.config.shuffle_patches {
            self.buffer.make_contiguous().shuffle(&mut self.rng);
        }
        debug!(
            "refilled {} subjects ({} failed), {} patches buffered",
            report.loaded.len(),
            report.failures.len(),
            self.buffer.len()
        );
        Ok(report)
    }

    #[cfg(feature = "rayon")]
    fn load_batch(&self, jobs: &[(usize, u64)]) -> Vec<PatchResult<Vec<Patch<D>>>> {
        let n = self.config.samples_per_subject;
        let load = |&job: &(usize, u64)| load_and_sample(&self.source, &self.sampler, n, job);
        match self.pool.as_ref() {
            Some(pool) => pool.install(|| jobs.par_iter().map(load).collect()),
            None => jobs.iter().map(load).collect(),
        }
    }

    #[cfg(not(feature = "rayon"))]
    fn load_batch(&self, jobs: &[(usize, u64)]) -> Vec<PatchResult<Vec<Patch<D>>>> {
        let n = self.config.samples_per_subject;
        jobs.iter()
            .map(|&job| load_and_sample(&self.source, &self.sampler, n, job))
            .collect()
    }

    /// 名义上的一轮: 恰好 [`Self::len`] 次 [`Self::pop`].
    #[inline]
    pub fn epoch(&mut self) -> Epoch<'_, D, S> {
        let remaining = self.len();
        Epoch {
            queue: self,
            remaining,
        }
    }
}

/// 一轮 patch 的迭代器. 见 [`PatchQueue::epoch`].
pub struct Epoch<'a, D: Dimension, S: SubjectSource<D>> {
    queue: &'a mut PatchQueue<D, S>,
    remaining: usize,
}

impl<'a, D: Dimension, S: SubjectSource<D>> Iterator for Epoch<'a, D, S> {
    type Item = PatchResult<Patch<D>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.queue.pop())
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, D: Dimension, S: SubjectSource<D>> ExactSizeIterator for Epoch<'a, D, S> {}
