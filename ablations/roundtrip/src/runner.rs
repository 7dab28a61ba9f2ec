//! 程序运行函数.

use crate::phantom;
use crate::result::{QueueProfile, RoundtripProfile, RoundtripResult};
use log::{info, warn};
use ndarray::Ix3;
use patch_berry::consts::{gray, MAX_WORKERS};
use patch_berry::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use utils::loader;

/// 体模个数.
const PHANTOMS: usize = 6;

/// 每个轴尾部补零的体素个数.
const UNPADDING: usize = 8;

fn patch_shape() -> Ix3 {
    Ix3(32, 64, 64)
}

fn stride() -> Ix3 {
    Ix3(16, 32, 32)
}

/// 实际运行.
pub fn run() -> RoundtripResult {
    match loader::train_source_from_env_or_home(Representation::SeparateVolumes) {
        Some(source) if !source.is_empty() => {
            info!("Using HECKTOR subjects under {}", source.dir().display());
            run_with(Arc::new(source))
        }
        _ => {
            info!("HECKTOR dataset not found, using {PHANTOMS} phantoms");
            let source = VecSource::new((0..PHANTOMS).map(phantom::subject).collect());
            run_with(Arc::new(source))
        }
    }
}

fn run_with<S: SubjectSource<Ix3> + Send>(source: Arc<S>) -> RoundtripResult {
    RoundtripResult {
        queue: queue_epoch(Arc::clone(&source)),
        roundtrips: (0..source.len()).map(|i| roundtrip(source.as_ref(), i)).collect(),
    }
}

/// 按 CPU 个数生成队列配置. 工作线程数不超过 [`MAX_WORKERS`].
fn queue_config(cpus: usize) -> QueueConfig {
    QueueConfig {
        capacity: QueueCapacity::Subjects(cpus.clamp(1, 8)),
        samples_per_subject: 8,
        num_workers: cpus.min(MAX_WORKERS),
        ..Default::default()
    }
}

/// 一轮队列采样.
fn queue_epoch<S: SubjectSource<Ix3> + Send>(source: Arc<S>) -> QueueProfile {
    let config = queue_config(utils::cpus());
    let mut profile = QueueProfile::default();
    let sampler = match PatchSampler::new(patch_shape(), Sampling::Random) {
        Ok(s) => s,
        Err(e) => {
            warn!("Invalid sampler: {e}");
            return profile;
        }
    };
    let mut queue = match PatchQueue::new(source, sampler, config) {
        Ok(q) => q,
        Err(e) => {
            warn!("Invalid queue: {e}");
            return profile;
        }
    };

    let start = Instant::now();
    for patch in queue.epoch() {
        match patch {
            Ok(p) => {
                profile.patches += 1;
                let label = p.fields().label.as_ref();
                if label.is_some_and(|l| l.iter().any(|&v| gray::is_gtv(v))) {
                    profile.with_gtv += 1;
                }
            }
            Err(e) => {
                warn!("{e}");
                profile.failures += 1;
            }
        }
    }
    profile.elapsed = start.elapsed();
    profile
}

/// 补零 -> 顺序采样 -> 聚合 -> 去补零.
fn roundtrip<S: SubjectSource<Ix3>>(source: &S, index: usize) -> RoundtripProfile {
    let start = Instant::now();
    let outcome = source
        .get(index)
        .map_err(|e| e.to_string())
        .and_then(|subject| roundtrip_subject(&subject).map_err(|e| e.to_string()));

    let (id, patches, exact) = match outcome {
        Ok(v) => v,
        Err(e) => {
            warn!("Subject #{index} skipped: {e}");
            (format!("#{index}"), 0, None)
        }
    };
    RoundtripProfile {
        id,
        patches,
        exact,
        elapsed: start.elapsed(),
    }
}

fn roundtrip_subject(subject: &Subject<Ix3>) -> PatchResult<(String, usize, Option<bool>)> {
    let padded = subject.padded(UNPADDING);
    let sampler = PatchSampler::new(patch_shape(), Sampling::Sequential)?.with_stride(stride())?;
    let patches = sampler.sequential(&padded)?;

    let aggregator = PatchAggregator::new(
        padded.shape(),
        patch_shape(),
        stride(),
        OverlapHandling::Union,
        UNPADDING,
    )?;
    let exact = match subject.fields().label.as_ref() {
        Some(label) => Some(aggregator.aggregate_labels(&patches)? == label),
        None => None,
    };
    Ok((subject.id().to_owned(), patches.len(), exact))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_config() {
        // 核数很多的机器上工作线程数被截断.
        let config = queue_config(256);
        assert_eq!(config.num_workers, MAX_WORKERS);
        assert_eq!(config.validate().unwrap(), 8);

        assert_eq!(queue_config(1).validate().unwrap(), 1);
    }
}
