//! 配置.
//!
//! 所有配置都是普通结构体, 启用 `serde` feature 后可序列化/反序列化.
//! 形状以 `Vec<usize>` 保存, 在构造采样器/聚合器时转换为具体维度,
//! 维数不匹配会立即报告为 `InvalidConfiguration`.

use ndarray::Dimension;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::aggregate::PatchAggregator;
use crate::consts::MAX_WORKERS;
use crate::data::dim_from_slice;
use crate::error::{PatchError, PatchResult};
use crate::sampling::PatchSampler;

/// 焦点生成方式.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Sampling {
    /// 在合法范围内均匀随机抽取.
    #[default]
    Random,

    /// 按步长枚举栅格.
    Sequential,
}

/// 聚合时 patch 重叠区域的处理策略.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum OverlapHandling {
    /// 按序列顺序, 后写入者覆盖先写入者. 适用于互不重叠的 patch.
    #[default]
    None,

    /// 逐体素取最大值. 适用于二值或非负的预测图.
    Union,
}

/// 采样配置.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SamplingConfig {
    /// patch 形状, 轴序与体数据一致.
    pub patch_shape: Vec<usize>,

    /// 顺序采样的焦点步长. `None` 表示每个轴步长为 1.
    pub focal_point_stride: Option<Vec<usize>>,

    /// 焦点生成方式.
    pub sampling: Sampling,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            patch_shape: vec![32, 128, 128],
            focal_point_stride: None,
            sampling: Sampling::Random,
        }
    }
}

impl SamplingConfig {
    /// 构建采样器.
    pub fn to_sampler<D: Dimension>(&self) -> PatchResult<PatchSampler<D>> {
        let sampler = PatchSampler::new(dim_from_slice(&self.patch_shape)?, self.sampling)?;
        match &self.focal_point_stride {
            Some(stride) => sampler.with_stride(dim_from_slice(stride)?),
            None => Ok(sampler),
        }
    }
}

/// 聚合配置.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AggregationConfig {
    /// 采样时 (可能已经补过 padding 的) 体数据形状.
    pub volume_shape: Vec<usize>,

    /// patch 形状.
    pub patch_shape: Vec<usize>,

    /// 采样时使用的焦点步长.
    pub focal_point_stride: Vec<usize>,

    /// 重叠处理策略.
    pub overlap_handling: OverlapHandling,

    /// 采样前在每个轴尾部补的体素个数, 聚合后会被移除.
    pub unpadding: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            volume_shape: vec![48, 144, 144],
            patch_shape: vec![32, 128, 128],
            focal_point_stride: vec![20, 20, 20],
            overlap_handling: OverlapHandling::Union,
            unpadding: 0,
        }
    }
}

impl AggregationConfig {
    /// 构建聚合器.
    pub fn to_aggregator<D: Dimension>(&self) -> PatchResult<PatchAggregator<D>> {
        PatchAggregator::new(
            dim_from_slice(&self.volume_shape)?,
            dim_from_slice(&self.patch_shape)?,
            dim_from_slice(&self.focal_point_stride)?,
            self.overlap_handling,
            self.unpadding,
        )
    }
}

/// patch 队列容量.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum QueueCapacity {
    /// 每次补充最多加载的 subject 个数.
    Subjects(usize),

    /// 缓冲区最多容纳的 patch 个数. 每次补充加载 `n / samples_per_subject` 个 subject.
    Patches(usize),
}

impl QueueCapacity {
    /// 每次补充加载的 subject 个数 (尚未与数据源长度取最小值).
    ///
    /// 结果为 0 时返回 `Err(InvalidConfiguration)`.
    pub fn subjects_per_refill(&self, samples_per_subject: usize) -> PatchResult<usize> {
        let n = match *self {
            Self::Subjects(n) => n,
            Self::Patches(n) => n.checked_div(samples_per_subject).unwrap_or(0),
        };
        if n == 0 {
            return Err(PatchError::config(format!(
                "capacity {self:?} holds no subject at {samples_per_subject} samples per subject"
            )));
        }
        Ok(n)
    }
}

/// patch 队列配置.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QueueConfig {
    /// 容量.
    pub capacity: QueueCapacity,

    /// 每个 subject 采样的 patch 个数.
    pub samples_per_subject: usize,

    /// 每轮遍历 subject 前是否打乱顺序.
    pub shuffle_subjects: bool,

    /// 每次补充后是否打乱缓冲区.
    pub shuffle_patches: bool,

    /// 并发加载 subject 的 worker 个数. 0 或 1 表示在调用线程上加载.
    pub num_workers: usize,

    /// 随机数种子.
    pub seed: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: QueueCapacity::Patches(16),
            samples_per_subject: 8,
            shuffle_subjects: true,
            shuffle_patches: true,
            num_workers: 0,
            seed: 0,
        }
    }
}

impl QueueConfig {
    /// 检查配置, 返回每次补充加载的 subject 个数.
    pub fn validate(&self) -> PatchResult<usize> {
        if self.samples_per_subject == 0 {
            return Err(PatchError::config("samples_per_subject must be positive"));
        }
        if self.num_workers > MAX_WORKERS {
            return Err(PatchError::config(format!(
                "at most {MAX_WORKERS} workers are supported, got {}",
                self.num_workers
            )));
        }
        self.capacity.subjects_per_refill(self.samples_per_subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Ix2, Ix3};

    #[test]
    fn test_capacity() {
        assert_eq!(QueueCapacity::Subjects(3).subjects_per_refill(8).unwrap(), 3);
        assert_eq!(QueueCapacity::Patches(16).subjects_per_refill(8).unwrap(), 2);
        assert_eq!(QueueCapacity::Patches(17).subjects_per_refill(8).unwrap(), 2);
        assert!(QueueCapacity::Patches(4).subjects_per_refill(8).is_err());
        assert!(QueueCapacity::Subjects(0).subjects_per_refill(8).is_err());
        assert!(QueueCapacity::Patches(4).subjects_per_refill(0).is_err());
    }

    #[test]
    fn test_queue_config_validate() {
        assert_eq!(QueueConfig::default().validate().unwrap(), 2);

        let c = QueueConfig {
            samples_per_subject: 0,
            ..Default::default()
        };
        assert!(c.validate().is_err());

        let c = QueueConfig {
            num_workers: MAX_WORKERS + 1,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_sampling_config() {
        let c = SamplingConfig {
            patch_shape: vec![4, 4],
            focal_point_stride: Some(vec![2, 3]),
            sampling: Sampling::Sequential,
        };
        let s = c.to_sampler::<Ix2>().unwrap();
        assert_eq!(s.stride(), &Ix2(2, 3));
        assert_eq!(s.sampling(), Sampling::Sequential);

        // 维数不匹配.
        assert!(c.to_sampler::<Ix3>().is_err());
    }

    #[test]
    fn test_aggregation_config() {
        let a = AggregationConfig::default().to_aggregator::<Ix3>().unwrap();
        assert_eq!(a.len(), 8);

        let c = AggregationConfig {
            unpadding: 48,
            ..Default::default()
        };
        assert!(c.to_aggregator::<Ix3>().is_err());
    }
}
