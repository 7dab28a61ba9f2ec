//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::data::{
    dim_from_slice, planar_patch, whd_to_dhw, Fields, Image, Modality, Patch, Subject,
};

pub use crate::aggregate::{AggregationBuffer, PatchAggregator};
pub use crate::config::{
    AggregationConfig, OverlapHandling, QueueCapacity, QueueConfig, Sampling, SamplingConfig,
};
pub use crate::error::{LoadError, LoadResult, PatchError, PatchResult};
pub use crate::queue::{PatchQueue, RefillReport};
pub use crate::sampling::{
    random_focal_points, sequential_focal_points, valid_range, FocalGrid, PatchSampler,
    ValidRange,
};

pub use crate::consts::field;
pub use crate::consts::gray::{BACKGROUND, GTV};

pub use crate::dataset::home_dataset_dir_with;
pub use crate::dataset::{self, hecktor, NpzSource, Representation, SubjectSource, VecSource};
