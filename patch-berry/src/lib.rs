#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供 3D (及 2D) 医学影像体数据 (PET/CT 强度体数据和标签体数据)
//! 的 patch 生命周期管理: 焦点生成, patch 提取, patch 队列, patch 聚合.
//!
//! # 约定
//!
//! 1. 所有几何量 (体数据形状, patch 形状, 步长, 焦点) 都是 `ndarray` 的维度类型
//!   `D: Dimension`. 3D 情况下轴序固定为 (D, H, W), 2D 情况下为 (H, W).
//!   来自外部 (W, H, D) 惯例的数据必须在加载边界处转换, 见 [`whd_to_dhw`].
//! 2. 同一 subject 的所有字段共享同一空间形状, 在 [`Subject::new`] 时检查.
//! 3. patch 创建后不可变.
//!
//! # 数据流
//!
//! ```text
//! 采样方向:  focal points (random / sequential) -> PatchSampler -> Patch
//! 队列:      SubjectSource -> PatchQueue (refill: load + random sample) -> pop()
//! 聚合方向:  sequential focal points + patches -> PatchAggregator -> volume
//! ```
//!
//! 采样器和聚合器通过同一个纯函数 [`sampling::sequential_focal_points`]
//! 生成焦点序列.
//!
//! # 开发计划
//!
//! ### 焦点生成 (随机 / 顺序栅格) ✅
//!
//! 实现位于 `patch-berry/src/sampling`.
//!
//! ### 多字段 subject 的统一 patch 提取 ✅
//!
//! 支持分离体数据, 多通道体数据和单模态体数据.
//!
//! ### Patch 队列 ✅
//!
//! 有界缓冲, subject 游标回绕, 可选的多线程 subject 加载.
//!
//! 实现位于 `patch-berry/src/queue`.
//!
//! ### Patch 聚合 ✅
//!
//! `none` / `union` 两种重叠策略, 尾部 padding 移除, 可选并行聚合.
//!
//! 实现位于 `patch-berry/src/aggregate.rs`.

mod data;

pub use data::{
    dim_from_slice, planar_patch, whd_to_dhw, Fields, Image, Modality, Patch, Subject,
};

pub mod aggregate;
pub mod config;
pub mod consts;
pub mod dataset;
pub mod error;
pub mod prelude;
pub mod queue;
pub mod sampling;

pub use error::{LoadError, LoadResult, PatchError, PatchResult};
