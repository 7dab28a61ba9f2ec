//! patch 窗口截取.
//!
//! 起点统一按 `focal - floor(patch / 2)` 计算, 聚合器使用同一公式回写.

use ndarray::{Array, ArrayBase, ArrayView, Data, Dimension, RawData, Slice};

use crate::data::{Patch, Subject};
use crate::error::{PatchError, PatchResult};

/// 计算窗口在每个轴上的起点. 窗口越界时返回 `Err(OutOfBounds)`.
pub(crate) fn window_start(
    shape: &[usize],
    focal: &[usize],
    patch: &[usize],
) -> PatchResult<Vec<usize>> {
    let oob = || PatchError::out_of_bounds(focal, patch, shape);
    if focal.len() != patch.len() || shape.len() != focal.len() {
        return Err(oob());
    }
    focal
        .iter()
        .zip(patch)
        .zip(shape)
        .map(|((&f, &p), &s)| f.checked_sub(p / 2).filter(|start| start + p <= s))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(oob)
}

/// 将 `a` 的后 `start.len()` 个轴收窄到 `[start, start + patch)`, 前面的轴保持完整.
pub(crate) fn narrow<S: RawData, E: Dimension>(
    a: &mut ArrayBase<S, E>,
    start: &[usize],
    patch: &[usize],
) {
    let leading = a.ndim() - start.len();
    a.slice_each_axis_inplace(|ax| match ax.axis.index().checked_sub(leading) {
        Some(i) => Slice::from(start[i]..start[i] + patch[i]),
        None => Slice::from(..),
    });
}

/// 以 `focal` 为中心截取形状为 `patch` 的视图.
///
/// 若 `view` 的维数比 `focal` 多, 多出的前导轴 (例如通道轴) 保持完整.
/// 窗口越界时返回 `Err(OutOfBounds)`.
pub fn window_view<'a, A, E: Dimension>(
    view: ArrayView<'a, A, E>,
    focal: &[usize],
    patch: &[usize],
) -> PatchResult<ArrayView<'a, A, E>> {
    let leading = view
        .ndim()
        .checked_sub(focal.len())
        .ok_or_else(|| PatchError::out_of_bounds(focal, patch, view.shape()))?;
    let start = window_start(&view.shape()[leading..], focal, patch)?;
    let mut view = view;
    narrow(&mut view, &start, patch);
    Ok(view)
}

/// 以 `focal` 为中心, 从单个体数据截取形状为 `patch` 的子块.
///
/// 这是一个纯读取操作, 不做任何缩放或插值.
pub fn extract_window<A, S, D>(
    a: &ArrayBase<S, D>,
    focal: &D,
    patch: &D,
) -> PatchResult<Array<A, D>>
where
    A: Clone,
    S: Data<Elem = A>,
    D: Dimension,
{
    Ok(window_view(a.view(), focal.slice(), patch.slice())?.to_owned())
}

/// 以 `focal` 为中心, 从 `subject` 的所有字段统一截取形状为 `patch` 的 patch.
#[inline]
pub fn extract<D: Dimension>(subject: &Subject<D>, focal: D, patch: &D) -> PatchResult<Patch<D>> {
    Patch::extract(subject, focal, patch)
}
