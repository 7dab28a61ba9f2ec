//! 顺序 (栅格) 焦点枚举.
//!
//! 采样器和聚合器共用这里的纯函数, 保证两侧的焦点序列完全一致.

use ndarray::Dimension;

use super::valid_range;
use crate::data::{check_positive, check_same_ndim};
use crate::error::PatchResult;

/// 在 `[lo, hi]` 上以 `stride` 为间隔取点, 并且总是包含 `hi`.
///
/// 当 `hi - lo` 不是 `stride` 的倍数时, 最后两个点的间距小于 `stride`.
pub fn axis_steps(lo: usize, hi: usize, stride: usize) -> Vec<usize> {
    debug_assert!(lo <= hi && stride > 0);
    let mut ans: Vec<usize> = (lo..=hi).step_by(stride).collect();
    if ans.last() != Some(&hi) {
        ans.push(hi);
    }
    ans
}

/// 栅格焦点迭代器. 按行优先序 (最后一个轴变化最快) 产出焦点.
///
/// 这是一个纯函数的结果: 相同输入总是得到相同的序列.
#[derive(Debug, Clone)]
pub struct FocalGrid<D: Dimension> {
    steps: Vec<Vec<usize>>,
    cursor: Vec<usize>,
    remaining: usize,
    template: D,
}

impl<D: Dimension> FocalGrid<D> {
    fn new(steps: Vec<Vec<usize>>, template: D) -> Self {
        let remaining = steps.iter().map(Vec::len).product();
        Self {
            cursor: vec![0; steps.len()],
            steps,
            remaining,
            template,
        }
    }

    /// 第 `axis` 个轴上的所有取值.
    ///
    /// 当 `axis` 越界时 panic.
    #[inline]
    pub fn steps(&self, axis: usize) -> &[usize] {
        &self.steps[axis]
    }
}

impl<D: Dimension> Iterator for FocalGrid<D> {
    type Item = D;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let mut ans = self.template.clone();
        for (axis, v) in ans.slice_mut().iter_mut().enumerate() {
            *v = self.steps[axis][self.cursor[axis]];
        }

        // 里程表式进位, 最后一个轴最先进位.
        for axis in (0..self.cursor.len()).rev() {
            self.cursor[axis] += 1;
            if self.cursor[axis] < self.steps[axis].len() {
                break;
            }
            self.cursor[axis] = 0;
        }
        self.remaining -= 1;
        Some(ans)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<D: Dimension> ExactSizeIterator for FocalGrid<D> {
    #[inline]
    fn len(&self) -> usize {
        self.remaining
    }
}

/// 计算在 `volume` 中以步长 `stride` 放置形状为 `patch` 的 patch 的全部栅格焦点.
///
/// # 返回值
///
/// - 当 `patch` 在某轴上大于 `volume`, 或任何形状/步长存在 0,
///   或三者维数不一致时, 返回 `Err(InvalidConfiguration)`;
/// - 否则返回栅格迭代器.
pub fn sequential_focal_points<D: Dimension>(
    volume: &D,
    patch: &D,
    stride: &D,
) -> PatchResult<FocalGrid<D>> {
    let range = valid_range(volume, patch)?;
    check_same_ndim(volume, stride)?;
    check_positive("stride", stride)?;

    let steps = range
        .lo()
        .slice()
        .iter()
        .zip(range.hi().slice())
        .zip(stride.slice())
        .map(|((&lo, &hi), &s)| axis_steps(lo, hi, s))
        .collect();
    Ok(FocalGrid::new(steps, volume.clone()))
}

/// 顺序采样时可得到的 patch 总数.
#[inline]
pub fn num_valid_patches<D: Dimension>(volume: &D, patch: &D, stride: &D) -> PatchResult<usize> {
    Ok(sequential_focal_points(volume, patch, stride)?.len())
}
