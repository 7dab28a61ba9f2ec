//! 体数据的基础数据结构与几何工具.

use ndarray::{Array, ArrayBase, Data, Dimension, Ix3, Slice};
use num::Zero;

use crate::error::{PatchError, PatchResult};

mod fields;

pub use fields::{Fields, Image, Modality, Patch, Subject};

/// 将配置中的整数序列转换为维度 `D`.
///
/// 序列长度与 `D` 的维数不一致时返回 `Err(InvalidConfiguration)`.
pub fn dim_from_slice<D: Dimension>(v: &[usize]) -> PatchResult<D> {
    if let Some(n) = D::NDIM {
        if n != v.len() {
            return Err(PatchError::config(format!("expected {n} axes, got {v:?}")));
        }
    }
    let mut d = D::zeros(v.len());
    d.slice_mut().copy_from_slice(v);
    Ok(d)
}

/// 将外部 (W, H, D) 惯例的三元组转换为系统内的 (D, H, W) 形状.
///
/// 只应在加载边界 (配置读取, 文件读取) 处调用.
#[inline]
pub fn whd_to_dhw([w, h, d]: [usize; 3]) -> Ix3 {
    Ix3(d, h, w)
}

/// 从 3D 体数据中采样单层 2D patch 时使用的 patch 形状 `(1, h, w)`.
#[inline]
pub fn planar_patch(h: usize, w: usize) -> Ix3 {
    Ix3(1, h, w)
}

/// 由通道在前的形状构造空间维度: 去掉第 0 轴, 其余各轴均为空间轴.
pub(crate) fn spatial_dim<D: Dimension>(channel_first: &[usize]) -> D {
    let spatial = channel_first.get(1..).unwrap_or_default();
    let mut d = D::zeros(spatial.len());
    d.slice_mut().copy_from_slice(spatial);
    d
}

/// 检查几何量每个轴都是正数.
pub(crate) fn check_positive<D: Dimension>(name: &str, d: &D) -> PatchResult<()> {
    if d.ndim() == 0 || d.slice().iter().any(|&x| x == 0) {
        return Err(PatchError::config(format!(
            "{name} must be positive on every axis, got {:?}",
            d.slice()
        )));
    }
    Ok(())
}

/// 检查两个几何量维数一致.
pub(crate) fn check_same_ndim<D: Dimension>(a: &D, b: &D) -> PatchResult<()> {
    if a.ndim() != b.ndim() {
        return Err(PatchError::config(format!(
            "rank mismatch: {:?} vs {:?}",
            a.slice(),
            b.slice()
        )));
    }
    Ok(())
}

/// 在除前 `leading` 个轴以外的每个轴尾部补 `unpadding` 个零体素.
pub(crate) fn pad_trailing<A, S, E>(
    a: &ArrayBase<S, E>,
    unpadding: usize,
    leading: usize,
) -> Array<A, E>
where
    A: Clone + Zero,
    S: Data<Elem = A>,
    E: Dimension,
{
    let mut shape = a.raw_dim();
    for (axis, len) in shape.slice_mut().iter_mut().enumerate() {
        if axis >= leading {
            *len += unpadding;
        }
    }
    let mut ans = Array::zeros(shape);
    ans.slice_each_axis_mut(|ax| Slice::from(0..a.len_of(ax.axis)))
        .assign(a);
    ans
}
