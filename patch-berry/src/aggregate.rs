//! patch 聚合. patch 提取的逆操作.
//!
//! 聚合器不信任调用方给出的位置, 而是用与采样器相同的纯函数
//! ([`sequential_focal_points`]) 独立重算焦点序列, 然后把第 `i` 个 patch
//! 写回第 `i` 个焦点对应的区域.
//!
//! # 注意
//!
//! 若聚合时的 (体数据形状, patch 形状, 步长) 与采样时不同, [`PatchAggregator::aggregate`]
//! 会静默地产生错误的重建结果. 携带焦点的调用方应使用
//! [`PatchAggregator::aggregate_checked`], 不一致时会得到 `Err(InvalidConfiguration)`.

use itertools::{EitherOrBoth, Itertools};
use log::debug;
use ndarray::{Array, ArrayBase, ArrayView, Data, Dimension, Slice, Zip};
use num::Zero;

use crate::config::OverlapHandling;
use crate::data::{Fields, Patch};
use crate::error::{PatchError, PatchResult};
use crate::sampling::{narrow, sequential_focal_points, window_start};

/// 聚合缓冲区. 初始全零, 每写入一个 patch 就原地修改对应区域.
#[derive(Debug, Clone)]
pub struct AggregationBuffer<T, D: Dimension> {
    data: Array<T, D>,
    written: Option<Array<bool, D>>,
    patch: D,
    overlap: OverlapHandling,
    unpadding: usize,
}

impl<T, D> AggregationBuffer<T, D>
where
    T: Copy + PartialOrd + Zero,
    D: Dimension,
{
    fn new(agg: &PatchAggregator<D>, track_written: bool) -> Self {
        Self {
            data: Array::zeros(agg.volume.clone()),
            written: track_written.then(|| Array::from_elem(agg.volume.clone(), false)),
            patch: agg.patch.clone(),
            overlap: agg.overlap,
            unpadding: agg.unpadding,
        }
    }

    /// 把 `patch` 写入以 `focal` 为中心的区域, 重叠区域按策略处理.
    ///
    /// `patch` 形状与聚合器不一致, 或区域越界时返回 `Err(OutOfBounds)`.
    pub fn write<S: Data<Elem = T>>(
        &mut self,
        focal: &D,
        patch: &ArrayBase<S, D>,
    ) -> PatchResult<()> {
        let oob = || PatchError::out_of_bounds(focal.slice(), patch.shape(), self.data.shape());
        if patch.shape() != self.patch.slice() {
            return Err(oob());
        }
        let start = window_start(self.data.shape(), focal.slice(), self.patch.slice())?;

        let mut region = self.data.view_mut();
        narrow(&mut region, &start, self.patch.slice());
        match self.overlap {
            OverlapHandling::None => region.assign(patch),
            // 只在 patch 自身区域内取最大值, 与整体比较的结果相同.
            OverlapHandling::Union => Zip::from(&mut region).and(patch).for_each(|b, &p| {
                if p > *b {
                    *b = p;
                }
            }),
        }

        if let Some(written) = self.written.as_mut() {
            let mut region = written.view_mut();
            narrow(&mut region, &start, self.patch.slice());
            region.fill(true);
        }
        Ok(())
    }

    /// 当前 (尚未移除 padding 的) 缓冲区内容.
    #[inline]
    pub fn view(&self) -> ArrayView<'_, T, D> {
        self.data.view()
    }

    /// 将 `later` 合并进来. `later` 必须包含序列中更靠后的 patch.
    ///
    /// `union` 取逐体素最大值; `none` 在 `later` 写过的体素上以 `later` 为准.
    #[cfg(feature = "rayon")]
    fn merge(&mut self, later: Self) {
        match (self.overlap, later.written) {
            (OverlapHandling::None, Some(mask)) => Zip::from(&mut self.data)
                .and(&later.data)
                .and(&mask)
                .for_each(|a, &b, &m| {
                    if m {
                        *a = b;
                    }
                }),
            _ => Zip::from(&mut self.data).and(&later.data).for_each(|a, &b| {
                if b > *a {
                    *a = b;
                }
            }),
        }
    }

    /// 移除每个轴尾部的 padding, 得到最终结果.
    pub fn finish(self) -> Array<T, D> {
        let u = self.unpadding;
        if u == 0 {
            return self.data;
        }
        self.data
            .slice_each_axis(|ax| Slice::from(..ax.len - u))
            .to_owned()
    }
}

/// patch 聚合器.
#[derive(Debug, Clone)]
pub struct PatchAggregator<D: Dimension> {
    volume: D,
    patch: D,
    overlap: OverlapHandling,
    unpadding: usize,
    focal_points: Vec<D>,
}

impl<D: Dimension> PatchAggregator<D> {
    /// 构建聚合器.
    ///
    /// `volume` 是采样时 (可能已补过 padding 的) 体数据形状, `unpadding`
    /// 是每个轴尾部需要移除的体素个数.
    ///
    /// # 返回值
    ///
    /// - 形状/步长非法, 或 `unpadding` 不小于某轴长度时, 返回 `Err(InvalidConfiguration)`;
    /// - 否则返回 `Ok(Self)`, 焦点序列在此时就已算好.
    pub fn new(
        volume: D,
        patch: D,
        stride: D,
        overlap: OverlapHandling,
        unpadding: usize,
    ) -> PatchResult<Self> {
        let focal_points: Vec<D> = sequential_focal_points(&volume, &patch, &stride)?.collect();
        if volume.slice().iter().any(|&v| unpadding >= v) {
            return Err(PatchError::config(format!(
                "unpadding {unpadding} removes a whole axis of {:?}",
                volume.slice()
            )));
        }
        Ok(Self {
            volume,
            patch,
            overlap,
            unpadding,
            focal_points,
        })
    }

    /// 重算得到的焦点序列.
    #[inline]
    pub fn focal_points(&self) -> &[D] {
        &self.focal_points
    }

    /// 期望的 patch 个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.focal_points.len()
    }

    /// 焦点序列是否为空. 合法配置下总是 `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.focal_points.is_empty()
    }

    /// 重叠处理策略.
    #[inline]
    pub fn overlap(&self) -> OverlapHandling {
        self.overlap
    }

    /// 移除 padding 后的输出形状.
    pub fn output_shape(&self) -> D {
        let mut ans = self.volume.clone();
        ans.slice_mut().iter_mut().for_each(|v| *v -= self.unpadding);
        ans
    }

    /// 创建全零的聚合缓冲区.
    #[inline]
    pub fn buffer<T: Copy + PartialOrd + Zero>(&self) -> AggregationBuffer<T, D> {
        AggregationBuffer::new(self, false)
    }

    fn too_many(&self) -> PatchError {
        PatchError::config(format!(
            "more patches than the {} focal points of the sequential grid",
            self.len()
        ))
    }

    /// 按重算的焦点序列聚合 `patches`.
    ///
    /// patch 少于焦点数时, 未覆盖区域保持为 0; 多于焦点数时返回
    /// `Err(InvalidConfiguration)`.
    pub fn aggregate<T, S, I>(&self, patches: I) -> PatchResult<Array<T, D>>
    where
        T: Copy + PartialOrd + Zero,
        S: Data<Elem = T>,
        I: IntoIterator<Item = ArrayBase<S, D>>,
    {
        let mut buf = self.buffer();
        let mut count = 0;
        for patch in patches {
            let focal = self.focal_points.get(count).ok_or_else(|| self.too_many())?;
            buf.write(focal, &patch)?;
            count += 1;
        }
        debug!("aggregated {count} of {} patches", self.len());
        Ok(buf.finish())
    }

    /// 聚合携带焦点的 patch 序列, 并逐个校验焦点与重算序列一致.
    pub fn aggregate_checked<T, S, I>(&self, patches: I) -> PatchResult<Array<T, D>>
    where
        T: Copy + PartialOrd + Zero,
        S: Data<Elem = T>,
        I: IntoIterator<Item = (D, ArrayBase<S, D>)>,
    {
        let mut buf = self.buffer();
        for (i, pair) in patches
            .into_iter()
            .zip_longest(self.focal_points.iter())
            .enumerate()
        {
            match pair {
                EitherOrBoth::Both((focal, patch), expected) => {
                    if focal != *expected {
                        return Err(PatchError::config(format!(
                            "patch #{i} has focal point {:?}, the sequential grid expects {:?}",
                            focal.slice(),
                            expected.slice()
                        )));
                    }
                    buf.write(&focal, &patch)?;
                }
                EitherOrBoth::Left(_) => return Err(self.too_many()),
                EitherOrBoth::Right(_) => break,
            }
        }
        Ok(buf.finish())
    }

    /// 从 patch 中选出一个字段进行聚合. 焦点会被校验.
    ///
    /// 任一 patch 不含所选字段时返回 `Err(InvalidConfiguration)`.
    pub fn aggregate_patches<'a, T, F>(
        &self,
        patches: &'a [Patch<D>],
        select: F,
    ) -> PatchResult<Array<T, D>>
    where
        T: Copy + PartialOrd + Zero + 'a,
        F: Fn(&'a Fields<D>) -> Option<ArrayView<'a, T, D>>,
    {
        let pairs = patches
            .iter()
            .map(|p| {
                select(p.fields())
                    .map(|v| (p.focal().clone(), v))
                    .ok_or_else(|| {
                        PatchError::config(format!(
                            "patch from subject `{}` lacks the selected field",
                            p.subject_id()
                        ))
                    })
            })
            .collect::<PatchResult<Vec<_>>>()?;
        self.aggregate_checked(pairs)
    }

    /// 聚合 patch 的标签字段.
    #[inline]
    pub fn aggregate_labels(&self, patches: &[Patch<D>]) -> PatchResult<Array<u8, D>> {
        self.aggregate_patches(patches, |f| f.label_view())
    }
}

/// 并发操作部分
#[cfg(feature = "rayon")]
impl<D: Dimension> PatchAggregator<D> {
    /// 借助 `rayon`, 把 `patches` 分块并行写入各自的部分缓冲区,
    /// 再按块顺序合并. 结果与 [`Self::aggregate`] 相同.
    pub fn par_aggregate<T, S>(&self, patches: &[ArrayBase<S, D>]) -> PatchResult<Array<T, D>>
    where
        T: Copy + PartialOrd + Zero + Send + Sync,
        S: Data<Elem = T> + Sync,
    {
        use rayon::prelude::*;

        if patches.len() > self.len() {
            return Err(self.too_many());
        }
        let chunk = patches
            .len()
            .div_ceil(rayon::current_num_threads())
            .max(1);
        let track = self.overlap == OverlapHandling::None;

        let partials = patches
            .par_chunks(chunk)
            .zip(self.focal_points.par_chunks(chunk))
            .map(|(ps, fs)| {
                let mut buf = AggregationBuffer::new(self, track);
                for (p, f) in ps.iter().zip(fs) {
                    buf.write(f, p)?;
                }
                Ok(buf)
            })
            .collect::<PatchResult<Vec<_>>>()?;

        let mut iter = partials.into_iter();
        let mut ans = iter.next().unwrap_or_else(|| self.buffer());
        iter.for_each(|later| ans.merge(later));
        Ok(ans.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Sampling;
    use crate::data::{Fields, Image, Modality, Subject};
    use crate::sampling::{extract_window, PatchSampler};
    use ndarray::{array, Array1, Array2, Array3, Ix1, Ix2, Ix3};
    use proptest::prelude::*;

    fn ramp3(shape: (usize, usize, usize)) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(z, h, w)| (1 + z * 100 + h * 10 + w) as f32)
    }

    #[test]
    fn test_single_patch_roundtrip() {
        let vol = ramp3((6, 7, 8));
        let agg =
            PatchAggregator::new(Ix3(6, 7, 8), Ix3(2, 3, 4), Ix3(1, 1, 1), OverlapHandling::None, 0)
                .unwrap();
        let focal = agg.focal_points()[0].clone();
        assert_eq!(focal, Ix3(1, 1, 2));

        let patch = extract_window(&vol, &focal, &Ix3(2, 3, 4)).unwrap();
        let out = agg.aggregate_checked([(focal, patch)]).unwrap();

        for ((z, h, w), v) in out.indexed_iter() {
            if z < 2 && h < 3 && w < 4 {
                assert_eq!(*v, vol[[z, h, w]]);
            } else {
                assert_eq!(*v, 0.0);
            }
        }
    }

    #[test]
    fn test_sequential_roundtrip_full_coverage() {
        let vol = ramp3((48, 20, 20));
        let subject = Subject::new(
            "rt",
            Fields::new(
                Image::Single {
                    modality: Modality::Ct,
                    volume: vol.clone(),
                },
                None,
            ),
        )
        .unwrap();
        let sampler = PatchSampler::new(Ix3(32, 16, 16), Sampling::Sequential)
            .unwrap()
            .with_stride(Ix3(20, 20, 20))
            .unwrap();
        let patches = sampler.sequential(&subject).unwrap();
        assert_eq!(patches.len(), 8);

        for overlap in [OverlapHandling::None, OverlapHandling::Union] {
            let agg =
                PatchAggregator::new(Ix3(48, 20, 20), Ix3(32, 16, 16), Ix3(20, 20, 20), overlap, 0)
                    .unwrap();
            let out = agg
                .aggregate_patches(&patches, |f| f.image.modality(Modality::Ct))
                .unwrap();
            assert_eq!(out, vol);
        }
    }

    #[test]
    fn test_none_last_writer_wins() {
        // volume 6, patch 4, stride 2 -> focal [2, 4], 区域 [0, 4) 和 [2, 6).
        let agg = PatchAggregator::new(Ix1(6), Ix1(4), Ix1(2), OverlapHandling::None, 0).unwrap();
        let out = agg
            .aggregate([array![5, 5, 5, 5], array![1, 1, 1, 1]])
            .unwrap();
        assert_eq!(out, array![5, 5, 1, 1, 1, 1]);
    }

    #[test]
    fn test_union_takes_max() {
        let agg = PatchAggregator::new(Ix1(6), Ix1(4), Ix1(2), OverlapHandling::Union, 0).unwrap();
        let out = agg
            .aggregate([array![5, 0, 5, 0], array![1, 1, 1, 1]])
            .unwrap();
        assert_eq!(out, array![5, 0, 5, 1, 1, 1]);
    }

    #[test]
    fn test_union_order_independent() {
        let union = OverlapHandling::Union;
        let agg = PatchAggregator::new(Ix2(8, 8), Ix2(4, 4), Ix2(1, 1), union, 0).unwrap();
        let a = Array2::from_shape_fn((4, 4), |(h, w)| ((h * 7 + w * 3) % 5) as u8);
        let b = Array2::from_shape_fn((4, 4), |(h, w)| ((h * 2 + w * 5) % 4) as u8);
        let (fa, fb) = (Ix2(3, 3), Ix2(4, 5));

        let mut ab = agg.buffer();
        ab.write(&fa, &a).unwrap();
        ab.write(&fb, &b).unwrap();

        let mut ba = agg.buffer();
        ba.write(&fb, &b).unwrap();
        ba.write(&fa, &a).unwrap();

        assert_eq!(ab.finish(), ba.finish());
    }

    #[test]
    fn test_unpadding() {
        let original = Array2::from_shape_fn((5, 7), |(h, w)| (h * 7 + w + 1) as u8);
        let padded = crate::data::pad_trailing(&original, 3, 0);
        assert_eq!(padded.shape(), &[8, 10]);

        let union = OverlapHandling::Union;
        let agg = PatchAggregator::new(Ix2(8, 10), Ix2(4, 4), Ix2(3, 3), union, 3).unwrap();
        assert_eq!(agg.output_shape(), Ix2(5, 7));
        let patches: Vec<_> = agg
            .focal_points()
            .iter()
            .map(|f| extract_window(&padded, f, &Ix2(4, 4)).unwrap())
            .collect();
        assert_eq!(agg.aggregate(patches).unwrap(), original);
    }

    #[test]
    fn test_fewer_and_more_patches() {
        let agg = PatchAggregator::new(Ix1(6), Ix1(4), Ix1(2), OverlapHandling::None, 0).unwrap();
        assert_eq!(agg.aggregate([array![7, 7, 7, 7]]).unwrap(), array![7, 7, 7, 7, 0, 0]);

        let e = agg
            .aggregate([array![1, 1, 1, 1], array![1, 1, 1, 1], array![1, 1, 1, 1]])
            .unwrap_err();
        assert!(matches!(e, PatchError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_wrong_patch_shape() {
        let agg = PatchAggregator::new(Ix1(6), Ix1(4), Ix1(2), OverlapHandling::None, 0).unwrap();
        let e = agg.aggregate([array![1, 1, 1]]).unwrap_err();
        assert!(matches!(e, PatchError::OutOfBounds { .. }));
    }

    #[test]
    fn test_checked_focal_mismatch() {
        let agg = PatchAggregator::new(Ix1(6), Ix1(4), Ix1(2), OverlapHandling::None, 0).unwrap();
        let e = agg
            .aggregate_checked([(Ix1(3), Array1::<u8>::ones(4))])
            .unwrap_err();
        assert!(matches!(e, PatchError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_invalid_unpadding() {
        let none = OverlapHandling::None;
        assert!(PatchAggregator::new(Ix2(8, 4), Ix2(2, 2), Ix2(1, 1), none, 4).is_err());
        assert!(PatchAggregator::new(Ix2(8, 4), Ix2(2, 5), Ix2(1, 1), none, 0).is_err());
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_par_aggregate_matches_sequential() {
        for overlap in [OverlapHandling::None, OverlapHandling::Union] {
            let agg = PatchAggregator::new(Ix2(12, 12), Ix2(4, 4), Ix2(1, 1), overlap, 2).unwrap();
            let patches: Vec<_> = (0..agg.len())
                .map(|i| Array2::from_elem((4, 4), ((i * 37) % 11) as u16))
                .collect();
            let seq = agg.aggregate(patches.iter().map(|p| p.view())).unwrap();
            let par = agg.par_aggregate(&patches).unwrap();
            assert_eq!(seq, par, "{overlap:?}");
        }
    }

    proptest! {
        #[test]
        fn union_is_commutative(
            values in proptest::collection::vec(0u8..10, 32),
            fa in (2usize..6, 2usize..6),
            fb in (2usize..6, 2usize..6),
        ) {
            let union = OverlapHandling::Union;
            let agg = PatchAggregator::new(Ix2(8, 8), Ix2(4, 4), Ix2(4, 4), union, 0).unwrap();
            let a = Array2::from_shape_vec((4, 4), values[..16].to_vec()).unwrap();
            let b = Array2::from_shape_vec((4, 4), values[16..].to_vec()).unwrap();
            let (fa, fb) = (Ix2(fa.0, fa.1), Ix2(fb.0, fb.1));

            let mut ab = agg.buffer();
            ab.write(&fa, &a).unwrap();
            ab.write(&fb, &b).unwrap();
            let mut ba = agg.buffer();
            ba.write(&fb, &b).unwrap();
            ba.write(&fa, &a).unwrap();
            prop_assert_eq!(ab.finish(), ba.finish());
        }
    }
}
