//! 焦点生成与 patch 提取.
//!
//! 焦点 (focal point) 即 patch 的中心坐标. 对形状为 `patch` 的 patch,
//! 体数据某轴长度为 `dim` 时, 合法焦点坐标范围为
//! `[floor(patch / 2), dim - ceil(patch / 2)]` (闭区间).

mod extract;
mod grid;

use log::debug;
use ndarray::Dimension;
use rand::Rng;

pub use extract::{extract, extract_window, window_view};
pub(crate) use extract::{narrow, window_start};
pub use grid::{axis_steps, num_valid_patches, sequential_focal_points, FocalGrid};

pub use crate::config::Sampling;
use crate::data::{check_positive, check_same_ndim, Patch, Subject};
use crate::error::{PatchError, PatchResult};

/// 每个轴上的合法焦点闭区间 `[lo, hi]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRange<D: Dimension> {
    lo: D,
    hi: D,
}

impl<D: Dimension> ValidRange<D> {
    /// 每个轴的下界.
    #[inline]
    pub fn lo(&self) -> &D {
        &self.lo
    }

    /// 每个轴的上界 (包含).
    #[inline]
    pub fn hi(&self) -> &D {
        &self.hi
    }

    /// 判断 `focal` 是否在每个轴上都落在 `[lo, hi]` 内.
    pub fn contains(&self, focal: &D) -> bool {
        focal.ndim() == self.lo.ndim()
            && itertools::izip!(focal.slice(), self.lo.slice(), self.hi.slice())
                .all(|(f, lo, hi)| lo <= f && f <= hi)
    }
}

/// 计算在 `volume` 中放置形状为 `patch` 的 patch 时每个轴的合法焦点范围.
///
/// # 返回值
///
/// - 当两者维数不一致, 存在非正的轴, 或 `patch` 在某轴上大于 `volume`
///   (此时区间为空) 时, 返回 `Err(InvalidConfiguration)`. 不做任何截断.
/// - 否则返回 `Ok(ValidRange)`.
pub fn valid_range<D: Dimension>(volume: &D, patch: &D) -> PatchResult<ValidRange<D>> {
    check_same_ndim(volume, patch)?;
    check_positive("volume shape", volume)?;
    check_positive("patch shape", patch)?;

    let mut lo = volume.clone();
    let mut hi = volume.clone();
    for axis in 0..volume.ndim() {
        let (v, p) = (volume[axis], patch[axis]);
        if p > v {
            return Err(PatchError::config(format!(
                "patch {:?} larger than volume {:?} on axis {axis}",
                patch.slice(),
                volume.slice()
            )));
        }
        lo[axis] = p / 2;
        hi[axis] = v - (p + 1) / 2;
    }
    Ok(ValidRange { lo, hi })
}

/// 在 `range` 内独立、均匀地 (有放回地) 抽取 `n` 个焦点.
///
/// 可复现性只依赖于 `rng` 的种子.
pub fn random_focal_points<D, R>(range: &ValidRange<D>, n: usize, rng: &mut R) -> Vec<D>
where
    D: Dimension,
    R: Rng,
{
    (0..n)
        .map(|_| {
            let mut f = range.lo.clone();
            for (axis, v) in f.slice_mut().iter_mut().enumerate() {
                *v = rng.random_range(range.lo[axis]..=range.hi[axis]);
            }
            f
        })
        .collect()
}

/// patch 采样器. 组合焦点生成与 patch 提取.
#[derive(Debug, Clone)]
pub struct PatchSampler<D: Dimension> {
    patch: D,
    stride: D,
    sampling: Sampling,
}

impl<D: Dimension> PatchSampler<D> {
    /// 以 patch 形状 `patch` 和采样方式 `sampling` 构建采样器.
    /// 顺序采样的默认步长在每个轴上都是 1.
    ///
    /// `patch` 存在 0 时返回 `Err(InvalidConfiguration)`.
    pub fn new(patch: D, sampling: Sampling) -> PatchResult<Self> {
        check_positive("patch shape", &patch)?;
        let mut stride = patch.clone();
        stride.slice_mut().fill(1);
        Ok(Self {
            patch,
            stride,
            sampling,
        })
    }

    /// 设置顺序采样的焦点步长.
    pub fn with_stride(mut self, stride: D) -> PatchResult<Self> {
        check_same_ndim(&self.patch, &stride)?;
        check_positive("stride", &stride)?;
        self.stride = stride;
        Ok(self)
    }

    /// patch 形状.
    #[inline]
    pub fn patch_shape(&self) -> &D {
        &self.patch
    }

    /// 顺序采样步长.
    #[inline]
    pub fn stride(&self) -> &D {
        &self.stride
    }

    /// 采样方式.
    #[inline]
    pub fn sampling(&self) -> Sampling {
        self.sampling
    }

    /// 形状为 `volume` 的体数据上的全部栅格焦点.
    #[inline]
    pub fn focal_grid(&self, volume: &D) -> PatchResult<FocalGrid<D>> {
        sequential_focal_points(volume, &self.patch, &self.stride)
    }

    /// 从 `subject` 中随机采样 `n` 个 patch.
    pub fn random<R: Rng>(
        &self,
        subject: &Subject<D>,
        n: usize,
        rng: &mut R,
    ) -> PatchResult<Vec<Patch<D>>> {
        let range = valid_range(&subject.shape(), &self.patch)?;
        random_focal_points(&range, n, rng)
            .into_iter()
            .map(|f| Patch::extract(subject, f, &self.patch))
            .collect()
    }

    /// 按栅格顺序从 `subject` 中采样全部 patch.
    pub fn sequential(&self, subject: &Subject<D>) -> PatchResult<Vec<Patch<D>>> {
        self.sequential_take(subject, usize::MAX)
    }

    fn sequential_take(&self, subject: &Subject<D>, n: usize) -> PatchResult<Vec<Patch<D>>> {
        let grid = self.focal_grid(&subject.shape())?;
        debug!(
            "sequential sampling: subject `{}`, {} of {} grid points",
            subject.id(),
            n.min(grid.len()),
            grid.len()
        );
        grid.take(n)
            .map(|f| Patch::extract(subject, f, &self.patch))
            .collect()
    }

    /// 按照采样方式采样 `n` 个 patch.
    ///
    /// 顺序采样时返回栅格上的前 `n` 个 patch (不足 `n` 个时返回全部).
    pub fn sample<R: Rng>(
        &self,
        subject: &Subject<D>,
        n: usize,
        rng: &mut R,
    ) -> PatchResult<Vec<Patch<D>>> {
        match self.sampling {
            Sampling::Random => self.random(subject, n, rng),
            Sampling::Sequential => self.sequential_take(subject, n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Fields, Image, Modality};
    use ndarray::{Array3, Ix1, Ix2, Ix3};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn subject(shape: (usize, usize, usize)) -> Subject<Ix3> {
        let volume = Array3::from_shape_fn(shape, |(z, h, w)| (z * 10000 + h * 100 + w) as f32);
        let label = volume.mapv(|v| (v as u32 % 2) as u8);
        Subject::new(
            "s",
            Fields::new(
                Image::Single {
                    modality: Modality::Pet,
                    volume,
                },
                Some(label),
            ),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_range() {
        let r = valid_range(&Ix1(10), &Ix1(4)).unwrap();
        assert_eq!((r.lo()[0], r.hi()[0]), (2, 8));

        // 奇数 patch.
        let r = valid_range(&Ix1(10), &Ix1(5)).unwrap();
        assert_eq!((r.lo()[0], r.hi()[0]), (2, 7));

        // patch 与体数据等大: 唯一焦点.
        let r = valid_range(&Ix2(7, 8), &Ix2(7, 8)).unwrap();
        assert_eq!(r.lo(), r.hi());
        assert_eq!(r.lo(), &Ix2(3, 4));

        let r = valid_range(&Ix3(48, 144, 144), &Ix3(32, 128, 128)).unwrap();
        assert_eq!(r.lo(), &Ix3(16, 64, 64));
        assert_eq!(r.hi(), &Ix3(32, 80, 80));
    }

    #[test]
    fn test_valid_range_invalid() {
        let e = valid_range(&Ix2(4, 10), &Ix2(5, 2)).unwrap_err();
        assert!(matches!(e, PatchError::InvalidConfiguration(_)));
        assert!(valid_range(&Ix2(4, 10), &Ix2(0, 2)).is_err());
        assert!(valid_range(&Ix2(0, 10), &Ix2(1, 2)).is_err());
    }

    #[test]
    fn test_random_is_seeded() {
        let range = valid_range(&Ix3(20, 30, 40), &Ix3(4, 6, 8)).unwrap();
        let a = random_focal_points(&range, 32, &mut ChaCha8Rng::seed_from_u64(7));
        let b = random_focal_points(&range, 32, &mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_random_covers_both_ends() {
        // [2, 3] 上抽 200 次, 两个端点都应出现.
        let range = valid_range(&Ix1(5), &Ix1(4)).unwrap();
        let pts = random_focal_points(&range, 200, &mut ChaCha8Rng::seed_from_u64(1));
        assert!(pts.iter().any(|p| p[0] == 2));
        assert!(pts.iter().any(|p| p[0] == 3));
        assert!(pts.iter().all(|p| p[0] == 2 || p[0] == 3));
    }

    #[test]
    fn test_sampler_random_patches() {
        let s = subject((10, 12, 14));
        let sampler = PatchSampler::new(Ix3(4, 5, 6), Sampling::Random).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let patches = sampler.random(&s, 10, &mut rng).unwrap();
        assert_eq!(patches.len(), 10);
        for p in patches.iter() {
            assert_eq!(p.subject_id(), "s");
            assert_eq!(p.fields().shape(), Ix3(4, 5, 6));
            let (z, h, w) = p.focal().clone().into_pattern();
            // 中心体素 = focal.
            let Image::Single { volume, .. } = &p.fields().image else {
                unreachable!()
            };
            assert_eq!(volume[[2, 2, 3]], (z * 10000 + h * 100 + w) as f32);
        }
    }

    #[test]
    fn test_sampler_sequential() {
        let s = subject((6, 6, 6));
        let sampler = PatchSampler::new(Ix3(4, 4, 4), Sampling::Sequential)
            .unwrap()
            .with_stride(Ix3(2, 2, 2))
            .unwrap();
        let all = sampler.sequential(&s).unwrap();
        assert_eq!(all.len(), 8);
        assert_eq!(all[0].focal(), &Ix3(2, 2, 2));
        assert_eq!(all[7].focal(), &Ix3(4, 4, 4));

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let first = sampler.sample(&s, 3, &mut rng).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[2].focal(), &Ix3(2, 4, 2));
        assert_eq!(sampler.sample(&s, 100, &mut rng).unwrap().len(), 8);
    }

    #[test]
    fn test_sampler_patch_too_large() {
        let s = subject((3, 6, 6));
        let sampler = PatchSampler::new(Ix3(4, 4, 4), Sampling::Random).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let e = sampler.random(&s, 1, &mut rng).unwrap_err();
        assert!(matches!(e, PatchError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_sampler_invalid_stride() {
        let sampler = PatchSampler::new(Ix2(2, 2), Sampling::Sequential).unwrap();
        assert!(sampler.clone().with_stride(Ix2(0, 1)).is_err());
        assert!(PatchSampler::new(Ix2(0, 2), Sampling::Random).is_err());
    }

    proptest! {
        #[test]
        fn random_points_stay_in_range(
            vol in (1usize..64, 1usize..64, 1usize..64),
            patch in (1usize..64, 1usize..64, 1usize..64),
            seed in any::<u64>(),
        ) {
            let volume = Ix3(vol.0, vol.1, vol.2);
            let patch = Ix3(patch.0.min(vol.0), patch.1.min(vol.1), patch.2.min(vol.2));
            let range = valid_range(&volume, &patch).unwrap();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            for f in random_focal_points(&range, 16, &mut rng) {
                prop_assert!(range.contains(&f));
                // 由合法焦点截取的窗口不会越界.
                prop_assert!(window_start(volume.slice(), f.slice(), patch.slice()).is_ok());
            }
        }
    }
}
