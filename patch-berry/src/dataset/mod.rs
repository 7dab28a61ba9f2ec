//! 数据集操作.
//!
//! 队列只依赖 [`SubjectSource`]: 已知长度, 可按索引取出 subject.
//! 坐标轴惯例的转换 ((W, H, D) -> (D, H, W)) 只在这里的加载边界处发生.

use std::path::{Path, PathBuf};

use ndarray::{Array, Dimension, RemoveAxis};

use crate::data::{Image, Modality, Subject};
use crate::error::{LoadError, LoadResult};

pub mod hecktor;
mod npz_database;

pub use npz_database::{NpzSource, OpenArchiveError};

/// 可按索引访问的 subject 数据源.
///
/// 实现者需要是 `Sync` 的, 以便队列在多个线程上同时加载不同的 subject.
pub trait SubjectSource<D: Dimension>: Sync {
    /// subject 个数.
    fn len(&self) -> usize;

    /// 是否没有任何 subject.
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 加载第 `index` 个 subject.
    fn get(&self, index: usize) -> LoadResult<Subject<D>>;
}

impl<D: Dimension, T: SubjectSource<D> + Send> SubjectSource<D> for std::sync::Arc<T> {
    #[inline]
    fn len(&self) -> usize {
        self.as_ref().len()
    }

    #[inline]
    fn get(&self, index: usize) -> LoadResult<Subject<D>> {
        self.as_ref().get(index)
    }
}

/// 内存中的 subject 数据源. `get` 返回 subject 的拷贝.
#[derive(Debug, Clone, Default)]
pub struct VecSource<D: Dimension> {
    subjects: Vec<Subject<D>>,
}

impl<D: Dimension> VecSource<D> {
    /// 初始化.
    #[inline]
    pub fn new(subjects: Vec<Subject<D>>) -> Self {
        Self { subjects }
    }

    /// 所有 subject.
    #[inline]
    pub fn subjects(&self) -> &[Subject<D>] {
        &self.subjects
    }
}

impl<D: Dimension> From<Vec<Subject<D>>> for VecSource<D> {
    #[inline]
    fn from(subjects: Vec<Subject<D>>) -> Self {
        Self::new(subjects)
    }
}

impl<D: Dimension> SubjectSource<D> for VecSource<D> {
    #[inline]
    fn len(&self) -> usize {
        self.subjects.len()
    }

    fn get(&self, index: usize) -> LoadResult<Subject<D>> {
        self.subjects
            .get(index)
            .cloned()
            .ok_or(LoadError::IndexOutOfRange(index, self.len()))
    }
}

/// 从磁盘加载时 subject 影像部分的表示方式.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Representation {
    /// PET 与 CT 分别保存.
    #[default]
    SeparateVolumes,

    /// PET 与 CT 堆叠为 (PET, CT) 两通道体数据.
    Multichannel,

    /// 只加载一种模态.
    Unimodal(Modality),
}

impl Representation {
    /// 需要加载的模态.
    pub const fn modalities(&self) -> &'static [Modality] {
        match self {
            Self::SeparateVolumes | Self::Multichannel => &[Modality::Pet, Modality::Ct],
            Self::Unimodal(Modality::Pet) => &[Modality::Pet],
            Self::Unimodal(Modality::Ct) => &[Modality::Ct],
        }
    }

    /// 用 `load` 逐个加载所需模态, 并组装成影像部分.
    pub fn load_image<D, F>(&self, mut load: F) -> LoadResult<Image<D>>
    where
        D: Dimension,
        D::Larger: RemoveAxis,
        F: FnMut(Modality) -> LoadResult<Array<f32, D>>,
    {
        let image = match *self {
            Self::Unimodal(modality) => Image::Single {
                modality,
                volume: load(modality)?,
            },
            Self::SeparateVolumes | Self::Multichannel => Image::Separate {
                pet: load(Modality::Pet)?,
                ct: load(Modality::Ct)?,
            },
        };
        if *self == Self::Multichannel {
            let stacked = image
                .stacked()
                .map_err(|e| LoadError::Shape(e.to_string()))?;
            return Ok(Image::Multichannel(stacked));
        }
        Ok(image)
    }
}

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_dataset_dir()?;
    ans.extend(it);
    Some(ans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Fields;
    use ndarray::{Array2, Ix2};

    fn planar(id: &str, v: f32) -> Subject<Ix2> {
        let image = Image::Single {
            modality: Modality::Ct,
            volume: Array2::from_elem((3, 4), v),
        };
        Subject::new(id, Fields::new(image, None)).unwrap()
    }

    #[test]
    fn test_vec_source() {
        let src = VecSource::from(vec![planar("a", 1.0), planar("b", 2.0)]);
        assert_eq!(src.len(), 2);
        assert!(!src.is_empty());
        assert_eq!(src.get(1).unwrap().id(), "b");
        assert!(matches!(src.get(2), Err(LoadError::IndexOutOfRange(2, 2))));
        assert!(VecSource::<Ix2>::default().is_empty());
    }

    #[test]
    fn test_representation() {
        let load = |m: Modality| -> LoadResult<Array2<f32>> {
            Ok(Array2::from_elem((2, 2), m.channel() as f32 + 1.0))
        };

        let Image::Multichannel(v) = Representation::Multichannel.load_image(load).unwrap() else {
            panic!("expected multichannel image");
        };
        assert_eq!(v.shape(), &[2, 2, 2]);
        assert_eq!(v[[0, 1, 1]], 1.0);
        assert_eq!(v[[1, 0, 0]], 2.0);

        let img = Representation::Unimodal(Modality::Pet).load_image(load).unwrap();
        assert_eq!(img.names(), vec!["PET"]);
        assert!(matches!(
            Representation::SeparateVolumes.load_image(load).unwrap(),
            Image::Separate { .. }
        ));
    }

    #[test]
    fn test_representation_shape_mismatch() {
        let load = |m: Modality| -> LoadResult<Array2<f32>> {
            Ok(Array2::zeros((2, 2 + m.channel())))
        };
        let e = Representation::Multichannel.load_image(load).unwrap_err();
        assert!(matches!(e, LoadError::Shape(_)));
    }
}
