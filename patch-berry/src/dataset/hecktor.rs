//! HECKTOR 数据集 (nifti 格式) 加载器.
//!
//! 目录布局: 每个病人 `{id}` 有三个文件
//! `{id}_pt.nii.gz`, `{id}_ct.nii.gz`, `{id}_ct_gtvt.nii.gz`.
//! 不做任何预处理 (重采样, 裁剪, 归一化).

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayD, Ix3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use super::{Representation, SubjectSource};
use crate::consts::nii_suffix;
use crate::data::{Fields, Modality, Subject};
use crate::error::{LoadError, LoadResult};

/// [W, H, z] -> [z, H, W].
fn to_dhw<T: Clone>(data: ArrayD<T>) -> LoadResult<Array3<T>> {
    let data = data
        .permuted_axes([2, 1, 0].as_slice())
        .into_dimensionality::<Ix3>()
        .map_err(|e| LoadError::Shape(format!("expected a 3D volume: {e}")))?;

    // nifti 数据本身是 Fortran 序, 换轴后即为标准布局.
    if data.is_standard_layout() {
        Ok(data)
    } else {
        Ok(data.as_standard_layout().into_owned())
    }
}

/// 打开 nii 格式的 3D 强度体数据, 轴序转换为 (D, H, W).
pub fn open_intensity<P: AsRef<Path>>(path: P) -> LoadResult<Array3<f32>> {
    let obj = ReaderOptions::new().read_file(path.as_ref())?;
    to_dhw(obj.into_volume().into_ndarray::<f32>()?)
}

/// 打开 nii 格式的 3D 标签体数据, 轴序转换为 (D, H, W).
pub fn open_labelmap<P: AsRef<Path>>(path: P) -> LoadResult<Array3<u8>> {
    let obj = ReaderOptions::new().read_file(path.as_ref())?;
    to_dhw(obj.into_volume().into_ndarray::<u8>()?)
}

/// 读取以换行分隔的病人 ID 文件. 忽略空行和首尾空白.
pub fn read_id_file<P: AsRef<Path>>(path: P) -> LoadResult<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect())
}

/// HECKTOR nifti 数据源.
#[derive(Debug, Clone)]
pub struct NiftiSource {
    dir: PathBuf,
    ids: Vec<String>,
    representation: Representation,
    with_label: bool,
}

impl NiftiSource {
    /// 从目录 `dir` 和病人 ID 列表创建数据源. 默认加载标签.
    ///
    /// 文件在 [`SubjectSource::get`] 时才打开, 因此这里不会失败.
    pub fn new<P: AsRef<Path>>(dir: P, ids: Vec<String>, representation: Representation) -> Self {
        Self {
            dir: dir.as_ref().to_owned(),
            ids,
            representation,
            with_label: true,
        }
    }

    /// 从目录 `dir` 和 ID 文件 `id_file` 创建数据源.
    pub fn from_id_file<P: AsRef<Path>, Q: AsRef<Path>>(
        dir: P,
        id_file: Q,
        representation: Representation,
    ) -> LoadResult<Self> {
        Ok(Self::new(dir, read_id_file(id_file)?, representation))
    }

    /// 不加载标签 (推理阶段).
    #[inline]
    pub fn without_label(mut self) -> Self {
        self.with_label = false;
        self
    }

    /// 病人 ID.
    #[inline]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// 数据目录.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &str, suffix: &str) -> PathBuf {
        self.dir.join(format!("{id}{suffix}"))
    }
}

impl SubjectSource<Ix3> for NiftiSource {
    #[inline]
    fn len(&self) -> usize {
        self.ids.len()
    }

    fn get(&self, index: usize) -> LoadResult<Subject<Ix3>> {
        let id = self
            .ids
            .get(index)
            .ok_or(LoadError::IndexOutOfRange(index, self.len()))?;

        let image = self.representation.load_image(|m| {
            let suffix = match m {
                Modality::Pet => nii_suffix::PET,
                Modality::Ct => nii_suffix::CT,
            };
            open_intensity(self.path(id, suffix))
        })?;
        let label = if self.with_label {
            Some(open_labelmap(self.path(id, nii_suffix::GTV))?)
        } else {
            None
        };

        Subject::new(id.as_str(), Fields::new(image, label))
            .map_err(|e| LoadError::Shape(format!("subject `{id}`: {e}")))
    }
}
