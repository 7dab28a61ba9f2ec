//! subject 与 patch 的固定字段结构.
//!
//! 每个 subject 由一个影像部分 ([`Image`]) 和一个可选的标签部分组成.
//! 影像部分的表示方式 (单模态, 分离体数据, 多通道体数据) 在构造时确定,
//! 采样与聚合过程中不再做任何运行时键查找.

use std::sync::Arc;

use ndarray::{Array, ArrayView, Axis, Dimension, Ix2, Ix3, RemoveAxis};

use super::{pad_trailing, spatial_dim};
use crate::consts::{field, CHANNEL_CT, CHANNEL_PET};
use crate::error::{PatchError, PatchResult};
use crate::sampling::window_view;

/// 多通道表示的通道个数.
const MULTICHANNEL_LEN: usize = 2;

/// 影像模态.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Modality {
    /// PET.
    Pet,

    /// CT.
    Ct,
}

impl Modality {
    /// 规范字段名.
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pet => field::PET,
            Self::Ct => field::CT,
        }
    }

    /// 在多通道表示中所在的通道.
    #[inline]
    pub const fn channel(&self) -> usize {
        match self {
            Self::Pet => CHANNEL_PET,
            Self::Ct => CHANNEL_CT,
        }
    }
}

/// subject (或 patch) 的影像部分.
#[derive(Debug, Clone)]
pub enum Image<D: Dimension> {
    /// 单模态体数据.
    Single {
        /// 模态.
        modality: Modality,
        /// 体数据.
        volume: Array<f32, D>,
    },

    /// PET 与 CT 分别保存的体数据.
    Separate {
        /// PET 体数据.
        pet: Array<f32, D>,
        /// CT 体数据.
        ct: Array<f32, D>,
    },

    /// 通道在前 (channel-first) 的多通道体数据, 恰好两个通道, 顺序为 (PET, CT).
    Multichannel(Array<f32, D::Larger>),
}

impl<D: Dimension> Image<D> {
    /// 空间形状 (不含通道轴).
    pub fn shape(&self) -> D {
        match self {
            Self::Single { volume, .. } => volume.raw_dim(),
            Self::Separate { pet, .. } => pet.raw_dim(),
            Self::Multichannel(v) => spatial_dim(v.shape()),
        }
    }

    /// 通道个数.
    pub fn channels(&self) -> usize {
        match self {
            Self::Single { .. } => 1,
            Self::Separate { .. } => 2,
            Self::Multichannel(v) => v.len_of(Axis(0)),
        }
    }

    /// 该表示所携带的规范字段名.
    pub fn names(&self) -> Vec<&'static str> {
        match self {
            Self::Single { modality, .. } => vec![modality.name()],
            Self::Separate { .. } => vec![field::PET, field::CT],
            Self::Multichannel(_) => vec![field::PET_CT],
        }
    }

    /// 检查各模态形状一致, 返回空间形状.
    fn check_shape(&self) -> PatchResult<D> {
        match self {
            Self::Separate { pet, ct } if pet.shape() != ct.shape() => {
                Err(PatchError::config(format!(
                    "PET shape {:?} differs from CT shape {:?}",
                    pet.shape(),
                    ct.shape()
                )))
            }
            Self::Multichannel(v) if v.len_of(Axis(0)) != MULTICHANNEL_LEN => {
                Err(PatchError::config(format!(
                    "multichannel volume must have {MULTICHANNEL_LEN} channels (PET, CT), got {}",
                    v.len_of(Axis(0))
                )))
            }
            _ => Ok(self.shape()),
        }
    }

    /// 以 `focal` 为中心截取形状为 `patch` 的窗口. 多通道数据保留完整通道轴.
    pub fn window(&self, focal: &D, patch: &D) -> PatchResult<Self> {
        let (f, p) = (focal.slice(), patch.slice());
        Ok(match self {
            Self::Single { modality, volume } => Self::Single {
                modality: *modality,
                volume: window_view(volume.view(), f, p)?.to_owned(),
            },
            Self::Separate { pet, ct } => Self::Separate {
                pet: window_view(pet.view(), f, p)?.to_owned(),
                ct: window_view(ct.view(), f, p)?.to_owned(),
            },
            Self::Multichannel(v) => Self::Multichannel(window_view(v.view(), f, p)?.to_owned()),
        })
    }

    /// 在每个空间轴尾部补 `unpadding` 个零体素.
    pub fn padded(&self, unpadding: usize) -> Self {
        match self {
            Self::Single { modality, volume } => Self::Single {
                modality: *modality,
                volume: pad_trailing(volume, unpadding, 0),
            },
            Self::Separate { pet, ct } => Self::Separate {
                pet: pad_trailing(pet, unpadding, 0),
                ct: pad_trailing(ct, unpadding, 0),
            },
            Self::Multichannel(v) => Self::Multichannel(pad_trailing(v, unpadding, 1)),
        }
    }
}

impl<D: Dimension> Image<D>
where
    D::Larger: RemoveAxis,
{
    /// 获得通道顺序为 (PET, CT) 的堆叠表示.
    ///
    /// 单模态数据无法构成该通道布局, 返回 `Err(InvalidConfiguration)`.
    pub fn stacked(&self) -> PatchResult<Array<f32, D::Larger>> {
        match self {
            Self::Single { modality, .. } => Err(PatchError::config(format!(
                "cannot stack a unimodal {} image into PET/CT channels",
                modality.name()
            ))),
            Self::Separate { pet, ct } => ndarray::stack(Axis(0), &[pet.view(), ct.view()])
                .map_err(|e| PatchError::config(format!("cannot stack PET/CT: {e}"))),
            Self::Multichannel(v) => Ok(v.clone()),
        }
    }

    /// 获取指定模态的不可变视图. 若该表示不包含此模态则返回 `None`.
    pub fn modality(&self, m: Modality) -> Option<ArrayView<'_, f32, D>> {
        match self {
            Self::Single { modality, volume } => (*modality == m).then(|| volume.view()),
            Self::Separate { pet, ct } => Some(match m {
                Modality::Pet => pet.view(),
                Modality::Ct => ct.view(),
            }),
            Self::Multichannel(v) => {
                if v.len_of(Axis(0)) != MULTICHANNEL_LEN {
                    return None;
                }
                v.index_axis(Axis(0), m.channel())
                    .into_dimensionality::<D>()
                    .ok()
            }
        }
    }
}

/// subject 或 patch 的全部字段: 影像部分和可选的标签部分.
#[derive(Debug, Clone)]
pub struct Fields<D: Dimension> {
    /// 影像.
    pub image: Image<D>,

    /// GTV 标签. 推理阶段的 subject 没有标签.
    pub label: Option<Array<u8, D>>,
}

impl<D: Dimension> Fields<D> {
    /// 组装字段. 形状一致性在 [`Subject::new`] 中检查.
    #[inline]
    pub fn new(image: Image<D>, label: Option<Array<u8, D>>) -> Self {
        Self { image, label }
    }

    /// 空间形状.
    #[inline]
    pub fn shape(&self) -> D {
        self.image.shape()
    }

    /// 检查所有字段空间形状一致, 返回该形状.
    pub fn check_shape(&self) -> PatchResult<D> {
        let shape = self.image.check_shape()?;
        match &self.label {
            Some(label) if label.raw_dim() != shape => Err(PatchError::config(format!(
                "label shape {:?} differs from image shape {:?}",
                label.shape(),
                shape.slice()
            ))),
            _ => Ok(shape),
        }
    }

    /// 该结构所携带的规范字段名.
    pub fn names(&self) -> Vec<&'static str> {
        let mut ans = self.image.names();
        if self.label.is_some() {
            ans.push(field::GTV_LABELMAP);
        }
        ans
    }

    /// 标签的不可变视图.
    #[inline]
    pub fn label_view(&self) -> Option<ArrayView<'_, u8, D>> {
        self.label.as_ref().map(|l| l.view())
    }

    /// 对所有字段统一截取以 `focal` 为中心, 形状为 `patch` 的窗口.
    pub fn window(&self, focal: &D, patch: &D) -> PatchResult<Self> {
        let label = match &self.label {
            Some(l) => Some(window_view(l.view(), focal.slice(), patch.slice())?.to_owned()),
            None => None,
        };
        Ok(Self {
            image: self.image.window(focal, patch)?,
            label,
        })
    }

    /// 在每个空间轴尾部补 `unpadding` 个零体素.
    pub fn padded(&self, unpadding: usize) -> Self {
        Self {
            image: self.image.padded(unpadding),
            label: self.label.as_ref().map(|l| pad_trailing(l, unpadding, 0)),
        }
    }
}

impl<D: Dimension> Fields<D>
where
    D::Larger: RemoveAxis,
{
    /// 将影像部分转换为多通道表示.
    pub fn stack(self) -> PatchResult<Self> {
        let Self { image, label } = self;
        let image = match image {
            Image::Multichannel(v) => Image::Multichannel(v),
            other => Image::Multichannel(other.stacked()?),
        };
        Ok(Self { image, label })
    }
}

/// 同一病人的一组配准体数据, 以及其标识.
#[derive(Debug, Clone)]
pub struct Subject<D: Dimension> {
    id: Arc<str>,
    fields: Fields<D>,
}

impl<D: Dimension> Subject<D> {
    /// 创建 subject. 若各字段空间形状不一致, 或形状中存在 0,
    /// 则返回 `Err(InvalidConfiguration)`.
    pub fn new<S: Into<String>>(id: S, fields: Fields<D>) -> PatchResult<Self> {
        let shape = fields.check_shape()?;
        super::check_positive("volume shape", &shape)?;
        Ok(Self {
            id: Arc::from(id.into()),
            fields,
        })
    }

    /// 标识.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub(crate) fn shared_id(&self) -> Arc<str> {
        Arc::clone(&self.id)
    }

    /// 字段.
    #[inline]
    pub fn fields(&self) -> &Fields<D> {
        &self.fields
    }

    /// 消费自我, 获得字段.
    #[inline]
    pub fn into_fields(self) -> Fields<D> {
        self.fields
    }

    /// 空间形状.
    #[inline]
    pub fn shape(&self) -> D {
        self.fields.shape()
    }

    /// 获得每个空间轴尾部补 `unpadding` 个零体素后的 subject.
    pub fn padded(&self, unpadding: usize) -> Self {
        Self {
            id: self.shared_id(),
            fields: self.fields.padded(unpadding),
        }
    }
}

/// 从 subject 中截取的固定形状子块, 以及截取时使用的焦点.
///
/// patch 创建后不可变.
#[derive(Debug, Clone)]
pub struct Patch<D: Dimension> {
    subject_id: Arc<str>,
    focal: D,
    fields: Fields<D>,
}

impl<D: Dimension> Patch<D> {
    /// 在 `focal` 处从 `subject` 截取形状为 `patch` 的 patch.
    pub fn extract(subject: &Subject<D>, focal: D, patch: &D) -> PatchResult<Self> {
        let fields = subject.fields().window(&focal, patch)?;
        Ok(Self {
            subject_id: subject.shared_id(),
            focal,
            fields,
        })
    }

    /// 来源 subject 的标识.
    #[inline]
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// 焦点.
    #[inline]
    pub fn focal(&self) -> &D {
        &self.focal
    }

    /// 字段.
    #[inline]
    pub fn fields(&self) -> &Fields<D> {
        &self.fields
    }

    /// 消费自我, 获得字段.
    #[inline]
    pub fn into_fields(self) -> Fields<D> {
        self.fields
    }

    /// 该 patch 所携带的规范字段名.
    #[inline]
    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.names()
    }
}

impl Patch<Ix3> {
    /// 将深度为 1 的 3D patch 压缩为 2D 字段. 深度不为 1 时返回 `None`.
    pub fn squeeze_planar(&self) -> Option<Fields<Ix2>> {
        if self.fields.shape()[0] != 1 {
            return None;
        }
        let image = match &self.fields.image {
            Image::Single { modality, volume } => Image::Single {
                modality: *modality,
                volume: volume.index_axis(Axis(0), 0).to_owned(),
            },
            Image::Separate { pet, ct } => Image::Separate {
                pet: pet.index_axis(Axis(0), 0).to_owned(),
                ct: ct.index_axis(Axis(0), 0).to_owned(),
            },
            Image::Multichannel(v) => Image::Multichannel(v.index_axis(Axis(1), 0).to_owned()),
        };
        let label = self
            .fields
            .label
            .as_ref()
            .map(|l| l.index_axis(Axis(0), 0).to_owned());
        Some(Fields { image, label })
    }
}
