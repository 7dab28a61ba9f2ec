//! 运行时错误.

use std::fmt;

/// 外部数据源加载单个 subject 时的错误.
#[derive(Debug)]
pub enum LoadError {
    /// 读取 nifti 文件错误.
    Nifti(nifti::NiftiError),

    /// 读取 npz 归档错误.
    Npz(ndarray_npy::ReadNpzError),

    /// 其他底层 I/O 错误.
    Io(std::io::Error),

    /// 体数据形状不合法, 或同一 subject 各字段形状不一致.
    Shape(String),

    /// subject 索引越界.
    ///
    /// 第一个参数代表请求的索引, 第二个参数代表数据源长度.
    IndexOutOfRange(usize, usize),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nifti(e) => write!(f, "nifti error: {e}"),
            Self::Npz(e) => write!(f, "npz error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Shape(msg) => write!(f, "shape error: {msg}"),
            Self::IndexOutOfRange(i, len) => {
                write!(f, "subject index {i} out of range (len = {len})")
            }
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Nifti(e) => Some(e),
            Self::Npz(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<nifti::NiftiError> for LoadError {
    fn from(e: nifti::NiftiError) -> Self {
        Self::Nifti(e)
    }
}

impl From<ndarray_npy::ReadNpzError> for LoadError {
    fn from(e: ndarray_npy::ReadNpzError) -> Self {
        Self::Npz(e)
    }
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// patch 采样, 队列与聚合的错误.
#[derive(Debug)]
pub enum PatchError {
    /// 配置非法: patch 在某轴上大于体数据, 形状或步长非正, 维度不匹配,
    /// 或在没有 subject 的情况下请求采样. 在构造时立即报告.
    InvalidConfiguration(String),

    /// 提取/写入窗口超出体数据范围.
    ///
    /// 这代表焦点生成器与提取器 (或聚合器) 之间的形状约定被破坏, 属于编程错误,
    /// 不应重试.
    OutOfBounds {
        /// 窗口焦点.
        focal: Vec<usize>,
        /// 窗口形状.
        patch: Vec<usize>,
        /// 体数据形状.
        volume: Vec<usize>,
    },

    /// 外部数据源加载第 `index` 个 subject 失败.
    SubjectLoadFailure {
        /// subject 在数据源中的索引.
        index: usize,
        /// 底层错误.
        source: LoadError,
    },

    /// 没有任何可用的 subject.
    QueueExhausted,
}

impl PatchError {
    /// 构建 `InvalidConfiguration`.
    #[inline]
    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// 构建 `OutOfBounds`.
    #[inline]
    pub(crate) fn out_of_bounds(focal: &[usize], patch: &[usize], volume: &[usize]) -> Self {
        Self::OutOfBounds {
            focal: focal.to_vec(),
            patch: patch.to_vec(),
            volume: volume.to_vec(),
        }
    }

    /// 是否是可跳过的单 subject 加载错误.
    #[inline]
    pub fn is_load_failure(&self) -> bool {
        matches!(self, Self::SubjectLoadFailure { .. })
    }
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfiguration(msg) => write!(f, "invalid configuration: {msg}"),
            Self::OutOfBounds {
                focal,
                patch,
                volume,
            } => write!(
                f,
                "window of shape {patch:?} at focal point {focal:?} exceeds volume {volume:?}"
            ),
            Self::SubjectLoadFailure { index, source } => {
                write!(f, "failed to load subject #{index}: {source}")
            }
            Self::QueueExhausted => f.write_str("no subject available"),
        }
    }
}

impl std::error::Error for PatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SubjectLoadFailure { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// 数据源加载结果.
pub type LoadResult<T> = Result<T, LoadError>;

/// patch 操作结果.
pub type PatchResult<T> = Result<T, PatchError>;
