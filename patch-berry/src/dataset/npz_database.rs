use std::fmt;
use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use ndarray::{Array3, Ix3, OwnedRepr};
use ndarray_npy::{NpzReader, ReadNpzError, ReadableElement};

use super::{Representation, SubjectSource};
use crate::consts::{npy_suffix, MAX_WORKERS};
use crate::data::{Fields, Modality, Subject};
use crate::error::{LoadError, LoadResult};

/// 打开 `NpzSource` 错误.
#[derive(Debug)]
pub enum OpenArchiveError {
    /// workers 太大. 参数为支持的上限.
    TooManyWorkers(usize),

    /// 打开 npz 文件错误.
    ReadNpzError(ReadNpzError),

    /// 其他底层 I/O 错误.
    IoError(std::io::Error),
}

impl fmt::Display for OpenArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyWorkers(max) => write!(f, "too many workers, at most {max}"),
            Self::ReadNpzError(e) => write!(f, "npz error: {e}"),
            Self::IoError(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for OpenArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TooManyWorkers(_) => None,
            Self::ReadNpzError(e) => Some(e),
            Self::IoError(e) => Some(e),
        }
    }
}

fn npy_suffix_of(m: Modality) -> &'static str {
    match m {
        Modality::Pet => npy_suffix::PET,
        Modality::Ct => npy_suffix::CT,
    }
}

/// Npz 归档数据源.
///
/// 归档中每个病人 `{id}` 有数组 `{id}_pt.npy`, `{id}_ct.npy` 与 `{id}_gtv.npy`,
/// 轴序已经是 (D, H, W).
pub struct NpzSource {
    entries: Vec<Mutex<NpzReader<File>>>,
    turn: AtomicUsize,
    ids: Vec<String>,
    representation: Representation,
    with_label: bool,
}

impl NpzSource {
    /// 初始化.
    ///
    /// `workers` 指定了底层工作通道的个数, 最大为 64. 系统会从路径 `p` 打开文件
    /// `workers` 次, 并为每个打开通道指定一个排他入口点 (以期获得更高的并行度).
    ///
    /// 病人 ID 从归档中的数组名推断 (按字典序排列).
    pub fn new<P: AsRef<Path>>(
        workers: NonZeroUsize,
        p: P,
        representation: Representation,
    ) -> Result<Self, OpenArchiveError> {
        let workers = workers.get();
        if workers > MAX_WORKERS {
            return Err(OpenArchiveError::TooManyWorkers(MAX_WORKERS));
        }
        let mut v = Vec::with_capacity(workers);
        for _ in 0..workers {
            let file = OpenOptions::new()
                .read(true)
                .open(p.as_ref())
                .map_err(OpenArchiveError::IoError)?;
            v.push(Mutex::new(
                NpzReader::new(file).map_err(OpenArchiveError::ReadNpzError)?,
            ));
        }

        let mut ans = Self {
            entries: v,
            turn: AtomicUsize::new(0),
            ids: vec![],
            representation,
            with_label: true,
        };
        ans.ids = ans.discover_ids().map_err(OpenArchiveError::ReadNpzError)?;
        Ok(ans)
    }

    fn discover_ids(&self) -> Result<Vec<String>, ReadNpzError> {
        let suffix = self
            .representation
            .modalities()
            .first()
            .map_or(npy_suffix::CT, |&m| npy_suffix_of(m));
        let mut ids: Vec<String> = self
            .names()?
            .iter()
            .filter_map(|name| name.strip_suffix(suffix))
            .map(String::from)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
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

    /// 获取底层 npz 文件包含的所有数组名.
    pub fn names(&self) -> Result<Vec<String>, ReadNpzError> {
        self.lock_next().names()
    }

    /// 通过数组名 `name` 获取底层 3D 数组.
    pub fn array_by_name<A: ReadableElement>(&self, name: &str) -> Result<Array3<A>, ReadNpzError> {
        self.lock_next().by_name::<OwnedRepr<A>, Ix3>(name)
    }

    /// 工作通道个数.
    #[inline]
    pub fn worker_len(&self) -> usize {
        self.entries.len()
    }

    fn lock_next(&self) -> std::sync::MutexGuard<'_, NpzReader<File>> {
        let slot = self.turn.fetch_add(1, Ordering::Relaxed) % self.worker_len();
        // 读取器本身没有会被中途打断的不变式, 中毒后仍可继续使用.
        self.entries[slot]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl SubjectSource<Ix3> for NpzSource {
    #[inline]
    fn len(&self) -> usize {
        self.ids.len()
    }

    fn get(&self, index: usize) -> LoadResult<Subject<Ix3>> {
        let id = self
            .ids
            .get(index)
            .ok_or(LoadError::IndexOutOfRange(index, self.len()))?;

        let image = self
            .representation
            .load_image(|m| Ok(self.array_by_name(&format!("{id}{}", npy_suffix_of(m)))?))?;
        let label = if self.with_label {
            Some(self.array_by_name(&format!("{id}{}", npy_suffix::GTV))?)
        } else {
            None
        };

        Subject::new(id.as_str(), Fields::new(image, label))
            .map_err(|e| LoadError::Shape(format!("subject `{id}`: {e}")))
    }
}
