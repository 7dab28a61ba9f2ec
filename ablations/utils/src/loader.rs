//! 对 `patch_berry::dataset` 的更一层封装. 提供更直接的数据集加载器.

use patch_berry::consts::nii_suffix;
use patch_berry::dataset::hecktor::NiftiSource;
use patch_berry::dataset::{self, Representation};
use std::path::{Path, PathBuf};
use std::{env, fs, io};

/// 获取 HECKTOR 训练集基本路径.
///
/// 1. 若环境变量 `$HECKTOR_TRAIN_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/dataset/hecktor/train`;
/// 3. 无法确定用户主目录时返回 `None`.
pub fn train_dir_from_env_or_home() -> Option<PathBuf> {
    match env::var("HECKTOR_TRAIN_DIR") {
        Ok(d) if !d.is_empty() => Some(PathBuf::from(d)),
        _ => dataset::home_dataset_dir_with(["hecktor", "train"]),
    }
}

/// 扫描 `dir` 下形如 `{id}_ct.nii.gz` 的文件, 按字典序返回病人 ID.
pub fn discover_ids<P: AsRef<Path>>(dir: P) -> io::Result<Vec<String>> {
    let mut ids = vec![];
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        if let Some(id) = name.to_str().and_then(|s| s.strip_suffix(nii_suffix::CT)) {
            ids.push(id.to_owned());
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// 获取 HECKTOR 训练集数据源.
pub fn train_source<P: AsRef<Path>>(
    dir: P,
    representation: Representation,
) -> io::Result<NiftiSource> {
    let ids = discover_ids(dir.as_ref())?;
    Ok(NiftiSource::new(dir, ids, representation))
}

/// 从 `$HECKTOR_TRAIN_DIR` 或者 `$HOME/dataset/hecktor/train` 下加载 HECKTOR 训练集数据源.
///
/// 目录不存在时返回 `None`.
pub fn train_source_from_env_or_home(representation: Representation) -> Option<NiftiSource> {
    let dir = train_dir_from_env_or_home().filter(|d| d.is_dir())?;
    train_source(dir, representation).ok()
}
