use std::fs;
use std::path::{Path, PathBuf};

use super::{Modality, MriVolume};
use crate::error::{PipelineError, Result};

/// 一个病人的数据目录.
///
/// 目录结构为 `{root}/{id}/{id}-{modality}.{ext}`. 记录在数据集构建时发现,
/// 之后只读; 体数据在每次访问时才从硬盘加载.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatientRecord {
    id: String,
    dir: PathBuf,
}

impl PatientRecord {
    /// 从数据集根目录和病人编号构造记录. 不检查目录是否存在.
    pub fn new<P: AsRef<Path>>(root: P, id: impl Into<String>) -> Self {
        let id = id.into();
        let dir = root.as_ref().join(&id);
        Self { id, dir }
    }

    /// 以目录本身构造记录. 病人编号为目录名.
    ///
    /// 目录名无法表示为 UTF-8 时返回 `None`.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Option<Self> {
        let dir = dir.as_ref().to_owned();
        let id = dir.file_name()?.to_str()?.to_owned();
        Some(Self { id, dir })
    }

    /// 列出 `root` 下所有直接子目录作为病人记录, 按编号排序.
    pub fn discover<P: AsRef<Path>>(root: P) -> Result<Vec<Self>> {
        let root = root.as_ref();
        let entries = fs::read_dir(root).map_err(|e| PipelineError::io(root, e))?;

        let mut ans = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::io(root, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match Self::from_dir(&path) {
                Some(record) => ans.push(record),
                None => log::warn!("skipping non UTF-8 patient directory {}", path.display()),
            }
        }
        ans.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(ans)
    }

    /// 病人编号.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 病人目录.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 某个模态文件的期望路径.
    pub fn modality_path(&self, modality: Modality, ext: &str) -> PathBuf {
        self.dir.join(format!("{}-{}.{ext}", self.id, modality.tag()))
    }

    /// 该病人是否带有分割掩码文件.
    #[inline]
    pub fn has_seg(&self, ext: &str) -> bool {
        self.modality_path(Modality::Seg, ext).is_file()
    }

    /// 加载某个模态的原始体数据.
    #[inline]
    pub fn load(&self, modality: Modality, ext: &str) -> Result<MriVolume> {
        MriVolume::open(self.modality_path(modality, ext))
    }
}

#[cfg(test)]
mod tests {
    use super::PatientRecord;
    use crate::volume::Modality;
    use std::fs;

    #[test]
    fn test_discover_lists_only_directories_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["BraTS-GLI-00002-000", "BraTS-GLI-00000-000"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("README.txt"), b"not a patient").unwrap();

        let found = PatientRecord::discover(dir.path()).unwrap();
        let ids: Vec<&str> = found.iter().map(|p| p.id()).collect();
        assert_eq!(ids, ["BraTS-GLI-00000-000", "BraTS-GLI-00002-000"]);
        assert!(!found[0].has_seg("nii.gz"));
    }

    #[test]
    fn test_modality_path_layout() {
        let p = PatientRecord::new("/data", "BraTS-GLI-00000-000");
        assert_eq!(
            p.modality_path(Modality::T2f, "nii.gz"),
            std::path::Path::new("/data/BraTS-GLI-00000-000/BraTS-GLI-00000-000-t2f.nii.gz")
        );
    }
}
