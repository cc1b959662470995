use crate::domain::ports::Storage;
use crate::utils::error::Result;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Artifacts on the local file system. Staged files live in the output
/// directory itself so that publishing is a rename on the same volume.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }
}

impl Storage for LocalStorage {
    type Staged = BufWriter<NamedTempFile>;

    fn stage(&self) -> Result<Self::Staged> {
        fs::create_dir_all(&self.base_path)?;
        let file = tempfile::Builder::new()
            .prefix(".staging-")
            .suffix(".part")
            .tempfile_in(&self.base_path)?;
        Ok(BufWriter::new(file))
    }

    fn publish(&self, staged: Self::Staged, name: &str) -> Result<String> {
        let file = staged.into_inner().map_err(|e| e.into_error())?;
        file.as_file().sync_all()?;

        let target = self.full_path(name);
        // 目標已存在時不覆寫
        file.persist_noclobber(&target).map_err(|e| e.error)?;

        tracing::debug!("📁 Artifact published: {}", target.display());
        Ok(target.display().to_string())
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let data = fs::read(self.full_path(name))?;
        Ok(data)
    }

    fn exists(&self, name: &str) -> bool {
        self.full_path(name).is_file()
    }

    fn remove(&self, name: &str) -> Result<()> {
        fs::remove_file(self.full_path(name))?;
        Ok(())
    }
}
