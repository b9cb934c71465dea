//! Filesystem-backed key/value store.
//!
//! Each entry is one file under the store directory, sharded by the first two
//! characters of its file name. Keys made only of `[A-Za-z0-9_-]` and longer
//! than two characters are used verbatim; any other key is hex-encoded and
//! gets a `.hex` suffix, which no verbatim name can carry.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs;

use super::ByteStore;
use crate::Error;

static NEXT_TMP: AtomicU64 = AtomicU64::new(0);

/// One file per key below a root directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, Error> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() {
            return Err(Error::BlankPath);
        }
        fs::create_dir_all(root).await?;
        Ok(Self { root: root.to_path_buf() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, Error> {
        if key.is_empty() {
            return Err(Error::BlankPath);
        }
        let safe = key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        let name = if safe && key.len() > 2 { key.to_string() } else { format!("{}.hex", hex::encode(key)) };
        Ok(self.root.join(&name[..2]).join(name))
    }
}

#[async_trait]
impl ByteStore for FsStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        let path = self.path_for(key)?;
        let Some(dir) = path.parent() else {
            return Err(Error::BlankPath);
        };
        fs::create_dir_all(dir).await?;
        let seq = NEXT_TMP.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!("{}.{seq}.tmp", std::process::id()));
        fs::write(&tmp, value).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        match fs::read(self.path_for(key)?).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn has(&self, key: &str) -> Result<bool, Error> {
        Ok(fs::try_exists(self.path_for(key)?).await?)
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        match fs::remove_file(self.path_for(key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<(), Error> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn len(&self) -> Result<usize, Error> {
        let mut count = 0;
        let mut shards = fs::read_dir(&self.root).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.path().extension().is_none_or(|ext| ext != "tmp") {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}
