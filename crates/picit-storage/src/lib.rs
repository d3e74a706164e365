use anyhow::{Result, bail};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

pub const AVATARS: &str = "avatars";
pub const POSTS: &str = "posts";
pub const BUCKETS: [&str; 2] = [AVATARS, POSTS];

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub path: String,
    pub size: u64,
    pub sha256: String,
    pub public_url: String,
}

/// Bucketed object storage on disk.
///
/// Each object lives at `{storage_dir}/{bucket}/{path}`; `path` may contain
/// `/`-separated folders. Metadata (owner, content type) is the database's
/// concern, this type only moves bytes.
#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
    public_base_url: String,
}

impl Storage {
    pub async fn new(dir: PathBuf, public_base_url: &str) -> Result<Self> {
        for bucket in BUCKETS {
            fs::create_dir_all(dir.join(bucket)).await?;
        }
        info!("Object storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `{base}/storage/v1/object/public/{bucket}/{path}`
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.public_base_url, bucket, path)
    }

    /// Inverse of [`public_url`](Self::public_url): the object path inside
    /// `bucket`, if `url` points there.
    pub fn path_from_public_url(&self, bucket: &str, url: &str) -> Option<String> {
        let prefix = format!("{}/storage/v1/object/public/{}/", self.public_base_url, bucket);
        let path = url.strip_prefix(&prefix)?;
        validate_path(path).ok()?;
        Some(path.to_string())
    }

    fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf> {
        if !BUCKETS.contains(&bucket) {
            bail!("Unknown bucket {}", bucket);
        }
        validate_path(path)?;
        Ok(self.dir.join(bucket).join(path))
    }

    /// Write an object. Without `upsert`, an existing object is an error.
    /// A write that fails midway leaves nothing at `path`.
    pub async fn upload(&self, bucket: &str, path: &str, data: &[u8], upsert: bool) -> Result<StoredObject> {
        let target = self.object_path(bucket, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true);
        if upsert {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }
        let mut file = options.open(&target).await?;
        let written = async {
            file.write_all(data).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&target).await {
                warn!("Failed to remove partial object {}/{}: {}", bucket, path, cleanup);
            }
            return Err(e.into());
        }

        let mut hasher = Sha256::new();
        hasher.update(data);

        info!("Stored {}/{} ({} bytes)", bucket, path, data.len());
        Ok(StoredObject {
            bucket: bucket.to_string(),
            path: path.to_string(),
            size: data.len() as u64,
            sha256: hex::encode(hasher.finalize()),
            public_url: self.public_url(bucket, path),
        })
    }

    /// Object bytes, or `None` if nothing is stored at `path`.
    pub async fn read(&self, bucket: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let target = self.object_path(bucket, path)?;
        match fs::read(&target).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete objects. Missing objects are skipped. Returns how many were removed.
    pub async fn remove(&self, bucket: &str, paths: &[&str]) -> Result<usize> {
        let mut removed = 0;
        for path in paths {
            let target = self.object_path(bucket, path)?;
            match fs::remove_file(&target).await {
                Ok(()) => {
                    info!("Deleted {}/{}", bucket, path);
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("Object {}/{} already gone", bucket, path);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    /// Paths of the objects in `bucket` starting with `prefix`, sorted.
    pub async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        if !BUCKETS.contains(&bucket) {
            bail!("Unknown bucket {}", bucket);
        }
        let root = self.dir.join(bucket);
        let mut pending = vec![root.clone()];
        let mut paths = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(entry_path);
                    continue;
                }
                if let Some(relative) = relative_object_path(&root, &entry_path)
                    && relative.starts_with(prefix)
                {
                    paths.push(relative);
                }
            }
        }

        paths.sort();
        Ok(paths)
    }
}

/// Object paths are relative, `/`-separated, with no empty, `.` or `..` segments.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') {
        bail!("Invalid object path {:?}", path);
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            bail!("Invalid object path {:?}", path);
        }
    }
    if Path::new(path)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        bail!("Invalid object path {:?}", path);
    }
    Ok(())
}

fn relative_object_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(segments?.join("/"))
}
