use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use tracing::debug;

use super::{check, dedup_by_address, NodeInfo, NodeStore, StoreError};
use crate::context::Context;
use crate::error::Result;

/// Node list persisted as a YAML sequence.
///
/// The file is read on every `get`, so edits made by hand or by another
/// process are picked up on the next discovery pass. `set` writes a sibling
/// temporary file and renames it over the target, so readers only ever see
/// the old list or the new one.
#[derive(Debug)]
pub struct YamlNodeStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl YamlNodeStore {
    /// Opens the store at `path`, creating an empty file if none exists.
    pub fn new(path: impl Into<PathBuf>) -> std::result::Result<Self, StoreError> {
        let path = path.into();
        if !path.exists() {
            std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;
        }
        Ok(Self {
            path,
            lock: RwLock::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl NodeStore for YamlNodeStore {
    async fn get(&self, ctx: &Context) -> Result<Vec<NodeInfo>> {
        check(ctx)?;
        let _guard = self.lock.read().await;

        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::from(err).into()),
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        let nodes: Vec<NodeInfo> = serde_yaml::from_str(&contents).map_err(StoreError::from)?;
        Ok(nodes)
    }

    async fn set(&self, ctx: &Context, nodes: &[NodeInfo]) -> Result<()> {
        check(ctx)?;
        let _guard = self.lock.write().await;

        let data = serde_yaml::to_string(&dedup_by_address(nodes)).map_err(StoreError::from)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, data.as_bytes()))
            .await
            .map_err(StoreError::from)??;

        debug!(path = %self.path.display(), count = nodes.len(), "node store updated");
        Ok(())
    }
}

fn write_atomically(path: &Path, data: &[u8]) -> std::result::Result<(), StoreError> {
    replace_with(path, |file| file.write_all(data))
}

/// Fills a temporary file next to `path` and renames it over `path`.
///
/// The temporary file is removed if `fill` fails.
fn replace_with<F>(path: &Path, fill: F) -> std::result::Result<(), StoreError>
where
    F: FnOnce(&mut std::fs::File) -> std::io::Result<()>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    fill(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| StoreError::Io(err.error))?;
    Ok(())
}
