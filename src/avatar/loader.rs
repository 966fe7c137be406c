use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use super::model::AvatarModel;

/// Where avatar assets come from
#[async_trait::async_trait]
pub trait AssetSource: Send + Sync {
    /// Fetch the raw bytes of an asset path such as `/ananya.vrm`
    async fn fetch(&self, path: &str) -> Result<Vec<u8>>;

    /// Get source name for logging
    fn name(&self) -> &str;
}

/// Assets served from a static directory on disk
pub struct FsAssetSource {
    root: PathBuf,
}

impl FsAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map an asset path onto the root, refusing anything that escapes it
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.root.clone();

        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => bail!("Asset path escapes the asset root: {}", path),
            }
        }

        if resolved == self.root {
            bail!("Empty asset path");
        }

        Ok(resolved)
    }
}

#[async_trait::async_trait]
impl AssetSource for FsAssetSource {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let file = self.resolve(path)?;
        tokio::fs::read(&file)
            .await
            .with_context(|| format!("Failed to read asset {}", file.display()))
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}

/// In-memory assets, keyed by path
#[derive(Default, Clone)]
pub struct MemoryAssetSource {
    assets: HashMap<String, Arc<Vec<u8>>>,
}

impl MemoryAssetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: Vec<u8>) {
        self.assets.insert(path.into(), Arc::new(bytes));
    }
}

#[async_trait::async_trait]
impl AssetSource for MemoryAssetSource {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        self.assets
            .get(path)
            .map(|bytes| bytes.as_ref().clone())
            .with_context(|| format!("No asset registered at {}", path))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Fetches and prepares avatar models
#[derive(Clone)]
pub struct ModelLoader {
    source: Arc<dyn AssetSource>,
}

impl ModelLoader {
    pub fn new(source: Arc<dyn AssetSource>) -> Self {
        Self { source }
    }

    /// Fetch, parse and strip redundant joints
    pub async fn load(&self, path: &str) -> Result<AvatarModel> {
        info!("Loading avatar {} from {} source", path, self.source.name());

        let bytes = self.source.fetch(path).await?;
        let mut model = AvatarModel::from_glb(&bytes)
            .with_context(|| format!("Failed to parse avatar {}", path))?;

        let removed = model.remove_unnecessary_joints();

        info!(
            "Avatar loaded: {} ({} bytes, {} expressions, {} redundant joints removed)",
            path,
            bytes.len(),
            model.expressions.len(),
            removed
        );

        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_stays_under_root() {
        let source = FsAssetSource::new("/srv/public");
        assert_eq!(
            source.resolve("/ananya.vrm").unwrap(),
            PathBuf::from("/srv/public/ananya.vrm")
        );
        assert_eq!(
            source.resolve("models/./a.vrm").unwrap(),
            PathBuf::from("/srv/public/models/a.vrm")
        );
        assert!(source.resolve("/../secret.vrm").is_err());
        assert!(source.resolve("/").is_err());
    }

    #[tokio::test]
    async fn memory_source_reports_missing_assets() {
        let mut source = MemoryAssetSource::new();
        source.insert("/a.vrm", vec![1, 2, 3]);

        assert_eq!(source.fetch("/a.vrm").await.unwrap(), vec![1, 2, 3]);
        assert!(source.fetch("/b.vrm").await.is_err());
    }
}
