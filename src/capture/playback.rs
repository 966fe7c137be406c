use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::artifact::AudioArtifact;

/// Revocable reference to a finished recording, e.g. `blob:6f1c…`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlaybackUrl(String);

impl PlaybackUrl {
    fn generate() -> Self {
        Self(format!("blob:{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlaybackUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps playback URLs to the artifacts they keep alive
///
/// An artifact stays reachable until its URL is revoked. Cloning the
/// registry shares the same table.
#[derive(Clone, Default)]
pub struct PlaybackRegistry {
    entries: Arc<RwLock<HashMap<PlaybackUrl, Arc<AudioArtifact>>>>,
}

impl PlaybackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, artifact: Arc<AudioArtifact>) -> PlaybackUrl {
        let url = PlaybackUrl::generate();
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(url.clone(), artifact);
        debug!("Created playback URL {}", url);
        url
    }

    pub fn resolve(&self, url: &PlaybackUrl) -> Option<Arc<AudioArtifact>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(url)
            .cloned()
    }

    /// Release a URL; returns false if it was already revoked
    pub fn revoke(&self, url: &PlaybackUrl) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(url)
            .is_some();
        if removed {
            debug!("Revoked playback URL {}", url);
        }
        removed
    }

    /// Number of live URLs
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
