use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const LLM_KEY: &str = "pref_llm";
pub const TTS_KEY: &str = "pref_tts";

pub const LLM_OPTIONS: &[&str] = &["groq", "openai", "anthropic"];
pub const TTS_OPTIONS: &[&str] = &["coqui", "kokoro"];

pub const DEFAULT_LLM: &str = "groq";
pub const DEFAULT_TTS: &str = "coqui";

/// Durable string key-value store for user preferences
///
/// Backed by a flat JSON object. A missing or unreadable file behaves like an
/// empty store; every `set` rewrites the file.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl PreferenceStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(values) => values,
                Err(e) => {
                    warn!("Ignoring unreadable preferences at {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Failed to read preferences at {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };

        debug!("Opened preference store {} ({} keys)", path.display(), values.len());

        Self { path, values }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Store a value and persist the whole store
    ///
    /// The in-memory value only changes once the file has been written.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.clone();
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)?;
        self.values = values;
        Ok(())
    }

    /// Selected language model provider
    pub fn llm_provider(&self) -> &str {
        self.choice(LLM_KEY, LLM_OPTIONS, DEFAULT_LLM)
    }

    /// Selected speech synthesis provider
    pub fn tts_provider(&self) -> &str {
        self.choice(TTS_KEY, TTS_OPTIONS, DEFAULT_TTS)
    }

    pub fn set_llm_provider(&mut self, provider: &str) -> Result<()> {
        Self::validate(provider, LLM_OPTIONS, "LLM")?;
        self.set(LLM_KEY, provider)?;
        info!("LLM provider set to {}", provider);
        Ok(())
    }

    pub fn set_tts_provider(&mut self, provider: &str) -> Result<()> {
        Self::validate(provider, TTS_OPTIONS, "TTS")?;
        self.set(TTS_KEY, provider)?;
        info!("TTS provider set to {}", provider);
        Ok(())
    }

    // Stored values outside the option list read as the default
    fn choice<'a>(&'a self, key: &str, options: &[&str], default: &'a str) -> &'a str {
        match self.get(key) {
            Some(value) if options.contains(&value) => value,
            _ => default,
        }
    }

    fn validate(value: &str, options: &[&str], kind: &str) -> Result<()> {
        if !options.contains(&value) {
            bail!("Unknown {} provider '{}' (expected one of: {})", kind, value, options.join(", "));
        }
        Ok(())
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(values)
            .context("Failed to serialize preferences")?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }
}
