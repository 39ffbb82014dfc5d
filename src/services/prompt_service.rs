//! Pedagogy-mode instruction text: lookup, validation and a load-once cache.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::models::pedagogy::{self, PedagogyMode, UnknownPedagogyMode};

pub const DEFAULT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error(transparent)]
    InvalidMode(#[from] UnknownPedagogyMode),
    #[error("Prompt resource not found: {0}")]
    ResourceMissing(String),
    #[error("Failed to read prompt resource {resource}: {source}")]
    Io {
        resource: String,
        #[source]
        source: std::io::Error,
    },
}

/// Named instruction-text blobs.
#[async_trait]
pub trait PromptStore: Send + Sync {
    async fn load(&self, resource: &str) -> Result<String, PromptError>;

    /// Where resources come from, for logs.
    fn location(&self) -> String;
}

/// Reads `<dir>/<resource>.md`.
pub struct FilePromptStore {
    dir: PathBuf,
}

impl FilePromptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl PromptStore for FilePromptStore {
    async fn load(&self, resource: &str) -> Result<String, PromptError> {
        let path = self.dir.join(format!("{}.md", resource));

        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PromptError::ResourceMissing(path.display().to_string()))
            }
            Err(source) => Err(PromptError::Io {
                resource: path.display().to_string(),
                source,
            }),
        }
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

/// In-process prompt text.
#[derive(Default)]
pub struct StaticPromptStore {
    prompts: HashMap<String, String>,
}

impl StaticPromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt(mut self, resource: impl Into<String>, text: impl Into<String>) -> Self {
        self.prompts.insert(resource.into(), text.into());
        self
    }

    /// One prompt per current mode, each reading "<mode> mode instructions".
    pub fn with_all_modes() -> Self {
        PedagogyMode::ALL.into_iter().fold(Self::new(), |store, mode| {
            store.with_prompt(
                pedagogy::resource_name(mode),
                format!("{} mode instructions", mode),
            )
        })
    }
}

#[async_trait]
impl PromptStore for StaticPromptStore {
    async fn load(&self, resource: &str) -> Result<String, PromptError> {
        self.prompts
            .get(resource)
            .cloned()
            .ok_or_else(|| PromptError::ResourceMissing(resource.to_string()))
    }

    fn location(&self) -> String {
        "static".to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModeListing {
    pub mode: PedagogyMode,
    pub description: &'static str,
    pub resource_name: String,
}

/// Outcome of [`PromptService::preload_all_prompts`].
#[derive(Debug, Default)]
pub struct PreloadReport {
    pub loaded: Vec<PedagogyMode>,
    pub failed: Vec<(PedagogyMode, String)>,
}

impl PreloadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Resolves pedagogy modes to instruction text.
///
/// Loaded text is cached for the lifetime of the service; a failed load is
/// not cached, so the next request retries.
pub struct PromptService {
    store: Arc<dyn PromptStore>,
    cache: RwLock<HashMap<PedagogyMode, String>>,
}

impl PromptService {
    pub fn new(store: Arc<dyn PromptStore>) -> Self {
        info!("PromptService initialized with prompts from {}", store.location());
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FilePromptStore::new(dir)))
    }

    pub async fn get_mode_prompt(&self, mode: PedagogyMode) -> Result<String, PromptError> {
        if let Some(cached) = self.cache.read().await.get(&mode) {
            debug!("Returning cached prompt for mode '{}'", mode);
            return Ok(cached.clone());
        }

        let resource = pedagogy::resource_name(mode);
        let text = self.store.load(&resource).await.map_err(|e| {
            error!("Failed to load prompt for mode '{}': {}", mode, e);
            e
        })?;

        self.cache.write().await.insert(mode, text.clone());
        info!("Loaded and cached prompt for mode '{}' from {}", mode, resource);
        Ok(text)
    }

    /// Same as [`Self::get_mode_prompt`] for a raw mode name.
    pub async fn get_mode_prompt_str(&self, raw: &str) -> Result<String, PromptError> {
        let mode = self.validate_mode(Some(raw))?;
        self.get_mode_prompt(mode).await
    }

    /// `None` yields the default mode. Retired names are not accepted here.
    pub fn validate_mode(&self, raw: Option<&str>) -> Result<PedagogyMode, PromptError> {
        match raw {
            None => Ok(PedagogyMode::default()),
            Some(s) => s.parse::<PedagogyMode>().map_err(|e| {
                debug!("Rejected pedagogy mode: {}", e);
                PromptError::from(e)
            }),
        }
    }

    pub async fn get_combined_prompt(
        &self,
        base_prompt: &str,
        mode: PedagogyMode,
        separator: &str,
    ) -> Result<String, PromptError> {
        let mode_prompt = self.get_mode_prompt(mode).await?;
        let combined = format!("{}{}{}", base_prompt, separator, mode_prompt);
        debug!(
            "Combined base prompt with {} mode prompt ({} chars)",
            mode,
            combined.len()
        );
        Ok(combined)
    }

    pub fn get_mode_description(&self, mode: PedagogyMode) -> &'static str {
        pedagogy::description(mode)
    }

    pub fn list_available_modes(&self) -> Vec<ModeListing> {
        PedagogyMode::ALL
            .into_iter()
            .map(|mode| ModeListing {
                mode,
                description: pedagogy::description(mode),
                resource_name: pedagogy::resource_name(mode),
            })
            .collect()
    }

    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
        info!("Cleared prompt cache");
    }

    /// Load every mode's text now so missing resources show up at startup.
    /// Never fails; the report says what did not load.
    pub async fn preload_all_prompts(&self) -> PreloadReport {
        info!("Preloading all pedagogy mode prompts...");
        let mut report = PreloadReport::default();

        for mode in PedagogyMode::ALL {
            match self.get_mode_prompt(mode).await {
                Ok(_) => report.loaded.push(mode),
                Err(e) => report.failed.push((mode, e.to_string())),
            }
        }

        if report.is_complete() {
            info!("Successfully preloaded {} mode prompts", report.loaded.len());
        } else {
            tracing::warn!(
                "Preloaded {} of {} mode prompts; missing ones load on demand",
                report.loaded.len(),
                PedagogyMode::ALL.len()
            );
        }
        report
    }
}
