//! shareget Core - Share Download Orchestrator
//!
//! This crate discovers which configured endpoint is sharing files, reads its
//! manifest and downloads every listed file into a local directory. It
//! handles endpoint racing, bounded retry, the idle-abort deadline and
//! cancellation of in-flight requests.

pub mod engine;
mod error;
mod storage;
mod transport;

#[cfg(test)]
mod test_support;

pub use engine::*;
pub use error::*;
pub use storage::*;
pub use transport::*;

use shareget_types::{Endpoint, RunEvent, RunSnapshot, Settings};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// The main shareget core instance
pub struct ShareCore {
    /// Application settings
    pub settings: Arc<RwLock<Settings>>,
    /// Settings persistence
    pub storage: Storage,
    /// Run orchestrator
    controller: RunController,
}

impl ShareCore {
    /// Create a new ShareCore reading its settings from `config_dir`
    pub async fn new(config_dir: PathBuf) -> Result<Self, ShareError> {
        let storage = Storage::new(config_dir).await?;
        let settings = storage.load_settings().await?;

        let transport = HttpTransport::new(&settings)?;
        let (event_tx, _) = broadcast::channel(1000);
        let controller =
            RunController::new(Arc::new(transport), RunConfig::from(&settings), event_tx);

        Ok(Self {
            settings: Arc::new(RwLock::new(settings)),
            storage,
            controller,
        })
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.controller.subscribe()
    }

    pub fn set_completion_hook(&self, hook: CompletionHook) {
        self.controller.set_completion_hook(hook);
    }

    // ========================================================================
    // Run Operations
    // ========================================================================

    /// Start a run.
    ///
    /// `endpoints` overrides the configured endpoints when non-empty and
    /// `directory` overrides the default download path.
    pub async fn start_run(
        &self,
        directory: Option<PathBuf>,
        endpoints: &[String],
    ) -> Result<Uuid, ShareError> {
        let (configured, default_dir) = {
            let settings = self.settings.read().await;
            (
                settings.endpoints.clone(),
                settings.default_download_path.clone(),
            )
        };

        let raw = if endpoints.is_empty() {
            configured.as_slice()
        } else {
            endpoints
        };
        let endpoints = resolve_endpoints(raw)?;
        let directory = directory.unwrap_or(default_dir);

        info!("Run requested for {} endpoint(s)", endpoints.len());
        self.controller.set_endpoints(endpoints);
        self.controller.start_run(directory).await
    }

    /// Cancel the current run, if any
    pub fn cancel_run(&self) {
        self.controller.cancel_run();
    }

    pub fn snapshot(&self) -> Option<RunSnapshot> {
        self.controller.snapshot()
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Get current settings
    pub async fn get_settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Update settings. Timing changes apply to the next `ShareCore`.
    pub async fn update_settings(&self, settings: Settings) -> Result<(), ShareError> {
        resolve_endpoints(&settings.endpoints).or_else(|e| match e {
            ShareError::NoEndpoints => Ok(Vec::new()),
            other => Err(other),
        })?;
        self.storage.save_settings(&settings).await?;
        *self.settings.write().await = settings;
        Ok(())
    }
}

/// Parse configured endpoint strings into an ordered, de-duplicated list.
///
/// Blank entries are skipped. Any malformed entry is an error, and so is an
/// empty result.
pub fn resolve_endpoints(raw: &[String]) -> Result<Vec<Endpoint>, ShareError> {
    let mut seen = HashSet::new();
    let mut endpoints = Vec::new();

    for entry in raw.iter().filter(|e| !e.trim().is_empty()) {
        let endpoint =
            Endpoint::parse(entry).ok_or_else(|| ShareError::InvalidEndpoint(entry.clone()))?;
        if seen.insert(endpoint.clone()) {
            endpoints.push(endpoint);
        }
    }

    if endpoints.is_empty() {
        return Err(ShareError::NoEndpoints);
    }
    Ok(endpoints)
}
