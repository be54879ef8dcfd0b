//! Fetch coordinator - downloads each file of an accepted manifest
//!
//! A missing filename or a transport error is transient and the same link is
//! re-issued immediately. After `max_retries` retries the index is abandoned
//! without another request. Write errors end the index but never the run.

use crate::engine::controller::{FileOutcome, RunState, Shared};
use crate::engine::registry::RequestId;
use crate::error::ShareError;
use crate::transport::TransportResponse;
use shareget_types::{Endpoint, RunEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Immutable context of one fetch attempt
#[derive(Debug, Clone)]
pub(crate) struct FetchContext {
    pub(crate) run_id: Uuid,
    pub(crate) endpoint: Endpoint,
    pub(crate) index: u32,
    pub(crate) link: String,
    pub(crate) directory: PathBuf,
    pub(crate) expected_total: u32,
    /// `None` on the first attempt, then 1, 2, ...
    pub(crate) retry: Option<u32>,
}

impl FetchContext {
    pub(crate) fn first(
        run_id: Uuid,
        endpoint: Endpoint,
        index: u32,
        directory: PathBuf,
        expected_total: u32,
    ) -> Self {
        let link = endpoint.file_url(index);
        Self {
            run_id,
            endpoint,
            index,
            link,
            directory,
            expected_total,
            retry: None,
        }
    }

    fn next_retry(&self) -> Self {
        Self {
            retry: Some(self.retry.unwrap_or(0) + 1),
            ..self.clone()
        }
    }

    /// Network attempts made before this one
    fn attempts_before(&self) -> u32 {
        self.retry.unwrap_or(0)
    }
}

/// Pull the filename out of a `Content-Disposition` value.
///
/// Prefers the RFC 5987 `filename*=` form, then `filename="..."`, then an
/// unquoted `filename=`.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    let lower = value.to_ascii_lowercase();

    if let Some(pos) = lower.find("filename*=") {
        let raw = value[pos + "filename*=".len()..]
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .trim_matches('"');
        let encoded = raw.split_once("''").map_or(raw, |(_, rest)| rest);
        if let Ok(decoded) = urlencoding::decode(encoded) {
            let decoded = decoded.trim();
            if !decoded.is_empty() {
                return Some(decoded.to_string());
            }
        }
    }

    let start = lower.find("filename=")? + "filename=".len();
    let rest = value[start..].trim_start();
    let name = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next().unwrap_or_default(),
        None => rest.split(';').next().unwrap_or_default().trim(),
    };
    (!name.is_empty()).then(|| name.to_string())
}

/// Strip characters that are invalid in file names on common filesystems.
/// Names that would escape the target directory come back empty.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .filter(|c| !c.is_control())
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.chars().all(|c| c == '.') {
        return String::new();
    }
    cleaned.to_string()
}

impl Shared {
    /// Issue one fetch attempt, or abandon the index once retries run out
    pub(crate) fn fetch(self: &Arc<Self>, state: &mut RunState, ctx: FetchContext) {
        if let Some(retry) = ctx.retry {
            if retry > self.config.max_retries {
                warn!(
                    "Giving up on file {} from {} after {} attempts",
                    ctx.index,
                    ctx.endpoint,
                    ctx.attempts_before()
                );
                self.emit(RunEvent::FileAbandoned {
                    index: ctx.index,
                    attempts: ctx.attempts_before(),
                });
                self.record_outcome(state, ctx.run_id, FileOutcome::Abandoned);
                return;
            }
            self.emit(RunEvent::FetchRetrying {
                index: ctx.index,
                attempt: retry,
            });
        }

        let endpoint = ctx.endpoint.clone();
        let link = ctx.link.clone();
        self.issue(state, &endpoint, &link, move |shared, id, result| {
            shared.on_fetch_response(ctx, id, result)
        });
    }

    pub(crate) async fn on_fetch_response(
        self: Arc<Self>,
        ctx: FetchContext,
        id: RequestId,
        result: Result<TransportResponse, ShareError>,
    ) {
        let (filename, body) = {
            let mut state = self.state.lock();
            if !state.registry.is_registered(&ctx.endpoint, id) {
                debug!("Ignoring response for file {}: request cancelled", ctx.index);
                return;
            }

            match attachment(result) {
                Ok(found) => found,
                Err(reason) => {
                    debug!("File {} from {} failed: {}", ctx.index, ctx.endpoint, reason);
                    state.registry.release(&ctx.endpoint, id);
                    self.fetch(&mut state, ctx.next_retry());
                    return;
                }
            }
        };

        let mut filename = sanitize_filename(&filename);
        if filename.is_empty() {
            filename = format!("file-{}", ctx.index);
        }
        let path = ctx.directory.join(&filename);
        let bytes = body.len() as u64;
        let written = tokio::fs::write(&path, &body).await;

        let completed = {
            let mut state = self.state.lock();
            if !state.registry.release(&ctx.endpoint, id) {
                debug!("File {} written after its run was cancelled", ctx.index);
                return;
            }

            match written {
                Ok(()) => {
                    info!(
                        "Saved file {}/{} as {} ({} bytes)",
                        ctx.index + 1,
                        ctx.expected_total,
                        path.display(),
                        bytes
                    );
                    self.emit(RunEvent::FileSaved {
                        index: ctx.index,
                        filename,
                        path,
                        bytes,
                    });
                    self.record_outcome(&mut state, ctx.run_id, FileOutcome::Saved)
                }
                Err(e) => {
                    error!("Failed to write {}: {}", path.display(), e);
                    self.emit(RunEvent::FileFailed {
                        index: ctx.index,
                        error: e.to_string(),
                    });
                    self.record_outcome(&mut state, ctx.run_id, FileOutcome::Failed)
                }
            }
        };

        if let Some(directory) = completed {
            self.notify_completion(&directory);
        }
    }
}

/// Split a fetch result into filename and payload, or the transient reason
fn attachment(
    result: Result<TransportResponse, ShareError>,
) -> Result<(String, Vec<u8>), String> {
    let response = result.map_err(|e| e.to_string())?;
    let filename = response
        .content_disposition()
        .and_then(filename_from_disposition)
        .ok_or_else(|| format!("no filename in response (HTTP {})", response.status))?;
    Ok((filename, response.body))
}
