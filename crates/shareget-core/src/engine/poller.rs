//! Manifest poller - asks each endpoint how many files it is sharing
//!
//! Polling failures are terminal for the endpoint within a run. The first
//! endpoint to report a positive total wins: every other endpoint's requests
//! are cancelled before any fetch is issued.

use crate::engine::controller::{RunState, Shared};
use crate::engine::fetcher::FetchContext;
use crate::engine::registry::{RequestId, Selector};
use crate::error::ShareError;
use crate::transport::TransportResponse;
use serde_json::Value;
use shareget_types::{Endpoint, RunEvent, RunStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything a manifest request needs once its response arrives
#[derive(Debug, Clone)]
pub(crate) struct PollContext {
    pub(crate) run_id: Uuid,
    pub(crate) endpoint: Endpoint,
    pub(crate) directory: PathBuf,
}

/// Extract the pending file count from a manifest body.
///
/// The body is a text blob holding a JSON record with a `total` field.
/// Returns `None` unless `total` is a positive integer (a numeric string is
/// accepted too).
pub fn parse_manifest(body: &[u8]) -> Option<u32> {
    let text = std::str::from_utf8(body).ok()?;

    let record: Value = serde_json::from_str(text.trim()).ok().or_else(|| {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str(&text[start..=end]).ok()
    })?;

    let total = match record.get("total")? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };

    u32::try_from(total).ok().filter(|n| *n > 0)
}

impl Shared {
    /// Issue the manifest request for one endpoint
    pub(crate) fn poll(self: &Arc<Self>, state: &mut RunState, ctx: PollContext) {
        let url = ctx.endpoint.info_url();
        let endpoint = ctx.endpoint.clone();
        debug!("Polling {}", url);

        self.issue(state, &endpoint, &url, move |shared, id, result| async move {
            shared.on_manifest(ctx, id, result);
        });
    }

    fn on_manifest(
        self: &Arc<Self>,
        ctx: PollContext,
        id: RequestId,
        result: Result<TransportResponse, ShareError>,
    ) {
        let mut state = self.state.lock();
        if !state.registry.release(&ctx.endpoint, id) {
            debug!("Ignoring manifest from {}: request cancelled", ctx.endpoint);
            return;
        }

        let expected = match result {
            Err(e) => Err(e.to_string()),
            Ok(response) if !response.is_success() => {
                Err(format!("HTTP status {}", response.status))
            }
            Ok(response) => match parse_manifest(&response.body) {
                None => Err("nothing to fetch".to_string()),
                Some(n) if n > self.config.max_files => Err(format!(
                    "manifest lists {} files, over the limit of {}",
                    n, self.config.max_files
                )),
                Some(n) => Ok(n),
            },
        };

        let expected = match expected {
            Ok(n) => n,
            Err(reason) => {
                warn!("Endpoint {} has no manifest: {}", ctx.endpoint, reason);
                self.emit(RunEvent::ManifestRejected {
                    endpoint: ctx.endpoint,
                    reason,
                });
                return;
            }
        };

        let Some(run) = state
            .run
            .as_mut()
            .filter(|run| run.is_live(ctx.run_id) && run.expected.is_none())
        else {
            return;
        };
        run.expected = Some(expected);
        run.endpoint = Some(ctx.endpoint.clone());
        run.status = RunStatus::Fetching;

        // Cancel the losers before anything else happens for the winner
        let losers = state
            .registry
            .cancel(&Selector::Endpoint(ctx.endpoint.clone()), true);
        state.timers.disarm_idle();

        info!(
            "Endpoint {} shares {} file(s); cancelled {} competing request(s)",
            ctx.endpoint, expected, losers
        );
        self.emit(RunEvent::ManifestAccepted {
            endpoint: ctx.endpoint.clone(),
            expected,
        });

        for index in 0..expected {
            self.fetch(
                &mut state,
                FetchContext::first(
                    ctx.run_id,
                    ctx.endpoint.clone(),
                    index,
                    ctx.directory.clone(),
                    expected,
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_record() {
        assert_eq!(parse_manifest(br#"{"total": 3}"#), Some(3));
        assert_eq!(parse_manifest(br#"{"total": 1, "name": "phone"}"#), Some(1));
    }

    #[test]
    fn test_parse_record_inside_text() {
        let body = b"callback({\"total\": 12, \"device\": \"x\"});\n";
        assert_eq!(parse_manifest(body), Some(12));
    }

    #[test]
    fn test_parse_numeric_string() {
        assert_eq!(parse_manifest(br#"{"total": " 5 "}"#), Some(5));
    }

    #[test]
    fn test_nothing_to_fetch() {
        assert_eq!(parse_manifest(br#"{"total": 0}"#), None);
        assert_eq!(parse_manifest(br#"{"total": -2}"#), None);
        assert_eq!(parse_manifest(br#"{"total": "many"}"#), None);
        assert_eq!(parse_manifest(br#"{"total": 2.5}"#), None);
        assert_eq!(parse_manifest(br#"{"count": 4}"#), None);
        assert_eq!(parse_manifest(b"<html>not found</html>"), None);
        assert_eq!(parse_manifest(b""), None);
        assert_eq!(parse_manifest(&[0xff, 0xfe, b'{']), None);
    }
}
