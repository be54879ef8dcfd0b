//! Scripted transport and helpers for engine tests

use crate::error::ShareError;
use crate::transport::{Transport, TransportResponse};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderValue, CONTENT_DISPOSITION};
use shareget_types::{Endpoint, RunEvent};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::broadcast;

/// Canned reply for one request
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Response {
        status: u16,
        disposition: Option<String>,
        body: Vec<u8>,
    },
    Fail(String),
    /// Never resolves; only an abort ends the request
    Pending,
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub(crate) fn manifest(total: u32) -> Self {
        Self::json(&format!(r#"{{"total": {}}}"#, total))
    }

    pub(crate) fn json(body: &str) -> Self {
        Reply::Response {
            status: 200,
            disposition: None,
            body: body.as_bytes().to_vec(),
        }
    }

    pub(crate) fn file(filename: &str, body: &[u8]) -> Self {
        Reply::Response {
            status: 200,
            disposition: Some(format!(r#"attachment; filename="{}""#, filename)),
            body: body.to_vec(),
        }
    }

    pub(crate) fn body_without_filename(body: &[u8]) -> Self {
        Reply::Response {
            status: 200,
            disposition: None,
            body: body.to_vec(),
        }
    }

    pub(crate) fn fail(reason: &str) -> Self {
        Reply::Fail(reason.to_string())
    }

    pub(crate) fn delayed(after: Duration, reply: Reply) -> Self {
        Reply::Delayed(after, Box::new(reply))
    }

    /// Resolve an immediate reply
    pub(crate) fn into_response(self) -> Result<TransportResponse, ShareError> {
        match self {
            Reply::Response {
                status,
                disposition,
                body,
            } => {
                let mut response = TransportResponse {
                    status,
                    body,
                    ..Default::default()
                };
                if let Some(value) = disposition {
                    let value = HeaderValue::from_bytes(value.as_bytes())
                        .map_err(|e| ShareError::Unknown(e.to_string()))?;
                    response.headers.insert(CONTENT_DISPOSITION, value);
                }
                Ok(response)
            }
            Reply::Fail(reason) => Err(ShareError::Transport(reason)),
            Reply::Pending | Reply::Delayed(..) => {
                Err(ShareError::Unknown("reply is not immediate".to_string()))
            }
        }
    }

    fn resolve(self) -> BoxFuture<'static, Result<TransportResponse, ShareError>> {
        async move {
            match self {
                Reply::Pending => std::future::pending().await,
                Reply::Delayed(after, reply) => {
                    tokio::time::sleep(after).await;
                    reply.resolve().await
                }
                immediate => immediate.into_response(),
            }
        }
        .boxed()
    }
}

/// Transport answering from per-URL scripts.
///
/// Replies for a URL are consumed in order; the last one repeats.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(&self, url: &str, reply: Reply) {
        self.scripts
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn count(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == url).count()
    }
}

impl Transport for MockTransport {
    fn get(&self, url: &str) -> BoxFuture<'static, Result<TransportResponse, ShareError>> {
        self.calls.lock().push(url.to_string());

        let reply = {
            let mut scripts = self.scripts.lock();
            match scripts.get_mut(url) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(reply) => reply.resolve(),
            None => {
                let url = url.to_string();
                async move { Err(ShareError::Transport(format!("no route for {}", url))) }.boxed()
            }
        }
    }
}

pub(crate) fn endpoint(raw: &str) -> Endpoint {
    Endpoint::parse(raw).expect("valid endpoint")
}

/// Receive events until the run ends, failing the test after five seconds
pub(crate) async fn collect_run(rx: &mut broadcast::Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => panic!("run did not finish; saw {:?}", events),
            received = rx.recv() => match received {
                Ok(event) => {
                    let done = event.is_terminal();
                    events.push(event);
                    if done {
                        return events;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return events,
            },
        }
    }
}
