use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use ureq::Agent;

use crate::config::{CollectConfig, RetryPolicy};
use crate::constants::client::{ENTRIES_QUERY_PATH, REQUEST_TIMEOUT_SECS, RETRYABLE_STATUS};
use crate::errors::CollectError;
use crate::source::{CallCounter, EntryPage, EntrySource, QueryRequest, Sleeper, ThreadSleeper};

/// Paginating client for `POST {base_url}/entries/query`.
///
/// Transient failures (429, 5xx, transport errors) are retried with
/// exponential backoff; every call after the first waits `polite_delay`
/// regardless of how the previous call ended.
pub struct NomadClient {
    agent: Agent,
    endpoint: String,
    author_quantity: String,
    retry: RetryPolicy,
    polite_delay: Duration,
    sleeper: Box<dyn Sleeper>,
    called_before: AtomicBool,
}

enum Attempt {
    Done(Value),
    Retry(String),
    Fatal(CollectError),
}

impl NomadClient {
    /// Client configured from the collection settings.
    pub fn new(config: &CollectConfig) -> Self {
        let agent_config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
            .build();
        Self {
            agent: Agent::new_with_config(agent_config),
            endpoint: entries_endpoint(&config.base_url),
            author_quantity: config.author_quantity.clone(),
            retry: config.retry,
            polite_delay: config.polite_delay,
            sleeper: Box::new(ThreadSleeper),
            called_before: AtomicBool::new(false),
        }
    }

    /// Replace the sleeper used for polite delays and backoff.
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// Full URL of the entries query endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            self.sleeper.sleep(duration);
        }
    }

    fn attempt(&self, request: &QueryRequest, calls: &CallCounter) -> Attempt {
        if self.called_before.swap(true, Ordering::Relaxed) {
            self.pause(self.polite_delay);
        }
        let total = calls.record();
        debug!(
            "[nomad:query] POST {} value='{}' cursor={:?} call={}",
            self.endpoint,
            request.value(),
            request.cursor(),
            total
        );
        let code = request.value().to_string();
        let response = match self.agent.post(&self.endpoint).send_json(request.body()) {
            Ok(response) => response,
            Err(err) if is_transient(&err) => return Attempt::Retry(err.to_string()),
            Err(err) => {
                return Attempt::Fatal(CollectError::Transport {
                    code,
                    reason: err.to_string(),
                });
            }
        };
        let status = response.status().as_u16();
        let body = match response.into_body().read_to_string() {
            Ok(body) => body,
            Err(err) if is_transient(&err) => return Attempt::Retry(err.to_string()),
            Err(err) => {
                return Attempt::Fatal(CollectError::Transport {
                    code,
                    reason: format!("failed reading response body: {err}"),
                });
            }
        };
        if is_retryable_status(status) {
            return Attempt::Retry(format!("status {status}"));
        }
        if !(200..300).contains(&status) {
            return Attempt::Fatal(CollectError::Api { code, status, body });
        }
        match serde_json::from_str(&body) {
            Ok(json) => Attempt::Done(json),
            Err(err) => Attempt::Fatal(CollectError::MalformedResponse {
                code,
                reason: format!("failed parsing response: {err}"),
            }),
        }
    }
}

impl EntrySource for NomadClient {
    fn fetch_page(
        &self,
        request: &QueryRequest,
        calls: &CallCounter,
    ) -> Result<EntryPage, CollectError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        let response = loop {
            match self.attempt(request, calls) {
                Attempt::Done(response) => break response,
                Attempt::Fatal(err) => return Err(err),
                Attempt::Retry(reason) if attempt >= max_attempts => {
                    return Err(CollectError::RetriesExhausted {
                        code: request.value().to_string(),
                        attempts: attempt,
                        last_error: reason,
                    });
                }
                Attempt::Retry(reason) => {
                    let backoff = self.retry.backoff_after(attempt);
                    warn!(
                        "[nomad:query] transient failure for '{}' on attempt {}/{} ({}); sleeping {:.1}s",
                        request.value(),
                        attempt,
                        max_attempts,
                        reason,
                        backoff.as_secs_f64()
                    );
                    self.pause(backoff);
                    attempt += 1;
                }
            }
        };
        EntryPage::from_response(request, &response, &self.author_quantity).map_err(|reason| {
            CollectError::MalformedResponse {
                code: request.value().to_string(),
                reason,
            }
        })
    }
}

fn entries_endpoint(base_url: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), ENTRIES_QUERY_PATH)
}

fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS.contains(&status) || (500..600).contains(&status)
}

fn is_transient(err: &ureq::Error) -> bool {
    matches!(
        err,
        ureq::Error::Io(_)
            | ureq::Error::Timeout(_)
            | ureq::Error::ConnectionFailed
            | ureq::Error::HostNotFound
    )
}
