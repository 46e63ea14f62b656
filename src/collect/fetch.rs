//! Upstream fetches with retry, backoff, and rate-limit handling.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use crate::config::SourceConfig;
use crate::errors::{PulseError, RetryPolicy};
use crate::models::CollectionRecord;

/// Seam to the outside world. Production uses [`HttpFetcher`]; tests
/// inject flaky or scripted fetchers.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<CollectionRecord>, PulseError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, PulseError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PulseError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<CollectionRecord>, PulseError> {
        let mut request = self.client.get(&source.url).query(&source.params);

        if let (Some(header), Some(env_var)) = (&source.auth_header, &source.auth_token_env) {
            let token = std::env::var(env_var).map_err(|_| {
                PulseError::Config(format!(
                    "source {} requires credential from ${}",
                    source.name, env_var
                ))
            })?;
            request = request.header(header.as_str(), format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PulseError::Timeout(format!("fetch from {} timed out", source.name))
            } else {
                PulseError::Network(format!("fetch from {} failed: {}", source.name, e))
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(PulseError::rate_limit(
                format!("{} rate limited", source.name),
                retry_after,
            ));
        }
        if !status.is_success() {
            return Err(PulseError::Http {
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await.map_err(|e| {
            PulseError::Validation(format!("{} returned non-JSON body: {}", source.name, e))
        })?;
        Ok(records_from_body(&source.name, body, source.max_records))
    }
}

/// Flatten a JSON response into collection records. Arrays of objects map
/// one to one; a single object becomes a single record; anything else is
/// an empty batch.
fn records_from_body(source: &str, body: Value, max_records: usize) -> Vec<CollectionRecord> {
    let now = Utc::now();
    let objects = match body {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(fields) => Some(fields),
                _ => None,
            })
            .collect(),
        Value::Object(fields) => vec![fields],
        _ => Vec::new(),
    };
    objects
        .into_iter()
        .take(max_records)
        .map(|fields| CollectionRecord {
            source: source.to_string(),
            fields,
            collected_at: now,
        })
        .collect()
}

/// Result of one resilient collection attempt cycle. Exhausted retries and
/// terminal statuses yield an empty batch here, never an error to a caller.
#[derive(Debug)]
pub struct FetchOutcome {
    pub records: Vec<CollectionRecord>,
    pub attempts: u32,
    pub error: Option<PulseError>,
}

impl FetchOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Fetch with up to `policy.max_retries` attempts. A 429 sleeps Retry-After
/// (or the configured default) and goes again; a network error sleeps the
/// base delay scaled by the attempt number; any other non-2xx status ends
/// the cycle immediately with an empty batch.
pub async fn fetch_with_retry(
    fetcher: &dyn SourceFetcher,
    source: &SourceConfig,
    policy: &RetryPolicy,
) -> FetchOutcome {
    let max_attempts = policy.max_retries.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match fetcher.fetch(source).await {
            Ok(records) => {
                return FetchOutcome {
                    records,
                    attempts,
                    error: None,
                }
            }
            Err(e) => match policy.delay_for(&e, attempts) {
                Some(delay) if attempts < max_attempts => {
                    warn!(
                        source = %source.name,
                        attempt = attempts,
                        max = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying fetch"
                    );
                    tokio::time::sleep(delay).await;
                }
                Some(_) => {
                    warn!(source = %source.name, attempts, error = %e, "Retry budget exhausted");
                    return FetchOutcome {
                        records: Vec::new(),
                        attempts,
                        error: Some(e),
                    };
                }
                None => {
                    warn!(source = %source.name, error = %e, "Terminal fetch failure");
                    return FetchOutcome {
                        records: Vec::new(),
                        attempts,
                        error: Some(e),
                    };
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct ScriptedFetcher {
        calls: Arc<AtomicU32>,
        succeed_on: Option<u32>,
        error: fn() -> PulseError,
    }

    #[async_trait]
    impl SourceFetcher for ScriptedFetcher {
        async fn fetch(
            &self,
            source: &SourceConfig,
        ) -> Result<Vec<CollectionRecord>, PulseError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.succeed_on == Some(call) {
                let body = serde_json::json!([{"neighborhood": "Mission", "price": 1}]);
                return Ok(records_from_body(&source.name, body, source.max_records));
            }
            Err((self.error)())
        }
    }

    fn source() -> SourceConfig {
        SourceConfig {
            name: "crime".into(),
            url: "https://example.test/crime.json".into(),
            params: Default::default(),
            auth_header: None,
            auth_token_env: None,
            max_records: 50,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay_secs: 0,
            rate_limit_delay_secs: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_uses_all_attempts_and_yields_empty_batch() {
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = ScriptedFetcher {
            calls: Arc::clone(&calls),
            succeed_on: None,
            error: || PulseError::Network("connection reset".into()),
        };
        let outcome = fetch_with_retry(&fetcher, &source(), &policy()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.records.is_empty());
        assert!(!outcome.success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = ScriptedFetcher {
            calls: Arc::clone(&calls),
            succeed_on: Some(3),
            error: || PulseError::rate_limit("throttled", Some(0)),
        };
        let outcome = fetch_with_retry(&fetcher, &source(), &policy()).await;
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.success());
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_terminal_after_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = ScriptedFetcher {
            calls: Arc::clone(&calls),
            succeed_on: None,
            error: || PulseError::Http { status: 500 },
        };
        let outcome = fetch_with_retry(&fetcher, &source(), &policy()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcome.records.is_empty());
    }

    #[test]
    fn test_records_from_body_caps_at_max_records() {
        let body = serde_json::json!([{"a": 1}, {"a": 2}, {"a": 3}]);
        let records = records_from_body("crime", body, 2);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source, "crime");
    }

    #[test]
    fn test_records_from_body_single_object() {
        let body = serde_json::json!({"a": 1});
        assert_eq!(records_from_body("crime", body, 10).len(), 1);
    }
}
