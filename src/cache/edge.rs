//! Edge-cache invalidation notifier.
//!
//! Optional collaborator: when a purge endpoint is configured, successful
//! tag or build invalidations are propagated to it with an HTTP DELETE.
//! Every call is bounded by the client timeout and reports an outcome
//! instead of an error; the `spawn_*` helpers run a purge on a detached
//! task so the triggering cache operation never waits on it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

const SOURCE: &str = "strato::edge";

#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("purge endpoint is not a usable base URL: {url}")]
    UnusableEndpoint { url: String },
    #[error("failed to build purge HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Result of a single purge call. Failures are carried here, never raised.
#[derive(Debug, Clone)]
pub struct PurgeOutcome {
    pub ok: bool,
    pub status: Option<u16>,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct EdgeNotifier {
    client: reqwest::Client,
    endpoint: Url,
}

impl EdgeNotifier {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, EdgeError> {
        if endpoint.cannot_be_a_base() {
            return Err(EdgeError::UnusableEndpoint {
                url: endpoint.to_string(),
            });
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    /// Ask the edge cache to drop everything.
    pub async fn purge_all(&self) -> PurgeOutcome {
        self.execute("all", self.endpoint.clone(), None).await
    }

    /// Ask the edge cache to drop the given cache keys.
    pub async fn purge_keys(&self, keys: &[String]) -> PurgeOutcome {
        self.execute(
            "keys",
            self.suffixed("keys"),
            Some(json!({ "keys": keys })),
        )
        .await
    }

    /// Ask the edge cache to drop the given request paths.
    pub async fn purge_paths(&self, paths: &[String]) -> PurgeOutcome {
        self.execute(
            "paths",
            self.suffixed("paths"),
            Some(json!({ "paths": paths })),
        )
        .await
    }

    /// Fire-and-forget variant of [`purge_all`](Self::purge_all).
    pub fn spawn_purge_all(self: &Arc<Self>) {
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            notifier.purge_all().await;
        });
    }

    /// Fire-and-forget variant of [`purge_keys`](Self::purge_keys).
    pub fn spawn_purge_keys(self: &Arc<Self>, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            notifier.purge_keys(&keys).await;
        });
    }

    fn suffixed(&self, segment: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(segment);
        }
        url
    }

    async fn execute(
        &self,
        scope: &'static str,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> PurgeOutcome {
        let started = Instant::now();
        let mut request = self.client.delete(url.clone());
        if let Some(body) = body {
            request = request.json(&body);
        }

        let outcome = match request.send().await {
            Ok(response) => PurgeOutcome {
                ok: response.status().is_success(),
                status: Some(response.status().as_u16()),
                elapsed: started.elapsed(),
            },
            Err(err) => {
                warn!(
                    target = SOURCE,
                    scope,
                    url = %url,
                    error = %err,
                    "edge purge request failed"
                );
                PurgeOutcome {
                    ok: false,
                    status: None,
                    elapsed: started.elapsed(),
                }
            }
        };

        histogram!("strato_edge_purge_ms").record(outcome.elapsed.as_millis() as f64);
        if outcome.ok {
            debug!(
                target = SOURCE,
                scope,
                status = outcome.status.unwrap_or_default(),
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "edge purge completed"
            );
        } else {
            counter!("strato_edge_purge_failure_total").increment(1);
            if let Some(status) = outcome.status {
                warn!(
                    target = SOURCE,
                    scope,
                    status,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "edge purge rejected"
                );
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier(endpoint: &str) -> EdgeNotifier {
        EdgeNotifier::new(Url::parse(endpoint).unwrap(), Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn suffixed_appends_one_segment() {
        let plain = notifier("https://edge.internal/purge");
        assert_eq!(plain.suffixed("keys").as_str(), "https://edge.internal/purge/keys");

        let trailing = notifier("https://edge.internal/purge/");
        assert_eq!(
            trailing.suffixed("paths").as_str(),
            "https://edge.internal/purge/paths"
        );
    }

    #[tokio::test]
    async fn purge_requests_carry_their_list_bodies() {
        use axum::{Json, Router, extract::State, http::StatusCode, routing::delete};
        use std::sync::Mutex;

        type Seen = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

        async fn capture(
            State(seen): State<Seen>,
            uri: axum::http::Uri,
            Json(body): Json<serde_json::Value>,
        ) -> StatusCode {
            seen.lock().unwrap().push((uri.path().to_string(), body));
            StatusCode::OK
        }

        let seen: Seen = Arc::default();
        let app = Router::new()
            .route("/purge/keys", delete(capture))
            .route("/purge/paths", delete(capture))
            .with_state(Arc::clone(&seen));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let edge = notifier(&format!("http://{addr}/purge"));
        assert!(edge.purge_keys(&["post-1".to_string()]).await.ok);
        assert!(edge.purge_paths(&["/blog".to_string()]).await.ok);

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0],
            ("/purge/keys".to_string(), json!({ "keys": ["post-1"] }))
        );
        assert_eq!(
            seen[1],
            ("/purge/paths".to_string(), json!({ "paths": ["/blog"] }))
        );
    }

    #[test]
    fn non_base_urls_are_rejected() {
        let err = EdgeNotifier::new(
            Url::parse("mailto:ops@example.com").unwrap(),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, EdgeError::UnusableEndpoint { .. }));
    }
}
