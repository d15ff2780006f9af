use crate::coordinator::Coordinator;
use crate::coordinator::protocol::{ENDPOINT_SUBMIT_GRAPH, SubmitGraphRequest, SubmitGraphResponse};
use crate::error::SubmissionError;
use crate::protocol::GraphDescriptor;

use async_trait::async_trait;
use std::time::Duration;

/// Delivers a graph descriptor to the coordinator and returns the epoch of
/// its first assignment.
#[async_trait]
pub trait GraphSubmitter: Send + Sync {
    async fn submit(&self, graph: GraphDescriptor) -> Result<u64, SubmissionError>;
}

/// In-process submission, used by local clusters.
#[async_trait]
impl GraphSubmitter for Coordinator {
    async fn submit(&self, graph: GraphDescriptor) -> Result<u64, SubmissionError> {
        self.submit_graph(graph).await
    }
}

/// Submission over the coordinator's HTTP API.
pub struct HttpSubmitter {
    base_url: String,
    http_client: reqwest::Client,
    timeout: Duration,
    attempts: usize,
}

impl HttpSubmitter {
    pub fn new(base_url: &str, timeout: Duration, attempts: usize) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
            timeout,
            attempts: attempts.max(1),
        }
    }

    // --- HTTP Helpers with Backoff ---

    async fn post_with_retry<T: serde::Serialize>(
        &self,
        url: String,
        payload: &T,
    ) -> anyhow::Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    tracing::debug!("Submit attempt {} failed: {}", attempt + 1, e);
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }
}

#[async_trait]
impl GraphSubmitter for HttpSubmitter {
    async fn submit(&self, graph: GraphDescriptor) -> Result<u64, SubmissionError> {
        let name = graph.name.clone();
        let url = format!("{}{}", self.base_url, ENDPOINT_SUBMIT_GRAPH);

        let response = self
            .post_with_retry(url, &SubmitGraphRequest { graph })
            .await
            .map_err(|e| SubmissionError::Unreachable(format!("{:#}", e)))?;

        let status = response.status();
        let body: SubmitGraphResponse = response.json().await.map_err(|e| {
            SubmissionError::Unreachable(format!("unreadable response ({}): {}", status, e))
        })?;

        match (body.accepted, body.epoch, body.error) {
            (true, Some(epoch), _) => {
                tracing::info!("Graph '{}' accepted at epoch {}", name, epoch);
                Ok(epoch)
            }
            (_, _, Some(error)) => Err(error),
            _ => Err(SubmissionError::Unreachable(format!(
                "coordinator rejected graph '{}' without a reason ({})",
                name, status
            ))),
        }
    }
}
