pub mod types;


use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::config::settings::NodeSettings;
use crate::error::NodeApiError;
use crate::metrics;
pub use types::{
    Block, Blockchain, MiningJob, MiningJobId, MiningStatus, Transaction, TransactionDraft,
};
use types::{ErrorDetails, MineResponse, MiningStatusResponse};

/// Body the node answers a mine request with while another job holds the
/// mining lock.
const MINING_BUSY_MARKER: &str = "mining already started";

/// The operations the explorer performs against a node. Holds no state
/// between calls.
#[async_trait]
pub trait RemoteDataClient: Send + Sync {
    async fn fetch_blockchain(&self) -> Result<Blockchain, NodeApiError>;

    async fn fetch_transaction_pool(&self) -> Result<Vec<Transaction>, NodeApiError>;

    async fn submit_transaction(
        &self,
        draft: &TransactionDraft,
    ) -> Result<Transaction, NodeApiError>;

    async fn start_mining_job(&self) -> Result<MiningJobId, NodeApiError>;

    /// An unknown id is reported as a `failed` job, not as an error.
    async fn get_mining_job_status(&self, id: &MiningJobId) -> Result<MiningJob, NodeApiError>;
}

#[derive(Debug, Clone)]
pub struct NodeClient {
    client: Client,
    base_url: Url,
}

impl NodeClient {
    pub fn new(settings: &NodeSettings) -> Result<Self, NodeApiError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: parse_base_url(&settings.base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, NodeApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| NodeApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, NodeApiError> {
        let started = Instant::now();
        let result = request.send().await;
        metrics::record_node_request(operation, started.elapsed(), result.is_ok());
        result.map_err(|e| {
            warn!("{} request failed: {}", operation, e);
            NodeApiError::from(e)
        })
    }

    async fn decode<T: DeserializeOwned>(
        operation: &'static str,
        response: Response,
    ) -> Result<T, NodeApiError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            warn!("{} returned an unreadable body: {}", operation, e);
            NodeApiError::Decode(e.to_string())
        })
    }
}

#[async_trait]
impl RemoteDataClient for NodeClient {
    async fn fetch_blockchain(&self) -> Result<Blockchain, NodeApiError> {
        let url = self.endpoint(&["blockchain"])?;
        let response = self.send("fetch_blockchain", self.client.get(url)).await?;
        let response = ensure_success("fetch_blockchain", response).await?;
        let chain: Blockchain = Self::decode("fetch_blockchain", response).await?;
        debug!("Fetched blockchain with {} blocks", chain.height());
        Ok(chain)
    }

    async fn fetch_transaction_pool(&self) -> Result<Vec<Transaction>, NodeApiError> {
        let url = self.endpoint(&["transactions"])?;
        let response = self.send("fetch_transaction_pool", self.client.get(url)).await?;
        let response = ensure_success("fetch_transaction_pool", response).await?;
        let pool: Vec<Transaction> = Self::decode("fetch_transaction_pool", response).await?;
        debug!("Fetched {} pending transactions", pool.len());
        Ok(pool)
    }

    async fn submit_transaction(
        &self,
        draft: &TransactionDraft,
    ) -> Result<Transaction, NodeApiError> {
        draft.validate()?;

        let url = self.endpoint(&["transactions"])?;
        let response = self
            .send("submit_transaction", self.client.post(url).json(draft))
            .await?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ErrorDetails>(&body) {
                Ok(error) => NodeApiError::Validation {
                    details: error.details,
                },
                Err(_) => network_error(status, body),
            });
        }

        let response = ensure_success("submit_transaction", response).await?;
        Self::decode("submit_transaction", response).await
    }

    async fn start_mining_job(&self) -> Result<MiningJobId, NodeApiError> {
        let url = self.endpoint(&["blockchain", "mine"])?;
        let response = self.send("start_mining_job", self.client.post(url)).await?;
        let response = ensure_success("start_mining_job", response).await?;

        let body = response.text().await?;
        match serde_json::from_str::<MineResponse>(&body) {
            Ok(mine) => {
                debug!("Node accepted mining job {}", mine.id);
                Ok(mine.id)
            }
            Err(_) if body.to_lowercase().contains(MINING_BUSY_MARKER) => {
                Err(NodeApiError::MiningAlreadyInProgress)
            }
            Err(e) => Err(NodeApiError::Decode(e.to_string())),
        }
    }

    async fn get_mining_job_status(&self, id: &MiningJobId) -> Result<MiningJob, NodeApiError> {
        let url = self.endpoint(&["blockchain", "mine", id.as_str(), "status"])?;
        let response = self.send("get_mining_job_status", self.client.get(url)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            warn!("Node does not know mining job {}", id);
            return Ok(MiningJob::not_found(id.clone()));
        }

        let response = ensure_success("get_mining_job_status", response).await?;
        let status: MiningStatusResponse = Self::decode("get_mining_job_status", response).await?;
        Ok(MiningJob {
            id: id.clone(),
            status: status.status,
            details: status.details,
        })
    }
}

/// Parses the configured node address, forcing a trailing slash so endpoint
/// paths append to it instead of replacing its last segment.
pub fn parse_base_url(raw: &str) -> Result<Url, NodeApiError> {
    let mut url = Url::parse(raw)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(NodeApiError::InvalidUrl(format!(
            "unsupported scheme '{}' in {}",
            url.scheme(),
            raw
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

async fn ensure_success(
    operation: &'static str,
    response: Response,
) -> Result<Response, NodeApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!("{} failed with status {}", operation, status);
    Err(network_error(status, body))
}

fn network_error(status: StatusCode, body: String) -> NodeApiError {
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_string()
    } else {
        body.trim().to_string()
    };
    NodeApiError::Network {
        status: Some(status.as_u16()),
        message,
    }
}
