use log::debug;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

use crate::api::models::ApiResponse;
use crate::blockchain::{Block, MiningInfo};

#[derive(Error, Debug)]
pub enum MinerError {
    #[error("pool request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("pool rejected the request: {0}")]
    Rejected(String),
    #[error("unexpected pool response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("pool unreachable after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("mining task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// HTTP client for the pool API. Network failures are retried with a fixed
/// delay; answers from the pool, including rejections, are not.
#[derive(Clone)]
pub struct PoolClient {
    http: Client,
    base_url: String,
    retry_delay: Duration,
    max_retries: u32,
}

impl PoolClient {
    pub fn new(base_url: &str, retry_delay: Duration, max_retries: u32) -> Self {
        Self {
            http: Client::new(),
            base_url: format!("{}/api/v1", base_url.trim_end_matches('/')),
            retry_delay,
            max_retries: max_retries.max(1),
        }
    }

    pub async fn mining_info(&self) -> Result<MiningInfo, MinerError> {
        let url = format!("{}/mining/info/", self.base_url);
        self.call(|| self.http.get(&url)).await
    }

    /// Returns the block as the pool stored it, with its state root.
    pub async fn submit_block(&self, block: &Block) -> Result<Block, MinerError> {
        let url = format!("{}/blocks/", self.base_url);
        self.call(|| self.http.post(&url).json(block)).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: impl Fn() -> RequestBuilder,
    ) -> Result<T, MinerError> {
        let mut last = String::new();
        for attempt in 1..=self.max_retries {
            match send(request()).await {
                Err(MinerError::Http(e)) => {
                    debug!("pool attempt {attempt}/{} failed: {e}", self.max_retries);
                    last = e.to_string();
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
                other => return other,
            }
        }
        Err(MinerError::RetriesExhausted {
            attempts: self.max_retries,
            last,
        })
    }
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, MinerError> {
    let envelope: ApiResponse<serde_json::Value> = request.send().await?.json().await?;
    if envelope.status == 1 {
        return Ok(serde_json::from_value(envelope.result)?);
    }
    Err(MinerError::Rejected(match envelope.result {
        serde_json::Value::String(message) => message,
        other => other.to_string(),
    }))
}
