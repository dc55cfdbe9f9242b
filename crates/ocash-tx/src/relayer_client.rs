//! HTTP client for the OCash Relayer service.
//!
//! Endpoints:
//! - POST /api/v1/transfer
//! - POST /api/v1/burn
//! - GET /api/v1/txhash?txhash=<relayer_tx_hash>
//! - GET /api/v1/relayer_config (cached for 5 minutes)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use ocash_types::{Hex, OcashError, Result};

use crate::{BurnRequest, RelayerConfig, RelayerRequest, TransferRequest};

const CONFIG_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// A cooperative cancellation flag shared between a caller and a
/// long-running poll loop such as [`RelayerClient::wait_for_tx_hash`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Relayer API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerResponse<T> {
    pub code: Option<i32>,
    pub message: Option<String>,
    pub user_message: Option<String>,
    pub data: T,
}

fn is_ok_code(code: Option<i32>) -> bool {
    matches!(code, None | Some(0))
}

/// Relayer client for submitting transactions and reading fee config.
pub struct RelayerClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    config_cache: Mutex<Option<(Instant, RelayerConfig)>>,
}

impl RelayerClient {
    pub fn new(base_url: &str, timeout_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(30_000);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(timeout_ms),
            config_cache: Mutex::new(None),
        }
    }

    /// Submit a transfer or burn request to the relayer, returning the
    /// relayer's own transaction hash (not yet the underlying EVM hash).
    pub async fn submit(&self, request: &RelayerRequest) -> Result<Hex> {
        let (endpoint, body) = match request {
            RelayerRequest::Transfer(req) => ("/api/v1/transfer", serde_json::to_value(req)),
            RelayerRequest::Burn(req) => ("/api/v1/burn", serde_json::to_value(req)),
        };
        let body = body.map_err(|e| OcashError::Other(format!("failed to serialize relayer request: {e}")))?;

        let url = format!("{}{}", self.base_url, endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| OcashError::Other(format!("relayer request to {url} failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(OcashError::Other(format!("relayer returned status {status} from {url}: {text}")));
        }

        let parsed: RelayerResponse<Hex> = resp
            .json()
            .await
            .map_err(|e| OcashError::Other(format!("failed to parse relayer response from {url}: {e}")))?;

        if !is_ok_code(parsed.code) {
            return Err(OcashError::Other(format!(
                "relayer rejected submission (code {:?}): {}",
                parsed.code,
                parsed.message.unwrap_or_default()
            )));
        }

        tracing::info!(endpoint, relayer_tx_hash = %parsed.data, "submitted to relayer");
        Ok(parsed.data)
    }

    /// Fetch the underlying EVM transaction hash for a relayer tx hash, if
    /// the relayer has seen it land yet.
    pub async fn get_tx_hash(&self, relayer_tx_hash: &str) -> Result<Option<Hex>> {
        let url = format!("{}/api/v1/txhash?txhash={}", self.base_url, relayer_tx_hash);

        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| OcashError::Other(format!("relayer request to {url} failed: {e}")))?;

        if !resp.status().is_success() {
            return Ok(None);
        }

        let body: RelayerResponse<Option<Hex>> = resp
            .json()
            .await
            .map_err(|e| OcashError::Other(format!("failed to parse relayer response from {url}: {e}")))?;

        Ok(body.data)
    }

    /// Poll for the EVM transaction hash until it appears or `timeout_ms`
    /// elapses, checking `cancel` between polls so the caller can abort.
    pub async fn wait_for_tx_hash(
        &self,
        relayer_tx_hash: &str,
        interval_ms: u64,
        timeout_ms: u64,
        cancel: &CancelToken,
    ) -> Result<Hex> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if cancel.is_cancelled() {
                return Err(OcashError::Other("wait_for_tx_hash cancelled".into()));
            }
            if let Some(tx_hash) = self.get_tx_hash(relayer_tx_hash).await? {
                return Ok(tx_hash);
            }
            if Instant::now() >= deadline {
                tracing::warn!(relayer_tx_hash, timeout_ms, "timed out waiting for evm tx hash");
                return Err(OcashError::Other(format!(
                    "timed out waiting for relayer tx {relayer_tx_hash} after {timeout_ms}ms"
                )));
            }
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
    }

    /// Fetch the relayer's fee configuration, serving a cached copy while
    /// it is under 5 minutes old.
    pub async fn relayer_config(&self) -> Result<RelayerConfig> {
        {
            let cache = self.config_cache.lock().await;
            if let Some((fetched_at, config)) = cache.as_ref() {
                if fetched_at.elapsed() < CONFIG_CACHE_TTL {
                    return Ok(config.clone());
                }
            }
        }

        let url = format!("{}/api/v1/relayer_config", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| OcashError::Other(format!("relayer request to {url} failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(OcashError::Other(format!("relayer returned status {} from {url}", resp.status())));
        }

        let config: RelayerConfig = resp
            .json()
            .await
            .map_err(|e| OcashError::Other(format!("failed to parse relayer config from {url}: {e}")))?;

        let mut cache = self.config_cache.lock().await;
        *cache = Some((Instant::now(), config.clone()));
        Ok(config)
    }
}

/// Build a transfer submission request.
pub fn build_transfer_request(
    proof: serde_json::Value,
    input: serde_json::Value,
    extra_data: [Hex; 3],
    merkle_root_index: u64,
    array_hash_index: u64,
    relayer: Hex,
    flatten_input: serde_json::Value,
) -> RelayerRequest {
    RelayerRequest::Transfer(TransferRequest {
        proof,
        input,
        extra_data,
        merkle_root_index,
        array_hash_index,
        relayer,
        flatten_input,
    })
}

/// Build a withdraw (burn) submission request.
#[allow(clippy::too_many_arguments)]
pub fn build_burn_request(
    proof: serde_json::Value,
    input: serde_json::Value,
    extra_data: Hex,
    recipient_address: Hex,
    relayer_fee: String,
    gas_drop_value: String,
    burn_amount: String,
    merkle_root_index: u64,
    array_hash_index: u64,
    relayer: Hex,
    flatten_input: serde_json::Value,
) -> RelayerRequest {
    RelayerRequest::Burn(BurnRequest {
        proof,
        input,
        extra_data,
        recipient_address,
        relayer_fee,
        gas_drop_value,
        burn_amount,
        merkle_root_index,
        array_hash_index,
        relayer,
        flatten_input,
    })
}
