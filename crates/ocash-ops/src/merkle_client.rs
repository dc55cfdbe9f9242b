//! HTTP client for the OCash merkle-proof service.
//!
//! Endpoint: `GET /api/v1/merkle?cid=A&cid=B&…` →
//! `{proof: [{path: [string], leaf_index}], merkle_root: string, latest_cid: u64}`.
//! Path entries are big-integer-string-encoded field elements.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use ocash_types::{OcashError, Result};

/// A single leaf's proof as reported by the merkle-proof service, still in
/// wire form (decimal-string field elements).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMerkleProof {
    pub path: Vec<String>,
    pub leaf_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMerkleProofResponse {
    pub proof: Vec<RemoteMerkleProof>,
    pub merkle_root: String,
    pub latest_cid: u64,
}

/// Remote merkle-proof service client.
pub struct MerkleProofClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl MerkleProofClient {
    pub fn new(base_url: &str, timeout_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(20_000);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Fetch merkle proofs for a set of leaf cids.
    pub async fn fetch_proofs(&self, cids: &[u64]) -> Result<RemoteMerkleProofResponse> {
        let query: String = cids.iter().map(|c| format!("cid={c}")).collect::<Vec<_>>().join("&");
        let url = format!("{}/api/v1/merkle?{}", self.base_url, query);

        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| OcashError::Other(format!("merkle proof request to {url} failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(OcashError::Other(format!(
                "merkle proof service returned status {} from {url}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| OcashError::Other(format!("failed to parse merkle proof response from {url}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_proofs_parses_the_service_envelope() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", mockito::Matcher::Regex(r"^/api/v1/merkle\?.*".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"proof":[{"path":["1","2","3"],"leaf_index":0}],"merkle_root":"42","latest_cid":5}"#,
            )
            .create_async()
            .await;

        let client = MerkleProofClient::new(&server.url(), None);
        let result = client.fetch_proofs(&[0]).await.unwrap();
        assert_eq!(result.latest_cid, 5);
        assert_eq!(result.proof[0].leaf_index, 0);
    }

    #[tokio::test]
    async fn fetch_proofs_surfaces_non_success_status_as_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", mockito::Matcher::Regex(r"^/api/v1/merkle\?.*".into()))
            .with_status(500)
            .create_async()
            .await;

        let client = MerkleProofClient::new(&server.url(), None);
        assert!(client.fetch_proofs(&[0]).await.is_err());
    }
}
