//! # JSON-RPC Provider
//!
//! A [`NetworkProvider`] backed by a bitcoind-style JSON-RPC endpoint:
//!
//! | Call                     | Used for                          |
//! |--------------------------|-----------------------------------|
//! | `getblockcount`          | remote best height                |
//! | `getblockhash <height>`  | hash on the remote's best chain   |
//! | `getblock <hash> 2`      | block with decoded transactions   |
//!
//! Requests go through a shared [`reqwest::Client`]. Credentials embedded in
//! the URL are lifted into HTTP basic auth unless explicit ones are given.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use chainwatch_core::{NetworkProvider, ProviderError, RemoteBlock, RemoteTransaction};

/// bitcoind's `RPC_INVALID_PARAMETER`; `getblockhash` answers with it when
/// the height is beyond the tip.
const RPC_INVALID_PARAMETER: i64 = -8;

/// Upper bound on a single response body. A verbosity-2 `getblock` of a
/// full block stays well below this.
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl<T> RpcResponse<T> {
    fn into_result(self, method: &str) -> Result<T, ProviderError> {
        if let Some(err) = self.error {
            return Err(ProviderError::InvalidResponse(format!(
                "{method} failed with code {}: {}",
                err.code, err.message
            )));
        }
        self.result
            .ok_or_else(|| ProviderError::InvalidResponse(format!("{method} returned no result")))
    }
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    hash: String,
    height: u64,
    /// Absent on genesis.
    #[serde(default)]
    previousblockhash: Option<String>,
    tx: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
struct RpcTransaction {
    txid: String,
    #[serde(default)]
    hex: Option<String>,
}

impl RpcBlock {
    fn into_remote(self) -> Result<RemoteBlock, ProviderError> {
        let transactions = self
            .tx
            .into_iter()
            .map(|tx| {
                let raw = match tx.hex {
                    Some(hex) => hex::decode(&hex).map_err(|e| {
                        ProviderError::InvalidResponse(format!("bad hex in tx {}: {e}", tx.txid))
                    })?,
                    None => Vec::new(),
                };
                Ok(RemoteTransaction::new(tx.txid, raw))
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;

        Ok(RemoteBlock {
            height: self.height,
            hash: self.hash,
            parent_hash: self.previousblockhash,
            transactions,
        })
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

pub struct JsonRpcProvider {
    client: Client,
    url: Url,
    auth: Option<BasicAuth>,
    next_id: AtomicU64,
}

fn transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(err.to_string())
    }
}

impl JsonRpcProvider {
    pub fn new(url: &str, auth: Option<BasicAuth>, timeout: Duration) -> Result<Self, ProviderError> {
        let mut url = Url::parse(url)
            .map_err(|e| ProviderError::Transport(format!("invalid rpc url {url}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProviderError::Transport(format!(
                "unsupported rpc url scheme {}",
                url.scheme()
            )));
        }

        let embedded = (!url.username().is_empty()).then(|| {
            BasicAuth::new(url.username(), url.password().unwrap_or_default())
        });
        // Keep credentials out of the request target and the logs.
        let _ = url.set_username("");
        let _ = url.set_password(None);

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            url,
            auth: auth.or(embedded),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<RpcResponse<T>, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut builder = self.client.post(self.url.clone()).json(&body);
        if let Some(auth) = &self.auth {
            builder = builder.basic_auth(&auth.username, Some(&auth.password));
        }
        let mut response = builder.send().await.map_err(transport)?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProviderError::Transport(format!(
                "rpc authentication rejected (HTTP {status})"
            )));
        }
        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_BYTES as u64 {
                return Err(ProviderError::InvalidResponse(format!(
                    "{method}: response of {len} bytes exceeds {MAX_RESPONSE_BYTES}"
                )));
            }
        }

        let mut payload = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            if payload.len() + chunk.len() > MAX_RESPONSE_BYTES {
                return Err(ProviderError::InvalidResponse(format!(
                    "{method}: response exceeds {MAX_RESPONSE_BYTES} bytes"
                )));
            }
            payload.extend_from_slice(&chunk);
        }
        debug!(method, id, status = status.as_u16(), bytes = payload.len(), "rpc call completed");

        // bitcoind reports RPC errors with a non-200 status and a JSON body,
        // so the body is parsed regardless of status.
        serde_json::from_slice(&payload).map_err(|e| {
            ProviderError::InvalidResponse(format!("{method}: HTTP {status}, undecodable body: {e}"))
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ProviderError> {
        self.request(method, params).await?.into_result(method)
    }
}

#[async_trait]
impl NetworkProvider for JsonRpcProvider {
    async fn get_block_at_height(&self, height: u64) -> Result<RemoteBlock, ProviderError> {
        let response = self
            .request::<String>("getblockhash", json!([height]))
            .await?;
        if matches!(&response.error, Some(e) if e.code == RPC_INVALID_PARAMETER) {
            return Err(ProviderError::BlockNotFound(height));
        }
        let hash = response.into_result("getblockhash")?;

        let block: RpcBlock = self.call("getblock", json!([hash, 2])).await?;
        if block.height != height {
            return Err(ProviderError::InvalidResponse(format!(
                "asked for height {height}, got block {} at height {}",
                block.hash, block.height
            )));
        }
        block.into_remote()
    }

    async fn best_height(&self) -> Result<u64, ProviderError> {
        self.call("getblockcount", json!([])).await
    }
}
