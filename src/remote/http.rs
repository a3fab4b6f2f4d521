//! Blocking HTTP accessor for the hosted ledger.
//!
//! Wire format:
//! - `GET  <length endpoint>`         → `{"length": n}`
//! - `GET  <block endpoint>?index=i`  → block JSON
//! - `POST <block endpoint>`          ← block JSON
//!
//! Every request carries `Authorization: Bearer <token>` when a token is
//! configured.

use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use crate::core::config::RemoteConfig;
use crate::core::errors::{FslError, Result};
use crate::ledger::Block;
use crate::remote::{BlockUploader, RemoteChainReader};

/// Contents of `credentials.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    #[serde(default)]
    pub token: String,
}

impl Credentials {
    /// Load credentials; a missing file yields an empty token.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| FslError::io(path, source))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Deserialize)]
struct LengthResponse {
    length: u64,
}

/// Remote ledger reached over HTTP(S).
#[derive(Debug)]
pub struct HttpLedger {
    client: Client,
    length_endpoint: String,
    block_endpoint: String,
    token: Option<String>,
}

impl HttpLedger {
    pub fn new(config: &RemoteConfig, credentials: &Credentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .connect_timeout(Duration::from_millis(config.request_timeout_ms.min(5_000)))
            .build()
            .map_err(|err| FslError::Remote {
                endpoint: config.chain_length_endpoint.clone(),
                details: format!("failed to build HTTP client: {err}"),
            })?;

        let token = Some(credentials.token.trim().to_string()).filter(|t| !t.is_empty());

        Ok(Self {
            client,
            length_endpoint: config.chain_length_endpoint.clone(),
            block_endpoint: config.chain_block_endpoint.clone(),
            token,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<Response> {
        self.authorize(request).send().map_err(|err| FslError::Remote {
            endpoint: endpoint.to_string(),
            details: if err.is_connect() {
                format!("cannot connect: {err}")
            } else {
                err.to_string()
            },
        })
    }
}

fn expect_ok(endpoint: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(FslError::Remote {
        endpoint: endpoint.to_string(),
        details: format!("unexpected status {status}: {}", body.trim()),
    })
}

impl RemoteChainReader for HttpLedger {
    fn length(&self) -> Result<u64> {
        let endpoint = &self.length_endpoint;
        let response = self.send(endpoint, self.client.get(endpoint))?;
        let parsed: LengthResponse =
            expect_ok(endpoint, response)?
                .json()
                .map_err(|err| FslError::Remote {
                    endpoint: endpoint.clone(),
                    details: format!("malformed length response: {err}"),
                })?;
        Ok(parsed.length)
    }

    fn block(&self, index: u64) -> Result<Block> {
        let endpoint = &self.block_endpoint;
        let request = self.client.get(endpoint).query(&[("index", index)]);
        let response = self.send(endpoint, request)?;
        expect_ok(endpoint, response)?
            .json()
            .map_err(|err| FslError::Remote {
                endpoint: endpoint.clone(),
                details: format!("malformed block {index}: {err}"),
            })
    }
}

impl BlockUploader for HttpLedger {
    fn upload_block(&self, block: &Block) -> Result<()> {
        let endpoint = &self.block_endpoint;
        let response = self.send(endpoint, self.client.post(endpoint).json(block))?;
        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            return Ok(());
        }
        let body = response.text().unwrap_or_default();
        if status.is_client_error() {
            return Err(FslError::RemoteRejected {
                index: block.index,
                details: format!("{status}: {}", body.trim()),
            });
        }
        Err(FslError::Remote {
            endpoint: endpoint.clone(),
            details: format!("upload of block {} failed with {status}", block.index),
        })
    }
}
