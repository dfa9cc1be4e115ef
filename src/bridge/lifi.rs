//! LI.FI bridge aggregator client.
//!
//! API: `https://li.quest/v1`
//! - `POST /advanced/routes` — candidate routes for a transfer
//! - `POST /advanced/stepTransaction` — calldata for one route step
//! - `GET /status?txHash&fromChain&toChain&bridge` — transfer status
//!
//! Auth: optional `x-lifi-api-key` header (higher rate limits).
//! Amounts travel as raw integer strings in token units.

use alloy::primitives::{Address, Bytes, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use super::{BridgeAggregator, BridgeError, BridgeStatus, Route, RouteExecution, RouteRequest, StatusQuery};
use crate::chain::units::{from_units, to_units};
use crate::chain::{AgentWallet, RawTransaction};
use crate::config::BridgeConfig;

/// Fallback per-step duration when the aggregator omits an estimate.
const DEFAULT_STEP_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RoutesResponse {
    #[serde(default)]
    routes: Vec<RawRoute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRoute {
    id: String,
    from_chain_id: u64,
    to_chain_id: u64,
    from_amount: String,
    to_amount: String,
    to_amount_min: String,
    #[serde(default)]
    steps: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepTransactionResponse {
    transaction_request: Option<RawTxRequest>,
    #[serde(default)]
    estimate: Option<StepEstimate>,
    #[serde(default)]
    action: Option<StepAction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTxRequest {
    to: String,
    data: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    gas_limit: Option<String>,
    chain_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepEstimate {
    #[serde(default)]
    approval_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepAction {
    from_token: TokenRef,
    from_amount: String,
}

#[derive(Debug, Deserialize)]
struct TokenRef {
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: String,
    #[serde(default)]
    substatus: Option<String>,
    #[serde(default)]
    substatus_message: Option<String>,
    #[serde(default)]
    receiving: Option<Receiving>,
}

#[derive(Debug, Deserialize)]
struct Receiving {
    #[serde(default)]
    amount: Option<String>,
}

/// Calldata and approval needed for one route step.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PreparedStep {
    pub chain_id: u64,
    pub tx: RawTransaction,
    /// `(token, spender, amount)` when an ERC-20 approval must come first.
    pub approval: Option<(Address, Address, U256)>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn parse_err(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::Parse(e.to_string())
}

fn raw_amount(value: &str) -> Result<Decimal, BridgeError> {
    let raw: U256 = value.parse().map_err(parse_err)?;
    Ok(from_units(raw)?)
}

fn parse_hex_u256(value: &str) -> Result<U256, BridgeError> {
    value.parse::<U256>().map_err(parse_err)
}

pub(crate) fn parse_routes(body: &str) -> Result<Vec<Route>, BridgeError> {
    let resp: RoutesResponse = serde_json::from_str(body).map_err(parse_err)?;
    resp.routes
        .into_iter()
        .map(|r| {
            let tool = r
                .steps
                .first()
                .and_then(|s| s.get("tool"))
                .and_then(|t| t.as_str())
                .unwrap_or("unknown")
                .to_string();
            let estimated_secs = r
                .steps
                .iter()
                .map(|s| {
                    s.pointer("/estimate/executionDuration")
                        .and_then(|d| d.as_f64())
                        .map(|d| d.max(0.0) as u64)
                        .unwrap_or(DEFAULT_STEP_SECS)
                })
                .sum();
            Ok(Route {
                id: r.id,
                from_chain: r.from_chain_id,
                to_chain: r.to_chain_id,
                from_amount: raw_amount(&r.from_amount)?,
                to_amount: raw_amount(&r.to_amount)?,
                to_amount_min: raw_amount(&r.to_amount_min)?,
                tool,
                estimated_secs,
                steps: r.steps,
            })
        })
        .collect()
}

/// Keep routes that complete in one transaction.
pub(crate) fn single_step(routes: Vec<Route>) -> Vec<Route> {
    routes.into_iter().filter(|r| r.steps.len() == 1).collect()
}

pub(crate) fn parse_step_transaction(body: &str) -> Result<PreparedStep, BridgeError> {
    let resp: StepTransactionResponse = serde_json::from_str(body).map_err(parse_err)?;
    let req = resp
        .transaction_request
        .ok_or_else(|| BridgeError::Parse("step has no transactionRequest".to_string()))?;

    let tx = RawTransaction {
        to: req.to.parse().map_err(parse_err)?,
        data: req.data.parse::<Bytes>().map_err(parse_err)?,
        value: match req.value.as_deref() {
            Some(v) => parse_hex_u256(v)?,
            None => U256::ZERO,
        },
        gas_limit: match req.gas_limit.as_deref() {
            Some(g) => Some(parse_hex_u256(g)?.saturating_to::<u64>()),
            None => None,
        },
    };

    let approval = match (resp.estimate.and_then(|e| e.approval_address), resp.action) {
        (Some(spender), Some(action)) => {
            let token: Address = action.from_token.address.parse().map_err(parse_err)?;
            if token == Address::ZERO {
                None
            } else {
                let spender: Address = spender.parse().map_err(parse_err)?;
                let amount: U256 = action.from_amount.parse().map_err(parse_err)?;
                Some((token, spender, amount))
            }
        }
        _ => None,
    };

    Ok(PreparedStep {
        chain_id: req.chain_id,
        tx,
        approval,
    })
}

pub(crate) fn parse_status(body: &str) -> Result<BridgeStatus, BridgeError> {
    let resp: StatusResponse = serde_json::from_str(body).map_err(parse_err)?;
    match resp.status.as_str() {
        "DONE" => {
            let received = match resp.receiving.and_then(|r| r.amount) {
                Some(amount) => Some(raw_amount(&amount)?),
                None => None,
            };
            Ok(BridgeStatus::Done { received })
        }
        "FAILED" | "INVALID" => Ok(BridgeStatus::Failed {
            reason: resp
                .substatus_message
                .or(resp.substatus)
                .unwrap_or_else(|| "bridge reported failure".to_string()),
        }),
        "NOT_FOUND" => Ok(BridgeStatus::NotFound),
        _ => Ok(BridgeStatus::Pending),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct LifiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    integrator: String,
    slippage: f64,
    order: String,
    wallet: Arc<dyn AgentWallet>,
}

impl LifiClient {
    pub fn new(config: &BridgeConfig, api_key: Option<String>, wallet: Arc<dyn AgentWallet>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .user_agent("VELVET-ARC/0.1.0")
            .build()
            .context("Failed to build LI.FI HTTP client")?;
        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key,
            integrator: config.integrator.clone(),
            slippage: config.slippage,
            order: config.order.clone(),
            wallet,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("x-lifi-api-key", key),
            None => builder,
        }
    }

    async fn read_body(resp: reqwest::Response) -> Result<String, BridgeError> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| BridgeError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(BridgeError::Api {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }
        Ok(body)
    }

    async fn post(&self, path: &str, payload: &serde_json::Value) -> Result<String, BridgeError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .request(self.http.post(&url).json(payload))
            .send()
            .await
            .map_err(|e| BridgeError::Http(e.to_string()))?;
        Self::read_body(resp).await
    }

    fn route_payload(&self, request: &RouteRequest) -> Result<serde_json::Value, BridgeError> {
        Ok(json!({
            "fromChainId": request.from_chain,
            "toChainId": request.to_chain,
            "fromTokenAddress": request.from_token.to_string(),
            "toTokenAddress": request.to_token.to_string(),
            "fromAmount": to_units(request.from_amount)?.to_string(),
            "fromAddress": request.from_address.to_string(),
            "toAddress": request.to_address.to_string(),
            "options": {
                "integrator": self.integrator,
                "slippage": self.slippage,
                "order": self.order,
                "allowSwitchChain": false,
            },
        }))
    }
}

#[async_trait]
impl BridgeAggregator for LifiClient {
    async fn routes(&self, request: &RouteRequest) -> Result<Vec<Route>, BridgeError> {
        let payload = self.route_payload(request)?;
        let body = self.post("/advanced/routes", &payload).await?;
        let offered = parse_routes(&body)?;
        let total = offered.len();
        let routes = single_step(offered);
        debug!(
            from = request.from_chain,
            to = request.to_chain,
            count = routes.len(),
            multi_step_dropped = total - routes.len(),
            "LI.FI routes"
        );
        Ok(routes)
    }

    async fn execute(&self, route: &Route) -> Result<RouteExecution, BridgeError> {
        let [step] = route.steps.as_slice() else {
            return Err(BridgeError::Unsupported(format!(
                "route {} has {} steps, expected 1",
                route.id,
                route.steps.len()
            )));
        };

        let body = self.post("/advanced/stepTransaction", step).await?;
        let prepared = parse_step_transaction(&body)?;

        let mut tx_hashes = Vec::new();
        if let Some((token, spender, amount)) = prepared.approval {
            if let Some(hash) = self
                .wallet
                .ensure_allowance(prepared.chain_id, token, spender, amount)
                .await?
            {
                info!(tx = %hash, "Bridge approval sent");
                tx_hashes.push(hash);
            }
        }

        let source_tx = self.wallet.send_raw(prepared.chain_id, prepared.tx).await?;
        info!(tool = %route.tool, tx = %source_tx, "Bridge transaction sent");
        tx_hashes.push(source_tx);
        Ok(RouteExecution {
            tx_hashes,
            source_tx,
            tool: route.tool.clone(),
        })
    }

    async fn status(&self, query: &StatusQuery) -> Result<BridgeStatus, BridgeError> {
        let url = format!(
            "{}/status?txHash={}&fromChain={}&toChain={}&bridge={}",
            self.base_url,
            urlencoding::encode(&query.tx_hash),
            query.from_chain,
            query.to_chain,
            urlencoding::encode(&query.bridge),
        );
        let resp = self
            .request(self.http.get(&url))
            .send()
            .await
            .map_err(|e| BridgeError::Http(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(BridgeStatus::NotFound);
        }
        let body = Self::read_body(resp).await?;
        parse_status(&body)
    }
}
