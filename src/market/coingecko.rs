//! CoinGecko price feed.
//!
//! API: `{base}/simple/price?ids={asset}&vs_currencies=usd&include_24hr_change=true&include_24hr_vol=true`
//! Auth: none for the public tier.
//! Rate limit: roughly 10–30 req/min, which the scanner cooldown respects.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use super::{PriceFeed, PriceQuote};
use crate::config::ScannerConfig;

#[derive(Debug, Deserialize)]
struct SimplePrice {
    usd: f64,
    #[serde(default)]
    usd_24h_change: Option<f64>,
    #[serde(default)]
    usd_24h_vol: Option<f64>,
}

pub struct CoinGeckoClient {
    http: Client,
    base_url: String,
    asset_id: String,
}

impl CoinGeckoClient {
    pub fn new(config: &ScannerConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .user_agent("VELVET-ARC/0.1.0")
            .build()
            .context("Failed to build CoinGecko HTTP client")?;
        Ok(Self {
            http,
            base_url: config.price_api_url.trim_end_matches('/').to_string(),
            asset_id: config.asset_id.clone(),
        })
    }

    fn price_url(&self) -> String {
        format!(
            "{}/simple/price?ids={}&vs_currencies=usd&include_24hr_change=true&include_24hr_vol=true",
            self.base_url,
            urlencoding::encode(&self.asset_id),
        )
    }
}

/// Parse a `simple/price` response body for one asset.
pub(crate) fn parse_quote(body: &str, asset_id: &str) -> Result<PriceQuote> {
    let data: HashMap<String, SimplePrice> =
        serde_json::from_str(body).context("Failed to parse CoinGecko response")?;
    let entry = data
        .get(asset_id)
        .with_context(|| format!("CoinGecko response missing asset {asset_id}"))?;

    let volume = entry
        .usd_24h_vol
        .and_then(Decimal::from_f64_retain)
        .unwrap_or(Decimal::ZERO)
        .round_dp(2);

    Ok(PriceQuote {
        price: entry.usd,
        change_24h: entry.usd_24h_change.unwrap_or(0.0),
        volume_24h: volume,
    })
}

#[async_trait]
impl PriceFeed for CoinGeckoClient {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    async fn fetch_quote(&self) -> Result<PriceQuote> {
        let url = self.price_url();
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("CoinGecko request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("CoinGecko API error: {status}");
        }

        let body = resp.text().await.context("Failed to read CoinGecko response")?;
        let quote = parse_quote(&body, &self.asset_id)?;
        debug!(
            asset = %self.asset_id,
            price = quote.price,
            change = quote.change_24h,
            "CoinGecko quote"
        );
        Ok(quote)
    }
}
