//! Jupiter-style swap aggregator client.
//!
//! API shape: `GET {base}/quote?inputMint&outputMint&amount&slippageBps`
//! returns a route; `POST {base}/swap` with `{quoteResponse, userPublicKey}`
//! returns a base64 `swapTransaction` ready for signing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{Quote, QuoteOrError, SwapService};
use crate::types::UnsignedTx;

const PROVIDER_NAME: &str = "jupiter";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    input_mint: String,
    output_mint: String,
    in_amount: String,
    out_amount: String,
    other_amount_threshold: String,
    slippage_bps: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Per-request timeout for quote and swap-build calls.
pub const SWAP_TIMEOUT: Duration = Duration::from_secs(20);

pub struct JupiterClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl JupiterClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(SWAP_TIMEOUT)
            .user_agent("ROTOR/0.1.0 (wallet-rotation)")
            .build()
            .context("Failed to build HTTP client for swap service")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("x-api-key", key),
            None => req,
        }
    }
}

#[async_trait]
impl SwapService for JupiterClient {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<QuoteOrError> {
        let url = format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}&slippageBps={}",
            self.base_url,
            urlencoding::encode(input_mint),
            urlencoding::encode(output_mint),
            amount,
            slippage_bps,
        );

        debug!(url = %url, "Requesting swap quote");

        let resp = self
            .with_auth(self.http.get(&url))
            .send()
            .await
            .context("Swap quote request failed")?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .context("Failed to parse swap quote response")?;

        if !status.is_success() {
            return Ok(QuoteOrError::Error(format!("HTTP {status}: {}", error_text(&body))));
        }
        Ok(parse_quote(body))
    }

    async fn build_swap_transaction(&self, quote: &Quote, signer: &str) -> Result<UnsignedTx> {
        let payload = json!({
            "quoteResponse": quote.raw,
            "userPublicKey": signer,
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
        });

        let resp = self
            .with_auth(self.http.post(format!("{}/swap", self.base_url)))
            .json(&payload)
            .send()
            .await
            .context("Swap build request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Swap build error {status}: {body}");
        }

        let swap: SwapResponse = resp
            .json()
            .await
            .context("Failed to parse swap build response")?;

        let bytes = BASE64
            .decode(swap.swap_transaction.as_bytes())
            .context("Swap transaction is not valid base64")?;
        Ok(UnsignedTx(bytes))
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Validate a quote payload into a typed quote, or the provider's error.
fn parse_quote(body: Value) -> QuoteOrError {
    if body.get("error").is_some() && body.get("outAmount").is_none() {
        return QuoteOrError::Error(error_text(&body));
    }

    let parsed: QuoteResponse = match serde_json::from_value(body.clone()) {
        Ok(q) => q,
        Err(e) => return QuoteOrError::Error(format!("malformed quote: {e}")),
    };

    let amounts = (
        parsed.in_amount.parse::<u64>(),
        parsed.out_amount.parse::<u64>(),
        parsed.other_amount_threshold.parse::<u64>(),
    );
    let (in_amount, out_amount, min_out_amount) = match amounts {
        (Ok(i), Ok(o), Ok(m)) => (i, o, m),
        _ => return QuoteOrError::Error("quote amounts are not integers".to_string()),
    };

    if out_amount == 0 {
        return QuoteOrError::Error("quote returned zero output".to_string());
    }

    QuoteOrError::Quote(Quote {
        input_mint: parsed.input_mint,
        output_mint: parsed.output_mint,
        in_amount,
        out_amount,
        min_out_amount,
        slippage_bps: parsed.slippage_bps,
        raw: body,
    })
}

fn error_text(body: &Value) -> String {
    let parsed: ErrorResponse = serde_json::from_value(body.clone()).unwrap_or(ErrorResponse {
        error: None,
        message: None,
    });
    parsed
        .error
        .or(parsed.message)
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
