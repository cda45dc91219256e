//! Swap / liquidity-aggregation service integration.
//!
//! Defines the `SwapService` trait and the typed quote the trade executor
//! works with. Provider payloads are validated once, at the boundary, into
//! `QuoteOrError`; nothing downstream inspects raw JSON except the opaque
//! `raw` blob handed back to the provider when building the transaction.
//! - `jupiter` — Jupiter-style quote/swap REST API

pub mod jupiter;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::UnsignedTx;

/// A priced route from one asset to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: u64,
    pub out_amount: u64,
    /// Worst acceptable output after slippage.
    pub min_out_amount: u64,
    pub slippage_bps: u16,
    /// Provider payload, echoed back when building the swap.
    pub raw: serde_json::Value,
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} {} (min {}, slippage {}bps)",
            self.in_amount,
            self.input_mint,
            self.out_amount,
            self.output_mint,
            self.min_out_amount,
            self.slippage_bps,
        )
    }
}

/// Either a usable quote or the provider's reason for refusing one.
#[derive(Debug, Clone, PartialEq)]
pub enum QuoteOrError {
    Quote(Quote),
    Error(String),
}

impl QuoteOrError {
    pub fn into_result(self) -> Result<Quote, String> {
        match self {
            QuoteOrError::Quote(q) => Ok(q),
            QuoteOrError::Error(e) => Err(e),
        }
    }
}

/// Abstraction over the swap aggregator.
///
/// `quote` distinguishes a provider refusal (`QuoteOrError::Error`, e.g. no
/// route) from a transport failure (`Err`). Both are recoverable.
#[async_trait]
pub trait SwapService: Send + Sync {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<QuoteOrError>;

    /// Build the swap transaction for `quote`, paid and signed by `signer`.
    async fn build_swap_transaction(&self, quote: &Quote, signer: &str) -> Result<UnsignedTx>;

    fn name(&self) -> &str;
}
