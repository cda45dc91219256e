//! Mock ledger network and swap service for integration testing.
//!
//! Provides deterministic `LedgerClient`, `SwapService` and `TxSigner`
//! implementations backed by one in-memory balance sheet. Transactions are
//! JSON-encoded instructions that take effect on `submit`, so funds really
//! move between the treasury, the workers and their token holdings.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rotor::ledger::{LedgerClient, TxSigner};
use rotor::swap::{Quote, QuoteOrError, SwapService};
use rotor::types::{Credential, SignedTx, TxRef, UnsignedTx};

pub const NATIVE: &str = "SOL";
pub const TOKEN: &str = "TOKEN";
/// Fee charged to the payer of every transaction.
pub const TX_FEE: u64 = 5_000;
/// Tokens received per lamport on a buy; a sell returns half the lamports.
pub const TOKENS_PER_LAMPORT: u64 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum MockTx {
    Transfer { from: String, to: String, amount: u64 },
    Swap { owner: String, input: String, output: String, amount_in: u64, amount_out: u64 },
}

#[derive(Default)]
struct Sheet {
    native: HashMap<String, u64>,
    tokens: HashMap<(String, String), u64>,
}

/// A mock ledger network.
///
/// All state is in-memory and shared with the `MockSwap` built from it.
pub struct MockChain {
    sheet: Arc<Mutex<Sheet>>,
    submitted: Arc<Mutex<Vec<String>>>,
    /// If set, every ledger call returns this error.
    force_error: Arc<Mutex<Option<String>>>,
    /// If set, submitted transactions never confirm.
    unconfirmed: Arc<Mutex<bool>>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sheet: Arc::new(Mutex::new(Sheet::default())),
            submitted: Arc::new(Mutex::new(Vec::new())),
            force_error: Arc::new(Mutex::new(None)),
            unconfirmed: Arc::new(Mutex::new(false)),
        })
    }

    pub fn set_balance(&self, address: &str, lamports: u64) {
        self.sheet.lock().unwrap().native.insert(address.to_string(), lamports);
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.sheet.lock().unwrap().native.get(address).copied().unwrap_or(0)
    }

    pub fn token_balance(&self, owner: &str, mint: &str) -> u64 {
        self.sheet
            .lock()
            .unwrap()
            .tokens
            .get(&(owner.to_string(), mint.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Force all subsequent ledger calls to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn set_unconfirmed(&self, unconfirmed: bool) {
        *self.unconfirmed.lock().unwrap() = unconfirmed;
    }

    /// Descriptions of every applied transaction, in order.
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    fn check_error(&self) -> Result<()> {
        if let Some(msg) = self.force_error.lock().unwrap().as_ref() {
            bail!("{msg}");
        }
        Ok(())
    }

    fn apply(&self, tx: &MockTx) -> Result<()> {
        let mut sheet = self.sheet.lock().unwrap();
        match tx {
            MockTx::Transfer { from, to, amount } => {
                debit(&mut sheet.native, from, amount + TX_FEE)?;
                *sheet.native.entry(to.clone()).or_default() += amount;
            }
            MockTx::Swap { owner, input, output, amount_in, amount_out } => {
                debit(&mut sheet.native, owner, TX_FEE)?;
                if input == NATIVE {
                    debit(&mut sheet.native, owner, *amount_in)?;
                } else {
                    let key = (owner.clone(), input.clone());
                    let held = sheet.tokens.entry(key).or_default();
                    *held = held.checked_sub(*amount_in).context("insufficient token balance")?;
                }
                if output == NATIVE {
                    *sheet.native.entry(owner.clone()).or_default() += amount_out;
                } else {
                    *sheet.tokens.entry((owner.clone(), output.clone())).or_default() += amount_out;
                }
            }
        }
        Ok(())
    }
}

fn debit(balances: &mut HashMap<String, u64>, address: &str, amount: u64) -> Result<()> {
    let balance = balances.entry(address.to_string()).or_default();
    *balance = balance
        .checked_sub(amount)
        .ok_or_else(|| anyhow!("insufficient lamports in {address}"))?;
    Ok(())
}

fn encode(tx: &MockTx) -> Result<UnsignedTx> {
    Ok(UnsignedTx(serde_json::to_vec(tx)?))
}

#[async_trait]
impl LedgerClient for MockChain {
    async fn get_balance(&self, address: &str) -> Result<u64> {
        self.check_error()?;
        Ok(self.balance(address))
    }

    async fn get_token_balance(&self, owner: &str, mint: &str) -> Result<u64> {
        self.check_error()?;
        Ok(self.token_balance(owner, mint))
    }

    async fn build_transfer(&self, from: &str, to: &str, amount: u64) -> Result<UnsignedTx> {
        self.check_error()?;
        encode(&MockTx::Transfer { from: from.into(), to: to.into(), amount })
    }

    async fn submit(&self, tx: &SignedTx) -> Result<TxRef> {
        self.check_error()?;
        let decoded: MockTx = serde_json::from_slice(&tx.0).context("malformed mock transaction")?;
        self.apply(&decoded)?;

        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(format!("{decoded:?}"));
        Ok(TxRef(format!("sig-{}", submitted.len())))
    }

    async fn confirm(&self, _tx: &TxRef, _timeout: Duration) -> Result<bool> {
        self.check_error()?;
        Ok(!*self.unconfirmed.lock().unwrap())
    }
}

/// A mock swap aggregator with a fixed price.
pub struct MockSwap {
    /// If set, every quote is refused with this reason.
    refuse_quotes: Arc<Mutex<Option<String>>>,
    quotes_requested: Arc<Mutex<u32>>,
}

impl MockSwap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            refuse_quotes: Arc::new(Mutex::new(None)),
            quotes_requested: Arc::new(Mutex::new(0)),
        })
    }

    pub fn refuse_quotes(&self, reason: Option<&str>) {
        *self.refuse_quotes.lock().unwrap() = reason.map(str::to_string);
    }

    pub fn quotes_requested(&self) -> u32 {
        *self.quotes_requested.lock().unwrap()
    }
}

#[async_trait]
impl SwapService for MockSwap {
    async fn quote(&self, input: &str, output: &str, amount: u64, slippage_bps: u16) -> Result<QuoteOrError> {
        *self.quotes_requested.lock().unwrap() += 1;
        if let Some(reason) = self.refuse_quotes.lock().unwrap().as_ref() {
            return Ok(QuoteOrError::Error(reason.clone()));
        }

        let out_amount = if input == NATIVE {
            amount * TOKENS_PER_LAMPORT
        } else {
            amount / TOKENS_PER_LAMPORT
        };
        Ok(QuoteOrError::Quote(Quote {
            input_mint: input.into(),
            output_mint: output.into(),
            in_amount: amount,
            out_amount,
            min_out_amount: out_amount - out_amount * slippage_bps as u64 / 10_000,
            slippage_bps,
            raw: serde_json::Value::Null,
        }))
    }

    async fn build_swap_transaction(&self, quote: &Quote, signer: &str) -> Result<UnsignedTx> {
        encode(&MockTx::Swap {
            owner: signer.into(),
            input: quote.input_mint.clone(),
            output: quote.output_mint.clone(),
            amount_in: quote.in_amount,
            amount_out: quote.out_amount,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Accepts any credential; the mock chain does not check signatures.
pub struct MockSigner;

impl TxSigner for MockSigner {
    fn sign(&self, tx: &UnsignedTx, credential: &Credential) -> Result<SignedTx> {
        if credential.is_empty() {
            bail!("empty credential");
        }
        Ok(SignedTx(tx.0.clone()))
    }
}
