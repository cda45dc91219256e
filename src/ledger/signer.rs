//! Keypair signing for worker and treasury transactions.
//!
//! Credentials are base58-encoded 64-byte keypairs (or the JSON byte-array
//! form written by the Solana CLI). They are decoded only at signing time
//! and never logged.

use anyhow::{anyhow, Context, Result};
use solana_sdk::hash::Hash;
use solana_sdk::message::{Message, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::system_instruction;
use solana_sdk::transaction::VersionedTransaction;
use std::str::FromStr;

use super::TxSigner;
use crate::types::{Credential, SignedTx, UnsignedTx};

/// Decode a credential into a keypair.
pub fn keypair_from_credential(credential: &Credential) -> Result<Keypair> {
    let raw = credential.expose().trim();
    let bytes: Vec<u8> = if raw.starts_with('[') {
        serde_json::from_str(raw).context("Credential is not a JSON byte array")?
    } else {
        bs58::decode(raw)
            .into_vec()
            .context("Credential is not valid base58")?
    };
    Keypair::from_bytes(&bytes).map_err(|e| anyhow!("Credential is not a valid keypair: {e}"))
}

/// Public address derived from a credential.
pub fn address_of(credential: &Credential) -> Result<String> {
    Ok(keypair_from_credential(credential)?.pubkey().to_string())
}

/// Serialize an unsigned native transfer with placeholder signatures.
pub fn encode_transfer(from: &str, to: &str, amount: u64, blockhash: &str) -> Result<UnsignedTx> {
    let from = Pubkey::from_str(from).map_err(|e| anyhow!("Invalid sender address {from}: {e}"))?;
    let to = Pubkey::from_str(to).map_err(|e| anyhow!("Invalid recipient address {to}: {e}"))?;
    let blockhash = Hash::from_str(blockhash).map_err(|e| anyhow!("Invalid blockhash: {e}"))?;

    let instruction = system_instruction::transfer(&from, &to, amount);
    let message = Message::new_with_blockhash(&[instruction], Some(&from), &blockhash);
    let tx = VersionedTransaction {
        signatures: vec![Signature::default(); message.header.num_required_signatures as usize],
        message: VersionedMessage::Legacy(message),
    };

    let bytes = bincode::serialize(&tx).context("Failed to serialize transfer")?;
    Ok(UnsignedTx(bytes))
}

/// Signs with keypairs decoded from account credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeypairSigner;

impl TxSigner for KeypairSigner {
    fn sign(&self, tx: &UnsignedTx, credential: &Credential) -> Result<SignedTx> {
        let keypair = keypair_from_credential(credential)?;
        let unsigned: VersionedTransaction =
            bincode::deserialize(&tx.0).context("Unsigned transaction is malformed")?;

        let signed = VersionedTransaction::try_new(unsigned.message, &[&keypair])
            .map_err(|e| anyhow!("Signing failed: {e}"))?;

        let bytes = bincode::serialize(&signed).context("Failed to serialize signed transaction")?;
        Ok(SignedTx(bytes))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
