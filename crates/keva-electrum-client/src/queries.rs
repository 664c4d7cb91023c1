//! Multi-get queries built on batch calls
//!
//! Each query splits its input into chunks, sends one batch per chunk, and keys the results
//! by the parameter each batch entry carries back.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::error::ElectrumClientResult;
use crate::methods::{ElectrumApi, decode, names};
use crate::types::{Balance, FeeEstimates, HistoryEntry, Utxo};

const SATOSHIS_PER_COIN: f64 = 100_000_000.0;

/// Confirmation targets, in blocks, used by [`estimate_fees`]
pub const FAST_BLOCKS: u32 = 1;
pub const MEDIUM_BLOCKS: u32 = 18;
pub const SLOW_BLOCKS: u32 = 144;

/// Known chain tip used to extrapolate the current height without a server
const REFERENCE_HEIGHT: i64 = 627_179;
const REFERENCE_TIME_MS: i64 = 1_587_570_465_609;
const MILLIS_PER_BLOCK: f64 = 9.5 * 60.0 * 1000.0;

/// Split `items` into consecutive chunks of at most `chunk_size` elements.
///
/// A `chunk_size` of zero is treated as one.
pub fn split_into_chunks<T: Clone>(items: &[T], chunk_size: usize) -> Vec<Vec<T>> {
    items
        .chunks(chunk_size.max(1))
        .map(<[T]>::to_vec)
        .collect()
}

/// Electrum scripthash of an output script: SHA-256, byte-reversed, lowercase hex
pub fn script_hash(script: &[u8]) -> String {
    let mut digest = Sha256::digest(script).to_vec();
    digest.reverse();
    hex::encode(digest)
}

/// Aggregated balances of many scripthashes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiBalance {
    /// Sum of confirmed balances, in satoshis
    pub balance: i64,
    /// Sum of unconfirmed balances, in satoshis
    pub unconfirmed_balance: i64,
    pub by_scripthash: HashMap<String, Balance>,
}

fn param_key(param: &Value) -> String {
    match param {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Balances of every scripthash, plus confirmed and unconfirmed totals
pub async fn multi_get_balance<A>(
    api: &A,
    scripthashes: &[String],
    chunk_size: usize,
) -> ElectrumClientResult<MultiBalance>
where
    A: ElectrumApi + ?Sized,
{
    let mut result = MultiBalance::default();
    for chunk in split_into_chunks(scripthashes, chunk_size) {
        let entries = api.scripthash_get_balance_batch(&chunk).await?;
        for entry in entries {
            let key = param_key(&entry.param);
            let balance: Balance = decode(names::SCRIPTHASH_GET_BALANCE, entry.into_result()?)?;
            result.balance += balance.confirmed;
            result.unconfirmed_balance += balance.unconfirmed;
            result.by_scripthash.insert(key, balance);
        }
    }
    debug!(
        scripthashes = scripthashes.len(),
        balance = result.balance,
        unconfirmed = result.unconfirmed_balance,
        "Fetched balances"
    );
    Ok(result)
}

/// Unspent outputs of every scripthash
pub async fn multi_get_utxo<A>(
    api: &A,
    scripthashes: &[String],
    chunk_size: usize,
) -> ElectrumClientResult<HashMap<String, Vec<Utxo>>>
where
    A: ElectrumApi + ?Sized,
{
    let mut result = HashMap::new();
    for chunk in split_into_chunks(scripthashes, chunk_size) {
        for entry in api.scripthash_listunspent_batch(&chunk).await? {
            let key = param_key(&entry.param);
            let utxos: Vec<Utxo> = decode(names::SCRIPTHASH_LISTUNSPENT, entry.into_result()?)?;
            result.insert(key, utxos);
        }
    }
    Ok(result)
}

/// Transaction history of every scripthash
pub async fn multi_get_history<A>(
    api: &A,
    scripthashes: &[String],
    chunk_size: usize,
) -> ElectrumClientResult<HashMap<String, Vec<HistoryEntry>>>
where
    A: ElectrumApi + ?Sized,
{
    let mut result = HashMap::new();
    for chunk in split_into_chunks(scripthashes, chunk_size) {
        for entry in api.scripthash_get_history_batch(&chunk).await? {
            let key = param_key(&entry.param);
            let history: Vec<HistoryEntry> =
                decode(names::SCRIPTHASH_GET_HISTORY, entry.into_result()?)?;
            result.insert(key, history);
        }
    }
    Ok(result)
}

/// Fetch many transactions by txid.
///
/// Duplicate txids are fetched once. `progress` is called after every chunk with
/// `(total, fetched)`. Entries the server refused as too large (`-32600`) are fetched again
/// with a single `blockchain.transaction.get`. Any other per-entry error is logged and the
/// txid is left out of the returned map.
pub async fn multi_get_transactions<A, F>(
    api: &A,
    txids: &[String],
    chunk_size: usize,
    verbose: bool,
    mut progress: Option<F>,
) -> ElectrumClientResult<HashMap<String, Value>>
where
    A: ElectrumApi + ?Sized,
    F: FnMut(usize, usize),
{
    let mut seen = HashSet::new();
    let unique: Vec<String> = txids
        .iter()
        .filter(|txid| seen.insert(txid.as_str()))
        .cloned()
        .collect();

    let total = unique.len();
    let mut fetched = 0;
    let mut result = HashMap::with_capacity(total);

    for chunk in split_into_chunks(&unique, chunk_size) {
        let entries = api.transaction_get_batch(&chunk, verbose).await?;
        fetched += chunk.len();
        if let Some(report) = progress.as_mut() {
            report(total, fetched);
        }

        for entry in entries {
            let txid = param_key(&entry.param);
            let tx = match entry.outcome {
                Ok(tx) => tx,
                Err(error) if error.is_response_too_large() => {
                    warn!(txid = %txid, "Transaction too large for batch, fetching alone");
                    api.transaction_get(&txid, verbose).await?
                }
                Err(error) => {
                    warn!(txid = %txid, code = error.code, error = %error.message, "Skipping transaction");
                    continue;
                }
            };
            result.insert(txid, tx);
        }
    }
    Ok(result)
}

/// Fee in satoshis per byte for confirmation within `blocks`.
///
/// The server answers in coin per kilobyte; an answer of -1 (no estimate) yields 1.
pub async fn estimate_fee<A>(api: &A, blocks: u32) -> ElectrumClientResult<u64>
where
    A: ElectrumApi + ?Sized,
{
    let blocks = blocks.max(1);
    let per_kilobyte = api.blockchain_estimatefee(blocks).await?;
    Ok(coin_per_kb_to_sat_per_byte(per_kilobyte))
}

/// Fast, medium and slow fee estimates
pub async fn estimate_fees<A>(api: &A) -> ElectrumClientResult<FeeEstimates>
where
    A: ElectrumApi + ?Sized,
{
    Ok(FeeEstimates {
        fast: estimate_fee(api, FAST_BLOCKS).await?,
        medium: estimate_fee(api, MEDIUM_BLOCKS).await?,
        slow: estimate_fee(api, SLOW_BLOCKS).await?,
    })
}

/// Rough chain height for now, assuming one block every 9.5 minutes since a known tip.
pub fn estimate_current_block_height() -> u64 {
    estimate_block_height_at(Utc::now())
}

/// Rough chain height at `at`. Times before the reference tip clamp to zero blocks elapsed.
pub fn estimate_block_height_at(at: DateTime<Utc>) -> u64 {
    let elapsed = (at.timestamp_millis() - REFERENCE_TIME_MS).max(0) as f64;
    (REFERENCE_HEIGHT as f64 + elapsed / MILLIS_PER_BLOCK).floor() as u64
}

fn coin_per_kb_to_sat_per_byte(per_kilobyte: f64) -> u64 {
    if per_kilobyte < 0.0 {
        return 1;
    }
    (per_kilobyte / 1024.0 * SATOSHIS_PER_COIN).round() as u64
}
