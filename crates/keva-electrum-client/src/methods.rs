//! Typed Electrum protocol methods over the raw `request` / `request_batch` surface

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::connection::Connection;
use crate::dispatcher::BatchEntry;
use crate::error::ElectrumClientResult;
use crate::types::{
    Balance, HeaderNotification, HistoryEntry, MerkleProof, ServerFeatures, ServerVersion, Utxo,
    unexpected,
};

/// Electrum method names
pub mod names {
    pub const SERVER_VERSION: &str = "server.version";
    pub const SERVER_PING: &str = "server.ping";
    pub const SERVER_FEATURES: &str = "server.features";
    pub const SERVER_BANNER: &str = "server.banner";
    pub const HEADERS_SUBSCRIBE: &str = "blockchain.headers.subscribe";
    pub const ESTIMATE_FEE: &str = "blockchain.estimatefee";
    pub const RELAY_FEE: &str = "blockchain.relayfee";
    pub const SCRIPTHASH_GET_BALANCE: &str = "blockchain.scripthash.get_balance";
    pub const SCRIPTHASH_GET_HISTORY: &str = "blockchain.scripthash.get_history";
    pub const SCRIPTHASH_GET_MEMPOOL: &str = "blockchain.scripthash.get_mempool";
    pub const SCRIPTHASH_LISTUNSPENT: &str = "blockchain.scripthash.listunspent";
    pub const SCRIPTHASH_SUBSCRIBE: &str = "blockchain.scripthash.subscribe";
    pub const TRANSACTION_GET: &str = "blockchain.transaction.get";
    pub const TRANSACTION_BROADCAST: &str = "blockchain.transaction.broadcast";
    pub const TRANSACTION_GET_MERKLE: &str = "blockchain.transaction.get_merkle";
    pub const TRANSACTION_ID_FROM_POS: &str = "blockchain.transaction.id_from_pos";
}

/// Deserialize a call result, reporting shape mismatches against the method
pub fn decode<T: DeserializeOwned>(method: &str, value: Value) -> ElectrumClientResult<T> {
    serde_json::from_value(value).map_err(|e| unexpected(method, &e.to_string()))
}

fn string_params(items: &[String]) -> Vec<Value> {
    items.iter().map(|item| Value::String(item.clone())).collect()
}

/// Electrum protocol surface.
///
/// Implementors provide `request` and `request_batch`; every typed method is built on
/// those two.
#[async_trait]
pub trait ElectrumApi: Send + Sync {
    /// Send one call and wait for its result
    async fn request(&self, method: &str, params: Vec<Value>) -> ElectrumClientResult<Value>;

    /// Send one call per param as a single batch frame
    async fn request_batch(
        &self,
        method: &str,
        params: Vec<Value>,
        extra: Option<Value>,
    ) -> ElectrumClientResult<Vec<BatchEntry>>;

    /// Protocol handshake; must be the first call on a connection
    async fn server_version(
        &self,
        client_name: &str,
        protocol_version: &str,
    ) -> ElectrumClientResult<ServerVersion> {
        let value = self
            .request(
                names::SERVER_VERSION,
                vec![json!(client_name), json!(protocol_version)],
            )
            .await?;
        ServerVersion::from_value(value)
    }

    async fn server_ping(&self) -> ElectrumClientResult<()> {
        self.request(names::SERVER_PING, vec![]).await?;
        Ok(())
    }

    async fn server_features(&self) -> ElectrumClientResult<ServerFeatures> {
        let value = self.request(names::SERVER_FEATURES, vec![]).await?;
        decode(names::SERVER_FEATURES, value)
    }

    async fn server_banner(&self) -> ElectrumClientResult<String> {
        let value = self.request(names::SERVER_BANNER, vec![]).await?;
        decode(names::SERVER_BANNER, value)
    }

    /// Current tip; later tips arrive as `blockchain.headers.subscribe` notifications
    async fn headers_subscribe(&self) -> ElectrumClientResult<HeaderNotification> {
        let value = self.request(names::HEADERS_SUBSCRIBE, vec![]).await?;
        decode(names::HEADERS_SUBSCRIBE, value)
    }

    /// Fee rate in coin per kilobyte for confirmation within `blocks`; -1 when unknown
    async fn blockchain_estimatefee(&self, blocks: u32) -> ElectrumClientResult<f64> {
        let value = self.request(names::ESTIMATE_FEE, vec![json!(blocks)]).await?;
        decode(names::ESTIMATE_FEE, value)
    }

    async fn blockchain_relayfee(&self) -> ElectrumClientResult<f64> {
        let value = self.request(names::RELAY_FEE, vec![]).await?;
        decode(names::RELAY_FEE, value)
    }

    async fn scripthash_get_balance(&self, scripthash: &str) -> ElectrumClientResult<Balance> {
        let value = self
            .request(names::SCRIPTHASH_GET_BALANCE, vec![json!(scripthash)])
            .await?;
        decode(names::SCRIPTHASH_GET_BALANCE, value)
    }

    async fn scripthash_get_history(
        &self,
        scripthash: &str,
    ) -> ElectrumClientResult<Vec<HistoryEntry>> {
        let value = self
            .request(names::SCRIPTHASH_GET_HISTORY, vec![json!(scripthash)])
            .await?;
        decode(names::SCRIPTHASH_GET_HISTORY, value)
    }

    async fn scripthash_get_mempool(
        &self,
        scripthash: &str,
    ) -> ElectrumClientResult<Vec<HistoryEntry>> {
        let value = self
            .request(names::SCRIPTHASH_GET_MEMPOOL, vec![json!(scripthash)])
            .await?;
        decode(names::SCRIPTHASH_GET_MEMPOOL, value)
    }

    async fn scripthash_listunspent(&self, scripthash: &str) -> ElectrumClientResult<Vec<Utxo>> {
        let value = self
            .request(names::SCRIPTHASH_LISTUNSPENT, vec![json!(scripthash)])
            .await?;
        decode(names::SCRIPTHASH_LISTUNSPENT, value)
    }

    /// Current status hash, `None` for a script without history
    async fn scripthash_subscribe(&self, scripthash: &str) -> ElectrumClientResult<Option<String>> {
        let value = self
            .request(names::SCRIPTHASH_SUBSCRIBE, vec![json!(scripthash)])
            .await?;
        decode(names::SCRIPTHASH_SUBSCRIBE, value)
    }

    async fn scripthash_get_balance_batch(
        &self,
        scripthashes: &[String],
    ) -> ElectrumClientResult<Vec<BatchEntry>> {
        self.request_batch(names::SCRIPTHASH_GET_BALANCE, string_params(scripthashes), None)
            .await
    }

    async fn scripthash_get_history_batch(
        &self,
        scripthashes: &[String],
    ) -> ElectrumClientResult<Vec<BatchEntry>> {
        self.request_batch(names::SCRIPTHASH_GET_HISTORY, string_params(scripthashes), None)
            .await
    }

    async fn scripthash_get_mempool_batch(
        &self,
        scripthashes: &[String],
    ) -> ElectrumClientResult<Vec<BatchEntry>> {
        self.request_batch(names::SCRIPTHASH_GET_MEMPOOL, string_params(scripthashes), None)
            .await
    }

    async fn scripthash_listunspent_batch(
        &self,
        scripthashes: &[String],
    ) -> ElectrumClientResult<Vec<BatchEntry>> {
        self.request_batch(names::SCRIPTHASH_LISTUNSPENT, string_params(scripthashes), None)
            .await
    }

    /// Raw hex, or the decoded transaction object when `verbose`
    async fn transaction_get(&self, txid: &str, verbose: bool) -> ElectrumClientResult<Value> {
        self.request(names::TRANSACTION_GET, vec![json!(txid), json!(verbose)])
            .await
    }

    async fn transaction_get_batch(
        &self,
        txids: &[String],
        verbose: bool,
    ) -> ElectrumClientResult<Vec<BatchEntry>> {
        self.request_batch(names::TRANSACTION_GET, string_params(txids), Some(json!(verbose)))
            .await
    }

    /// Returns the txid the server accepted
    async fn transaction_broadcast(&self, raw_hex: &str) -> ElectrumClientResult<String> {
        let value = self
            .request(names::TRANSACTION_BROADCAST, vec![json!(raw_hex)])
            .await?;
        decode(names::TRANSACTION_BROADCAST, value)
    }

    async fn transaction_get_merkle(
        &self,
        txid: &str,
        height: u64,
    ) -> ElectrumClientResult<MerkleProof> {
        let value = self
            .request(names::TRANSACTION_GET_MERKLE, vec![json!(txid), json!(height)])
            .await?;
        decode(names::TRANSACTION_GET_MERKLE, value)
    }

    async fn transaction_id_from_pos(&self, height: u64, pos: u32) -> ElectrumClientResult<String> {
        let value = self
            .request(names::TRANSACTION_ID_FROM_POS, vec![json!(height), json!(pos)])
            .await?;
        decode(names::TRANSACTION_ID_FROM_POS, value)
    }
}

#[async_trait]
impl ElectrumApi for Connection {
    async fn request(&self, method: &str, params: Vec<Value>) -> ElectrumClientResult<Value> {
        Connection::request(self, method, params).await
    }

    async fn request_batch(
        &self,
        method: &str,
        params: Vec<Value>,
        extra: Option<Value>,
    ) -> ElectrumClientResult<Vec<BatchEntry>> {
        Connection::request_batch(self, method, params, extra).await
    }
}
