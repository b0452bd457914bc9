use std::path::Path;

use async_trait::async_trait;
use bitcoin::{Address, Network, PrivateKey};
use tracing::debug;

use crate::error::CoreError;
use crate::rpc::types::WalletConfig;
use crate::rpc::WalletBackend;
use crate::types::Utxo;

use super::client::HttpRpcClient;
use super::connection::wallet_endpoint;
use super::parsing::{parse_address, parse_unspent};

/// Wallet JSON-RPC client, talking to a node's wallet endpoint.
pub struct HttpWallet {
    rpc: HttpRpcClient,
    config: WalletConfig,
    network: Network,
}

impl HttpWallet {
    /// Connect to `wallet` on the node at `connection`. Credentials follow
    /// the same precedence as [`HttpRpcClient::new`].
    pub fn new(
        connection: &str,
        wallet: Option<&str>,
        user: Option<&str>,
        pass: Option<&str>,
        cookie_file: Option<&Path>,
        config: WalletConfig,
        network: Network,
    ) -> Result<Self, CoreError> {
        let endpoint = wallet_endpoint(connection, wallet)?;
        let rpc = HttpRpcClient::new(&endpoint, user, pass, cookie_file, None, 1)?;
        Ok(Self {
            rpc,
            config,
            network,
        })
    }
}

#[async_trait]
impl WalletBackend for HttpWallet {
    async fn list_unspent(&self) -> Result<Vec<Utxo>, CoreError> {
        let raw = self.rpc.rpc_call("listunspent", Vec::new()).await?;
        let entries = raw
            .as_array()
            .ok_or_else(|| CoreError::InvalidData("listunspent result is not an array".into()))?;
        let utxos = entries
            .iter()
            .map(|entry| parse_unspent(entry, self.network))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = utxos.len(), "listed wallet unspent outputs");
        Ok(utxos)
    }

    async fn get_raw_change_address(&self, account: &str) -> Result<Address, CoreError> {
        let params = if account.is_empty() {
            Vec::new()
        } else {
            vec![serde_json::json!(account)]
        };
        let raw = self.rpc.rpc_call("getrawchangeaddress", params).await?;
        let address = raw
            .as_str()
            .ok_or_else(|| CoreError::InvalidData("getrawchangeaddress result is not a string".into()))?;
        parse_address(address, self.network)
    }

    async fn dump_priv_key(&self, address: &Address) -> Result<PrivateKey, CoreError> {
        let raw = self
            .rpc
            .rpc_call("dumpprivkey", vec![serde_json::json!(address.to_string())])
            .await?;
        let wif = raw
            .as_str()
            .ok_or_else(|| CoreError::InvalidData("dumpprivkey result is not a string".into()))?;
        PrivateKey::from_wif(wif)
            .map_err(|e| CoreError::InvalidData(format!("invalid WIF from dumpprivkey: {e}")))
    }

    async fn wallet_passphrase(
        &self,
        passphrase: &str,
        timeout_secs: u64,
    ) -> Result<(), CoreError> {
        self.rpc
            .rpc_call(
                "walletpassphrase",
                vec![serde_json::json!(passphrase), serde_json::json!(timeout_secs)],
            )
            .await?;
        Ok(())
    }

    fn wallet_config(&self) -> &WalletConfig {
        &self.config
    }
}
