//! C2 — Network Client. Submits transactions, reads account state, fetches
//! the leader schedule (spec §2, §6). The teacher has no RPC client of its
//! own (it only streams); this is grounded on the RPC-wrapping idiom in
//! `other_examples/.../ronaldslwong-copyrust::build_tx::tx_builder` (nonce
//! blockhash reads, simulate-before-send) and the `SolanaRpcClient` wrapper
//! shape in `other_examples/.../0xfnzero-sol-trade-sdk`.

use crate::error::NetworkError;
use crate::types::{Anchor, BalanceDelta, Commitment, RawInstruction, RawTx, SignatureStatus, NATIVE_MINT};
use async_trait::async_trait;
use solana_commitment_config::CommitmentConfig;
use solana_pubkey::Pubkey;
use solana_rpc_client::nonblocking::rpc_client::RpcClient;
use solana_transaction_status::option_serializer::OptionSerializer;
use std::str::FromStr;
use std::time::Duration;

/// Default suspension-point timeout for network reads (spec §5).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);

#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn submit(&self, serialized_tx: &[u8], target_endpoint: Option<&str>) -> Result<String, NetworkError>;
    async fn get_signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>, NetworkError>;
    async fn get_account_info(&self, pubkey: &Pubkey, commitment: Commitment) -> Result<Option<Vec<u8>>, NetworkError>;
    async fn get_multiple_accounts(&self, pubkeys: &[Pubkey], commitment: Commitment) -> Result<Vec<Option<Vec<u8>>>, NetworkError>;
    async fn get_latest_anchor(&self, commitment: Commitment) -> Result<Anchor, NetworkError>;
    async fn get_current_slot(&self, commitment: Commitment) -> Result<u64, NetworkError>;
    async fn get_slot_leaders(&self, start_slot: u64, count: u64) -> Result<Vec<Pubkey>, NetworkError>;

    /// Most recent transaction signatures involving `pubkey`, newest first.
    /// Not part of the minimal §6 surface (that list covers the hot
    /// streaming path); C11's fallback poller needs it to catch up after a
    /// stream outage, so it's carried here rather than bolted onto a
    /// separate trait.
    async fn get_signatures_for_address(&self, pubkey: &Pubkey, before: Option<&str>, limit: usize) -> Result<Vec<String>, NetworkError>;

    /// Fetches and normalizes a confirmed transaction by signature, in the
    /// same `RawTx` shape C5 emits, so C11 can feed it through C6-C10
    /// unmodified. Returns `Ok(None)` if the signature isn't found or isn't
    /// confirmed yet.
    async fn get_transaction(&self, signature: &str, trader_id: Pubkey) -> Result<Option<RawTx>, NetworkError>;
}

fn to_commitment_config(commitment: Commitment) -> CommitmentConfig {
    match commitment {
        Commitment::Processed => CommitmentConfig::processed(),
        Commitment::Confirmed => CommitmentConfig::confirmed(),
        Commitment::Finalized => CommitmentConfig::finalized(),
    }
}

/// Default `NetworkClient`: a thin async wrapper over `solana-rpc-client`,
/// one instance per configured RPC endpoint. `target_endpoint` selects a
/// direct-to-leader sender URL when C10 has one; falls back to the default
/// RPC client otherwise.
pub struct RpcNetworkClient {
    default_client: RpcClient,
}

impl RpcNetworkClient {
    pub fn new(rpc_url: String) -> Self {
        Self {
            default_client: RpcClient::new(rpc_url),
        }
    }

    fn client_for(&self, target_endpoint: Option<&str>) -> RpcClient {
        match target_endpoint {
            Some(url) => RpcClient::new(url.to_string()),
            None => RpcClient::new(self.default_client.url()),
        }
    }
}

#[async_trait]
impl NetworkClient for RpcNetworkClient {
    async fn submit(&self, serialized_tx: &[u8], target_endpoint: Option<&str>) -> Result<String, NetworkError> {
        let client = self.client_for(target_endpoint);
        let tx: solana_transaction::versioned::VersionedTransaction = bincode::deserialize(serialized_tx)
            .map_err(|e| NetworkError::SubmitFailed(e.to_string()))?;
        client
            .send_transaction(&tx)
            .await
            .map(|sig| sig.to_string())
            .map_err(|e| NetworkError::SubmitFailed(e.to_string()))
    }

    async fn get_signature_status(&self, signature: &str) -> Result<Option<SignatureStatus>, NetworkError> {
        let sig = solana_signature::Signature::from_str(signature)
            .map_err(|e| NetworkError::RpcFailed(e.to_string()))?;
        let statuses = self
            .default_client
            .get_signature_statuses(&[sig])
            .await
            .map_err(|e| NetworkError::RpcFailed(e.to_string()))?;

        Ok(statuses.value.into_iter().next().flatten().map(|status| SignatureStatus {
            commitment: status.confirmation_status.map(|c| match c {
                solana_transaction_status::TransactionConfirmationStatus::Processed => Commitment::Processed,
                solana_transaction_status::TransactionConfirmationStatus::Confirmed => Commitment::Confirmed,
                solana_transaction_status::TransactionConfirmationStatus::Finalized => Commitment::Finalized,
            }),
            err: status.err.map(|e| e.to_string()),
        }))
    }

    async fn get_account_info(&self, pubkey: &Pubkey, commitment: Commitment) -> Result<Option<Vec<u8>>, NetworkError> {
        let config = solana_rpc_client_api::config::RpcAccountInfoConfig {
            commitment: Some(to_commitment_config(commitment)),
            ..Default::default()
        };
        match self.default_client.get_account_with_config(pubkey, config).await {
            Ok(resp) => Ok(resp.value.map(|acc| acc.data)),
            Err(e) => Err(NetworkError::RpcFailed(e.to_string())),
        }
    }

    async fn get_multiple_accounts(&self, pubkeys: &[Pubkey], commitment: Commitment) -> Result<Vec<Option<Vec<u8>>>, NetworkError> {
        let config = solana_rpc_client_api::config::RpcAccountInfoConfig {
            commitment: Some(to_commitment_config(commitment)),
            ..Default::default()
        };
        let resp = self
            .default_client
            .get_multiple_accounts_with_config(pubkeys, config)
            .await
            .map_err(|e| NetworkError::RpcFailed(e.to_string()))?;
        Ok(resp.value.into_iter().map(|opt| opt.map(|acc| acc.data)).collect())
    }

    async fn get_latest_anchor(&self, commitment: Commitment) -> Result<Anchor, NetworkError> {
        let (blockhash, valid_until_height) = self
            .default_client
            .get_latest_blockhash_with_commitment(to_commitment_config(commitment))
            .await
            .map_err(|e| NetworkError::RpcFailed(e.to_string()))?;
        Ok(Anchor {
            blockhash: blockhash.to_string(),
            valid_until_height,
        })
    }

    async fn get_current_slot(&self, commitment: Commitment) -> Result<u64, NetworkError> {
        self.default_client
            .get_slot_with_commitment(to_commitment_config(commitment))
            .await
            .map_err(|e| NetworkError::RpcFailed(e.to_string()))
    }

    async fn get_slot_leaders(&self, start_slot: u64, count: u64) -> Result<Vec<Pubkey>, NetworkError> {
        self.default_client
            .get_slot_leaders(start_slot, count)
            .await
            .map_err(|e| NetworkError::RpcFailed(e.to_string()))
    }

    async fn get_signatures_for_address(&self, pubkey: &Pubkey, before: Option<&str>, limit: usize) -> Result<Vec<String>, NetworkError> {
        let config = solana_rpc_client_api::config::GetConfirmedSignaturesForAddress2Config {
            before: before.and_then(|s| solana_signature::Signature::from_str(s).ok()),
            until: None,
            limit: Some(limit),
            commitment: Some(to_commitment_config(Commitment::Confirmed)),
        };
        let statuses = self
            .default_client
            .get_signatures_for_address_with_config(pubkey, config)
            .await
            .map_err(|e| NetworkError::RpcFailed(e.to_string()))?;
        Ok(statuses.into_iter().map(|s| s.signature).collect())
    }

    async fn get_transaction(&self, signature: &str, trader_id: Pubkey) -> Result<Option<RawTx>, NetworkError> {
        let sig = solana_signature::Signature::from_str(signature).map_err(|e| NetworkError::RpcFailed(e.to_string()))?;
        let config = solana_rpc_client_api::config::RpcTransactionConfig {
            encoding: Some(solana_transaction_status::UiTransactionEncoding::Base64),
            commitment: Some(to_commitment_config(Commitment::Confirmed)),
            max_supported_transaction_version: Some(0),
        };
        let resp = match self.default_client.get_transaction_with_config(&sig, config).await {
            Ok(resp) => resp,
            Err(e) => return Err(NetworkError::RpcFailed(e.to_string())),
        };
        Ok(normalize_encoded_transaction(resp, signature, trader_id))
    }
}

/// Rebuilds a `RawTx` from an RPC-fetched confirmed transaction. Mirrors
/// `ingress::normalize`'s delta-extraction shape but against the
/// RPC-client's `UiTransactionStatusMeta` (its balances are wrapped in
/// `OptionSerializer`, not plain `Option`) instead of carbon-core's
/// decoded `TransactionStatusMeta`.
fn normalize_encoded_transaction(
    resp: solana_transaction_status::EncodedConfirmedTransactionWithStatusMeta,
    signature: &str,
    trader_id: Pubkey,
) -> Option<RawTx> {
    let meta = resp.transaction.meta?;
    let decoded = resp.transaction.transaction.decode()?;
    let message = decoded.message;
    let account_keys: Vec<Pubkey> = message.static_account_keys().to_vec();

    let mut native_deltas = Vec::new();
    for (idx, (pre, post)) in meta.pre_balances.iter().zip(meta.post_balances.iter()).enumerate() {
        let raw_change = (*post as i128) - (*pre as i128);
        if raw_change == 0 {
            continue;
        }
        native_deltas.push(BalanceDelta {
            account_index: idx,
            mint: NATIVE_MINT.to_string(),
            owner: account_keys.get(idx).copied(),
            raw_change,
            decimals: 9,
            is_native: true,
        });
    }

    let mut token_deltas = Vec::new();
    if let (OptionSerializer::Some(pre_balances), OptionSerializer::Some(post_balances)) = (&meta.pre_token_balances, &meta.post_token_balances) {
        for pre in pre_balances {
            let post = post_balances.iter().find(|p| p.account_index == pre.account_index);
            let pre_raw: u64 = pre.ui_token_amount.amount.parse().unwrap_or(0);
            let post_raw: u64 = post.map(|p| p.ui_token_amount.amount.parse().unwrap_or(0)).unwrap_or(0);
            let raw_change = (post_raw as i128) - (pre_raw as i128);
            if raw_change == 0 {
                continue;
            }
            let idx = pre.account_index as usize;
            let owner = match &pre.owner {
                OptionSerializer::Some(owner) => Pubkey::from_str(owner).ok(),
                _ => account_keys.get(idx).copied(),
            };
            token_deltas.push(BalanceDelta { account_index: idx, mint: pre.mint.clone(), owner, raw_change, decimals: pre.ui_token_amount.decimals, is_native: false });
        }
    }

    let instructions: Vec<RawInstruction> = message
        .instructions()
        .iter()
        .map(|ix| RawInstruction {
            program_id: account_keys.get(ix.program_id_index as usize).copied().unwrap_or_default(),
            accounts: ix
                .accounts
                .iter()
                .filter_map(|&idx| account_keys.get(idx as usize).map(|pubkey| crate::types::AccountRef { pubkey: *pubkey, is_signer: false, is_writable: true }))
                .collect(),
            data: ix.data.clone(),
        })
        .collect();

    Some(RawTx {
        signature: signature.to_string(),
        slot: resp.slot,
        trader_id,
        block_time: resp.block_time,
        account_keys,
        instructions,
        inner_instructions: vec![],
        err: meta.err.is_some(),
        native_deltas,
        token_deltas,
        observed_compute_unit_limit: None,
    })
}
