//! Data model shared across every pipeline component.
//!
//! These types are the normalized currency the pipeline passes between
//! components (C5 -> C6 -> C7 -> C8 -> C9 -> C10 -> C12); none of them touch
//! carbon-core or yellowstone-proto types directly so downstream components
//! don't need to know which data source produced them.

use serde::{Deserialize, Serialize};
use solana_pubkey::Pubkey;
use std::collections::HashMap;

/// Native mint placeholder (wrapped SOL analogue). Treated as "the native
/// token" throughout the economic analyzer and cloner.
pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";

/// A single per-account balance change observed between pre/post transaction
/// state. Produced by C5's normalization step, consumed by C7.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceDelta {
    pub account_index: usize,
    pub mint: String,
    pub owner: Option<Pubkey>,
    pub raw_change: i128,
    pub decimals: u8,
    pub is_native: bool,
}

impl BalanceDelta {
    pub fn is_inflow(&self) -> bool {
        self.raw_change > 0
    }

    pub fn is_outflow(&self) -> bool {
        self.raw_change < 0
    }
}

/// An account reference inside a [`CoreInstruction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountRef {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

/// A single instruction as it appeared on-chain, plus everything C8 derived
/// about it for C9 to act on.
#[derive(Debug, Clone)]
pub struct RawInstruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountRef>,
    pub data: Vec<u8>,
}

/// Normalized event emitted by C5 for every transaction touching a
/// subscribed master wallet.
#[derive(Debug, Clone)]
pub struct RawTx {
    pub signature: String,
    pub slot: u64,
    pub trader_id: Pubkey,
    pub block_time: Option<i64>,
    pub account_keys: Vec<Pubkey>,
    pub instructions: Vec<RawInstruction>,
    pub inner_instructions: Vec<(usize, Vec<RawInstruction>)>,
    pub err: bool,
    pub native_deltas: Vec<BalanceDelta>,
    pub token_deltas: Vec<BalanceDelta>,
    pub observed_compute_unit_limit: Option<u32>,
}

/// `trade_type` of a [`TradeIntent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeType {
    Buy,
    Sell,
    Swap,
}

/// Normalized output of the Economic Analyzer (C7).
#[derive(Debug, Clone, PartialEq)]
pub struct TradeIntent {
    pub trade_type: TradeType,
    pub input_mint: String,
    pub output_mint: String,
    pub input_amount_raw: u64,
    pub output_amount_raw: u64,
    pub trader_id: Pubkey,
    pub token_decimals: u8,
    pub signature: String,
    pub slot: u64,
    pub observed_compute_unit_limit: Option<u32>,
}

impl TradeIntent {
    pub fn is_native(mint: &str) -> bool {
        mint == NATIVE_MINT
    }
}

/// Closed set of venues the cloner knows how to rewrite. `Unknown` always
/// produces an `UnknownPlatform` failure in C9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformTag {
    PumpfunBc,
    PumpfunAmm,
    RaydiumV4,
    RaydiumClmm,
    RaydiumLaunchpad,
    MeteoraDlmm,
    MeteoraDbc,
    OrcaWhirlpool,
    JupiterRouter,
    Unknown,
}

impl PlatformTag {
    pub fn is_known(self) -> bool {
        !matches!(self, PlatformTag::Unknown)
    }

    pub fn is_bonding_curve(self) -> bool {
        matches!(self, PlatformTag::PumpfunBc)
    }
}

/// Output of the Instruction Locator (C8), input to the Universal Cloner (C9).
#[derive(Debug, Clone)]
pub struct CoreInstruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountRef>,
    pub data: Vec<u8>,
    pub platform_tag: PlatformTag,
    pub instruction_index: usize,
}

/// An instruction ready to be placed in a [`ClonedTransaction`].
#[derive(Debug, Clone)]
pub struct BuiltInstruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountRef>,
    pub data: Vec<u8>,
}

/// Anchor a cloned transaction is submitted against.
#[derive(Debug, Clone)]
pub enum RecentAnchor {
    Blockhash { blockhash: String, valid_until_height: u64 },
    Nonce { nonce_pubkey: Pubkey, current_nonce: String },
}

/// Output of the Universal Cloner (C9).
#[derive(Debug, Clone)]
pub struct ClonedTransaction {
    pub instructions: Vec<BuiltInstruction>,
    pub recent_anchor: RecentAnchor,
    pub signers: Vec<Pubkey>,
    pub compute_unit_limit: u32,
    pub priority_fee_micro_lamports: u64,
    pub platform_tag: PlatformTag,
}

impl ClonedTransaction {
    pub fn uses_nonce(&self) -> bool {
        matches!(self.recent_anchor, RecentAnchor::Nonce { .. })
    }
}

/// Per (user, token) accounting record, owned exclusively by C4.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Position {
    pub amount_raw: u128,
    pub sold_amount_raw: u128,
    pub native_spent: u128,
    pub first_buy_ts: i64,
    pub last_update_ts: i64,
}

impl Position {
    pub fn is_empty(&self) -> bool {
        self.amount_raw == 0
    }
}

/// Per-master subscription record, owned by the persistence layer and
/// mirrored into C5's subscribed set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderSubscription {
    pub owner_user_id: String,
    pub display_name: String,
    pub wallet: Pubkey,
    pub active: bool,
}

/// Per trading-key durable nonce account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceAccount {
    pub pubkey: Pubkey,
    pub authority: Pubkey,
    pub current_nonce: String,
}

/// Per-user trading configuration the orchestrator and cloner consult.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTradingConfig {
    pub user_id: String,
    pub trading_key: Pubkey,
    pub scale_factor: f64,
    pub slippage_bps: u16,
    pub nonce_account: Option<NonceAccount>,
}

/// Result of a C10 dispatch attempt.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub success: bool,
    pub signature: Option<String>,
    pub latency_ms: u64,
    pub target: String,
    pub err: Option<String>,
}

/// A dedup key: `(master, signature)`.
pub type DedupKey = (Pubkey, String);

/// Map of token mint to signed balance delta, keyed by owner match, used
/// internally by C7.
pub type MintDeltaMap = HashMap<String, i128>;

/// Commitment levels accepted by C2's network operations (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

/// `get_latest_anchor` result.
#[derive(Debug, Clone)]
pub struct Anchor {
    pub blockhash: String,
    pub valid_until_height: u64,
}

/// `get_signature_status` result.
#[derive(Debug, Clone)]
pub struct SignatureStatus {
    pub commitment: Option<Commitment>,
    pub err: Option<String>,
}
