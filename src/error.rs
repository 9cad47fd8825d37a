//! Typed error enums, one per component boundary (spec §7). Nothing crosses
//! a component boundary as a raw `Box<dyn Error>`; the teacher's hand-rolled
//! `ClientError`/`ConfigError` pattern (`streamer_core/error_handler.rs`,
//! `streamer_core/config.rs`) is kept but expressed with `thiserror` since
//! this crate has many more boundaries than the teacher did.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVariable(String),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

/// C1 — Key/Nonce Vault.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("decryption failed")]
    DecryptFailed,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("no trading key registered for user {0}")]
    UnknownUser(String),
    #[error("malformed key material")]
    MalformedKey,
}

/// C2 — Network Client.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("rpc call timed out")]
    Timeout,
    #[error("rpc call failed: {0}")]
    RpcFailed(String),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("submit failed: {0}")]
    SubmitFailed(String),
}

/// C3 — Leader Tracker.
#[derive(Debug, Error)]
pub enum LeaderError {
    #[error("leader schedule unavailable: {0}")]
    ScheduleUnavailable(String),
    #[error("slot subscription dropped")]
    SubscriptionDropped,
}

/// C4 — State Store.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("key already held: {0}")]
    AlreadyHeld(String),
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}

/// C5 — Stream Ingress.
#[derive(Debug, Error)]
pub enum IngressError {
    #[error("stream degraded: {0}")]
    StreamDegraded(String),
    #[error("resync failed: {0}")]
    ResyncFailed(String),
    #[error("instruction references an out-of-range account index")]
    AccountIndexOutOfRange,
}

/// C6 — Golden Filter rejection reasons. Not really "errors" (§7 calls for
/// drop-silently-count-metric), but kept as a typed value per the
/// no-exceptions-for-control-flow rule.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    #[error("transaction reported an on-chain error")]
    OnChainError,
    #[error("transaction older than the freshness horizon")]
    TooOld,
    #[error("native balance delta below MIN_NATIVE_DELTA")]
    BelowMinDelta,
    #[error("no token balance change owned by the master wallet")]
    NoOwnerTokenChange,
    #[error("mint is on the operator blocklist")]
    Blocklisted,
}

/// C7 — Economic Analyzer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerError {
    #[error("balance deltas do not resolve to an unambiguous trade")]
    Ambiguous,
}

/// C8 — Instruction Locator.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LocatorError {
    #[error("no instruction in the transaction references the master wallet")]
    NoCore,
    #[error("instruction account index out of range of the full account key array")]
    AccountIndexOutOfRange,
}

/// C9 — Universal Cloner.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClonerError {
    #[error("core instruction platform tag is unknown")]
    UnknownPlatform,
    #[error("account index out of range while rewriting instruction")]
    AccountIndexOutOfRange,
    #[error("failed to derive an associated token account")]
    AtaDeriveFailed,
    #[error("failed to read current nonce value: {0}")]
    NonceReadFailed(String),
}

/// C10 — Dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("submit failed: {0}")]
    SubmitFailed(String),
    #[error("confirmation timed out")]
    ConfirmTimeout,
    #[error("transaction confirmed with an on-chain error: {0}")]
    ConfirmedOnChainError(String),
}

/// C12 — Pipeline Orchestrator rejection reasons.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorReject {
    #[error("duplicate signature within the dedup window")]
    Duplicate,
    #[error("a buy for this output mint is already in flight")]
    DuplicateInFlight,
    #[error("intent amount below MIN_BUY_NATIVE")]
    TooSmall,
    #[error("no position to sell from")]
    PositionMissing,
}

/// Persistence layer (AMBIENT-5).
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("entity not found: {0}")]
    NotFound(String),
}

/// Operator action surface (§6 upward interface).
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Ingress(#[from] IngressError),
    #[error("trader {0} not found for user {1}")]
    TraderNotFound(String, String),
    #[error("invalid scale factor: {0} (must be in (0, 1])")]
    InvalidScaleFactor(f64),
    #[error("insufficient balance for withdrawal")]
    InsufficientBalance,
}
