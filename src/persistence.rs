//! Persisted state layout (spec §6). Relational, key-queried entities
//! (users, traders-per-user, trading wallets with optional nonce
//! association, positions per (user, token), bounded withdrawal history) go
//! through `rusqlite`, the same way the teacher's `streamer_core::sqlite_writer`
//! and `streamer_core::blocklist_checker` persist their own key-queried
//! tables. The one purely-append, no-query log this crate keeps — a
//! durable-nonce cache refresh marker — stays on the teacher's plain-JSON
//! snapshot pattern (`persistence.rs::save_snapshot`/`load_snapshot`), since
//! that's the same shape of data the teacher used JSON for.

use crate::error::PersistenceError;
use crate::types::{NonceAccount, Position, TraderSubscription, UserTradingConfig};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use solana_pubkey::Pubkey;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

const MAX_WITHDRAWAL_HISTORY: usize = 100;

/// Wraps the single `rusqlite::Connection` in a `Mutex` the way the
/// teacher's `BlocklistChecker` does, so the same handle can be shared
/// across the operator's async call sites (sqlite itself is not async).
pub struct Store {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    pub user_id: String,
    pub mint: String,
    pub amount_raw: u128,
    pub destination: String,
    pub ts: i64,
}

impl Store {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;

             CREATE TABLE IF NOT EXISTS users (
                 user_id TEXT PRIMARY KEY
             );

             CREATE TABLE IF NOT EXISTS traders (
                 user_id      TEXT NOT NULL,
                 wallet       TEXT NOT NULL,
                 display_name TEXT NOT NULL,
                 active       INTEGER NOT NULL DEFAULT 1,
                 PRIMARY KEY (user_id, wallet)
             );

             CREATE TABLE IF NOT EXISTS trading_wallets (
                 user_id          TEXT PRIMARY KEY,
                 trading_key      TEXT NOT NULL,
                 encrypted_secret BLOB NOT NULL,
                 scale_factor     REAL NOT NULL DEFAULT 1.0,
                 slippage_bps     INTEGER NOT NULL DEFAULT 100,
                 nonce_pubkey     TEXT,
                 nonce_authority  TEXT,
                 nonce_current    TEXT
             );

             CREATE TABLE IF NOT EXISTS positions (
                 user_id        TEXT NOT NULL,
                 mint           TEXT NOT NULL,
                 amount_raw     TEXT NOT NULL,
                 sold_amount_raw TEXT NOT NULL,
                 native_spent   TEXT NOT NULL,
                 first_buy_ts   INTEGER NOT NULL,
                 last_update_ts INTEGER NOT NULL,
                 PRIMARY KEY (user_id, mint)
             );

             CREATE TABLE IF NOT EXISTS withdrawals (
                 id          INTEGER PRIMARY KEY AUTOINCREMENT,
                 user_id     TEXT NOT NULL,
                 mint        TEXT NOT NULL,
                 amount_raw  TEXT NOT NULL,
                 destination TEXT NOT NULL,
                 ts          INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_withdrawals_user_ts ON withdrawals(user_id, ts DESC);
             ",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE users (user_id TEXT PRIMARY KEY);
             CREATE TABLE traders (user_id TEXT NOT NULL, wallet TEXT NOT NULL, display_name TEXT NOT NULL, active INTEGER NOT NULL DEFAULT 1, PRIMARY KEY (user_id, wallet));
             CREATE TABLE trading_wallets (user_id TEXT PRIMARY KEY, trading_key TEXT NOT NULL, encrypted_secret BLOB NOT NULL, scale_factor REAL NOT NULL DEFAULT 1.0, slippage_bps INTEGER NOT NULL DEFAULT 100, nonce_pubkey TEXT, nonce_authority TEXT, nonce_current TEXT);
             CREATE TABLE positions (user_id TEXT NOT NULL, mint TEXT NOT NULL, amount_raw TEXT NOT NULL, sold_amount_raw TEXT NOT NULL, native_spent TEXT NOT NULL, first_buy_ts INTEGER NOT NULL, last_update_ts INTEGER NOT NULL, PRIMARY KEY (user_id, mint));
             CREATE TABLE withdrawals (id INTEGER PRIMARY KEY AUTOINCREMENT, user_id TEXT NOT NULL, mint TEXT NOT NULL, amount_raw TEXT NOT NULL, destination TEXT NOT NULL, ts INTEGER NOT NULL);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn add_user(&self, user_id: &str) -> Result<(), PersistenceError> {
        self.conn.lock().unwrap().execute("INSERT OR IGNORE INTO users (user_id) VALUES (?1)", params![user_id])?;
        Ok(())
    }

    pub fn add_trader(&self, user_id: &str, wallet: Pubkey, display_name: &str) -> Result<(), PersistenceError> {
        self.conn.lock().unwrap().execute(
            "INSERT OR REPLACE INTO traders (user_id, wallet, display_name, active) VALUES (?1, ?2, ?3, 1)",
            params![user_id, wallet.to_string(), display_name],
        )?;
        Ok(())
    }

    pub fn remove_trader(&self, user_id: &str, wallet: Pubkey) -> Result<(), PersistenceError> {
        self.conn
            .lock()
            .unwrap()
            .execute("DELETE FROM traders WHERE user_id = ?1 AND wallet = ?2", params![user_id, wallet.to_string()])?;
        Ok(())
    }

    pub fn set_trader_active(&self, user_id: &str, wallet: Pubkey, active: bool) -> Result<(), PersistenceError> {
        let rows = self.conn.lock().unwrap().execute(
            "UPDATE traders SET active = ?1 WHERE user_id = ?2 AND wallet = ?3",
            params![active as i64, user_id, wallet.to_string()],
        )?;
        if rows == 0 {
            return Err(PersistenceError::NotFound(format!("trader {wallet} for user {user_id}")));
        }
        Ok(())
    }

    pub fn traders_for_user(&self, user_id: &str) -> Result<Vec<TraderSubscription>, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT wallet, display_name, active FROM traders WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![user_id], |row| {
            let wallet: String = row.get(0)?;
            let display_name: String = row.get(1)?;
            let active: i64 = row.get(2)?;
            Ok((wallet, display_name, active))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (wallet, display_name, active) = row?;
            out.push(TraderSubscription {
                owner_user_id: user_id.to_string(),
                display_name,
                wallet: Pubkey::from_str(&wallet).map_err(|_| PersistenceError::NotFound(format!("malformed wallet {wallet}")))?,
                active: active != 0,
            });
        }
        Ok(out)
    }

    /// Every user actively subscribed to `wallet`. The orchestrator's entry
    /// point runs one observed transaction once per `(master, user)` pair
    /// returned here, per the multi-wallet attribution note in `DESIGN.md`.
    pub fn traders_for_user_by_wallet(&self, wallet: Pubkey) -> Result<Vec<String>, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT user_id FROM traders WHERE wallet = ?1 AND active = 1")?;
        let rows = stmt.query_map(params![wallet.to_string()], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// All `active` trader wallets across every user, the set C5 subscribes
    /// to and C12 iterates as candidate masters.
    pub fn all_active_wallets(&self) -> Result<Vec<Pubkey>, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT DISTINCT wallet FROM traders WHERE active = 1")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let wallet = row?;
            out.push(Pubkey::from_str(&wallet).map_err(|_| PersistenceError::NotFound(format!("malformed wallet {wallet}")))?);
        }
        Ok(out)
    }

    /// Every `(user_id, encrypted_secret)` pair currently on file, so C1's
    /// vault can be warmed at startup without the orchestrator needing to
    /// know about sqlite at all.
    pub fn all_encrypted_secrets(&self) -> Result<Vec<(String, Vec<u8>)>, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT user_id, encrypted_secret FROM trading_wallets")?;
        let rows = stmt.query_map([], |row| {
            let user_id: String = row.get(0)?;
            let secret: Vec<u8> = row.get(1)?;
            Ok((user_id, secret))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn upsert_trading_wallet(
        &self,
        user_id: &str,
        trading_key: Pubkey,
        encrypted_secret: &[u8],
        scale_factor: f64,
        slippage_bps: u16,
    ) -> Result<(), PersistenceError> {
        self.conn.lock().unwrap().execute(
            "INSERT INTO trading_wallets (user_id, trading_key, encrypted_secret, scale_factor, slippage_bps)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET trading_key = excluded.trading_key, encrypted_secret = excluded.encrypted_secret",
            params![user_id, trading_key.to_string(), encrypted_secret, scale_factor, slippage_bps],
        )?;
        Ok(())
    }

    pub fn set_scale_factor(&self, user_id: &str, scale_factor: f64) -> Result<(), PersistenceError> {
        let rows = self
            .conn
            .lock()
            .unwrap()
            .execute("UPDATE trading_wallets SET scale_factor = ?1 WHERE user_id = ?2", params![scale_factor, user_id])?;
        if rows == 0 {
            return Err(PersistenceError::NotFound(format!("trading wallet for user {user_id}")));
        }
        Ok(())
    }

    pub fn set_slippage_bps(&self, user_id: &str, slippage_bps: u16) -> Result<(), PersistenceError> {
        let rows = self
            .conn
            .lock()
            .unwrap()
            .execute("UPDATE trading_wallets SET slippage_bps = ?1 WHERE user_id = ?2", params![slippage_bps, user_id])?;
        if rows == 0 {
            return Err(PersistenceError::NotFound(format!("trading wallet for user {user_id}")));
        }
        Ok(())
    }

    pub fn set_nonce_account(&self, user_id: &str, nonce: &NonceAccount) -> Result<(), PersistenceError> {
        let rows = self.conn.lock().unwrap().execute(
            "UPDATE trading_wallets SET nonce_pubkey = ?1, nonce_authority = ?2, nonce_current = ?3 WHERE user_id = ?4",
            params![nonce.pubkey.to_string(), nonce.authority.to_string(), nonce.current_nonce, user_id],
        )?;
        if rows == 0 {
            return Err(PersistenceError::NotFound(format!("trading wallet for user {user_id}")));
        }
        Ok(())
    }

    pub fn user_trading_config(&self, user_id: &str) -> Result<UserTradingConfig, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT trading_key, scale_factor, slippage_bps, nonce_pubkey, nonce_authority, nonce_current
             FROM trading_wallets WHERE user_id = ?1",
            params![user_id],
            |row| {
                let trading_key: String = row.get(0)?;
                let scale_factor: f64 = row.get(1)?;
                let slippage_bps: i64 = row.get(2)?;
                let nonce_pubkey: Option<String> = row.get(3)?;
                let nonce_authority: Option<String> = row.get(4)?;
                let nonce_current: Option<String> = row.get(5)?;
                Ok((trading_key, scale_factor, slippage_bps, nonce_pubkey, nonce_authority, nonce_current))
            },
        )
        .optional()?
        .ok_or_else(|| PersistenceError::NotFound(format!("trading wallet for user {user_id}")))
        .and_then(|(trading_key, scale_factor, slippage_bps, nonce_pubkey, nonce_authority, nonce_current)| {
            let trading_key = Pubkey::from_str(&trading_key).map_err(|_| PersistenceError::NotFound("malformed trading_key".into()))?;
            let nonce_account = match (nonce_pubkey, nonce_authority, nonce_current) {
                (Some(p), Some(a), Some(c)) => Some(NonceAccount {
                    pubkey: Pubkey::from_str(&p).map_err(|_| PersistenceError::NotFound("malformed nonce_pubkey".into()))?,
                    authority: Pubkey::from_str(&a).map_err(|_| PersistenceError::NotFound("malformed nonce_authority".into()))?,
                    current_nonce: c,
                }),
                _ => None,
            };
            Ok(UserTradingConfig { user_id: user_id.to_string(), trading_key, scale_factor, slippage_bps: slippage_bps as u16, nonce_account })
        })
    }

    pub fn get_position(&self, user_id: &str, mint: &str) -> Result<Position, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT amount_raw, sold_amount_raw, native_spent, first_buy_ts, last_update_ts FROM positions WHERE user_id = ?1 AND mint = ?2",
            params![user_id, mint],
            |row| {
                let amount_raw: String = row.get(0)?;
                let sold_amount_raw: String = row.get(1)?;
                let native_spent: String = row.get(2)?;
                let first_buy_ts: i64 = row.get(3)?;
                let last_update_ts: i64 = row.get(4)?;
                Ok((amount_raw, sold_amount_raw, native_spent, first_buy_ts, last_update_ts))
            },
        )
        .optional()?
        .map(|(amount_raw, sold_amount_raw, native_spent, first_buy_ts, last_update_ts)| Position {
            amount_raw: amount_raw.parse().unwrap_or(0),
            sold_amount_raw: sold_amount_raw.parse().unwrap_or(0),
            native_spent: native_spent.parse().unwrap_or(0),
            first_buy_ts,
            last_update_ts,
        })
        .map(Ok)
        .unwrap_or_else(|| Ok(Position::default()))
    }

    /// Applies a signed token delta to a position, serialized through this
    /// connection's mutex so concurrent buy/sell confirmations for the same
    /// (user, mint) never interleave a read-modify-write (spec §5's
    /// "no lost-update window" guarantee, here backed by sqlite rather than
    /// C4, since positions are a persisted entity not ephemeral state).
    pub fn apply_token_delta(
        &self,
        user_id: &str,
        mint: &str,
        token_delta_raw: i128,
        native_spent_delta_raw: u128,
        now_ts: i64,
    ) -> Result<Position, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let mut current = conn
            .query_row(
                "SELECT amount_raw, sold_amount_raw, native_spent, first_buy_ts FROM positions WHERE user_id = ?1 AND mint = ?2",
                params![user_id, mint],
                |row| {
                    let amount_raw: String = row.get(0)?;
                    let sold_amount_raw: String = row.get(1)?;
                    let native_spent: String = row.get(2)?;
                    let first_buy_ts: i64 = row.get(3)?;
                    Ok((amount_raw.parse::<u128>().unwrap_or(0), sold_amount_raw.parse::<u128>().unwrap_or(0), native_spent.parse::<u128>().unwrap_or(0), first_buy_ts))
                },
            )
            .optional()?
            .unwrap_or((0, 0, 0, now_ts));

        if token_delta_raw >= 0 {
            current.0 += token_delta_raw as u128;
        } else {
            let sold = token_delta_raw.unsigned_abs();
            current.0 = current.0.saturating_sub(sold);
            current.1 += sold;
        }
        current.2 += native_spent_delta_raw;

        conn.execute(
            "INSERT INTO positions (user_id, mint, amount_raw, sold_amount_raw, native_spent, first_buy_ts, last_update_ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, mint) DO UPDATE SET amount_raw = excluded.amount_raw, sold_amount_raw = excluded.sold_amount_raw,
                native_spent = excluded.native_spent, last_update_ts = excluded.last_update_ts",
            params![user_id, mint, current.0.to_string(), current.1.to_string(), current.2.to_string(), current.3, now_ts],
        )?;

        Ok(Position { amount_raw: current.0, sold_amount_raw: current.1, native_spent: current.2, first_buy_ts: current.3, last_update_ts: now_ts })
    }

    /// Records a withdrawal and trims the history to the most recent 100
    /// per spec §6.
    pub fn record_withdrawal(&self, record: &WithdrawalRecord) -> Result<(), PersistenceError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO withdrawals (user_id, mint, amount_raw, destination, ts) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![record.user_id, record.mint, record.amount_raw.to_string(), record.destination, record.ts],
        )?;
        conn.execute(
            "DELETE FROM withdrawals WHERE user_id = ?1 AND id NOT IN (
                SELECT id FROM withdrawals WHERE user_id = ?1 ORDER BY ts DESC LIMIT ?2
             )",
            params![record.user_id, MAX_WITHDRAWAL_HISTORY as i64],
        )?;
        Ok(())
    }

    pub fn withdrawal_history(&self, user_id: &str) -> Result<Vec<WithdrawalRecord>, PersistenceError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached("SELECT mint, amount_raw, destination, ts FROM withdrawals WHERE user_id = ?1 ORDER BY ts DESC LIMIT ?2")?;
        let rows = stmt.query_map(params![user_id, MAX_WITHDRAWAL_HISTORY as i64], |row| {
            let mint: String = row.get(0)?;
            let amount_raw: String = row.get(1)?;
            let destination: String = row.get(2)?;
            let ts: i64 = row.get(3)?;
            Ok(WithdrawalRecord { user_id: user_id.to_string(), mint, amount_raw: amount_raw.parse().unwrap_or(0), destination, ts })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Durable-nonce cache refresh marker: a purely-append, no-query log of
/// "last time we refreshed the on-chain nonce value for this account,"
/// kept on the teacher's plain-JSON snapshot shape rather than a table,
/// since nothing ever queries it by key.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NonceRefreshMarker {
    pub nonce_pubkey: String,
    pub last_refreshed_ts: i64,
    pub last_known_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct NonceCacheSnapshot {
    markers: Vec<NonceRefreshMarker>,
}

pub fn save_nonce_cache(markers: &[NonceRefreshMarker], file_path: &str) -> Result<(), PersistenceError> {
    let snapshot = NonceCacheSnapshot { markers: markers.to_vec() };
    let json = serde_json::to_string_pretty(&snapshot)?;
    std::fs::write(file_path, json)?;
    log::debug!("saved {} nonce refresh markers to {}", snapshot.markers.len(), file_path);
    Ok(())
}

pub fn load_nonce_cache(file_path: &str) -> Result<Vec<NonceRefreshMarker>, PersistenceError> {
    if !Path::new(file_path).exists() {
        log::info!("no existing nonce cache file found: {}", file_path);
        return Ok(Vec::new());
    }
    let json = std::fs::read_to_string(file_path)?;
    let snapshot: NonceCacheSnapshot = serde_json::from_str(&json)?;
    log::info!("loaded {} nonce refresh markers from {}", snapshot.markers.len(), file_path);
    Ok(snapshot.markers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_trader_then_traders_for_user_round_trips() {
        let store = Store::in_memory().unwrap();
        store.add_user("alice").unwrap();
        let wallet = Pubkey::new_unique();
        store.add_trader("alice", wallet, "whale-1").unwrap();
        let traders = store.traders_for_user("alice").unwrap();
        assert_eq!(traders.len(), 1);
        assert_eq!(traders[0].wallet, wallet);
        assert!(traders[0].active);
    }

    #[test]
    fn deactivated_trader_is_excluded_from_active_wallets() {
        let store = Store::in_memory().unwrap();
        store.add_user("alice").unwrap();
        let wallet = Pubkey::new_unique();
        store.add_trader("alice", wallet, "whale-1").unwrap();
        store.set_trader_active("alice", wallet, false).unwrap();
        assert!(store.all_active_wallets().unwrap().is_empty());
    }

    #[test]
    fn apply_token_delta_accumulates_buy_then_clamps_on_sell() {
        let store = Store::in_memory().unwrap();
        let pos = store.apply_token_delta("alice", "MintA", 1_000, 500_000, 1).unwrap();
        assert_eq!(pos.amount_raw, 1_000);
        let pos = store.apply_token_delta("alice", "MintA", -400, 0, 2).unwrap();
        assert_eq!(pos.amount_raw, 600);
        assert_eq!(pos.sold_amount_raw, 400);
    }

    #[test]
    fn oversized_sell_delta_clamps_position_to_zero_rather_than_underflowing() {
        let store = Store::in_memory().unwrap();
        store.apply_token_delta("alice", "MintA", 100, 0, 1).unwrap();
        let pos = store.apply_token_delta("alice", "MintA", -10_000, 0, 2).unwrap();
        assert_eq!(pos.amount_raw, 0);
    }

    #[test]
    fn withdrawal_history_is_bounded_to_max_and_newest_first() {
        let store = Store::in_memory().unwrap();
        for i in 0..(MAX_WITHDRAWAL_HISTORY + 10) {
            store
                .record_withdrawal(&WithdrawalRecord { user_id: "alice".into(), mint: "MintA".into(), amount_raw: 1, destination: "dest".into(), ts: i as i64 })
                .unwrap();
        }
        let history = store.withdrawal_history("alice").unwrap();
        assert_eq!(history.len(), MAX_WITHDRAWAL_HISTORY);
        assert_eq!(history[0].ts, (MAX_WITHDRAWAL_HISTORY + 9) as i64);
    }

    #[test]
    fn user_trading_config_roundtrips_without_nonce() {
        let store = Store::in_memory().unwrap();
        let trading_key = Pubkey::new_unique();
        store.upsert_trading_wallet("alice", trading_key, b"encrypted", 0.5, 100).unwrap();
        let cfg = store.user_trading_config("alice").unwrap();
        assert_eq!(cfg.trading_key, trading_key);
        assert_eq!(cfg.scale_factor, 0.5);
        assert!(cfg.nonce_account.is_none());
    }
}
