//! C1 — Key/Nonce Vault. Owns user signing keys and durable-nonce keypairs;
//! provides signed material on demand (spec §2, §3, §5).

pub mod keypair_store;
pub mod secret_store;

pub use keypair_store::{KeyVault, TradingMaterial};
pub use secret_store::{AesGcmSecretStore, SecretStore};
