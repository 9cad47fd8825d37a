//! C1 — Key/Nonce Vault. Owns every user trading keypair and every durable
//! nonce keypair; nothing outside this module ever sees decrypted key bytes
//! except as the short-lived `&Keypair` references C9/C10 borrow for the
//! duration of a single dispatch (spec §5 "Shared-resource policy").

use crate::error::VaultError;
use crate::types::NonceAccount;
use crate::vault::secret_store::SecretStore;
use dashmap::DashMap;
use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use solana_signer::Signer;
use std::sync::Arc;

/// A decrypted trading key plus its associated durable nonce, if any. Built
/// fresh from encrypted storage on every call that needs it and dropped
/// (zeroizing the underlying keypair bytes) as soon as the borrow ends.
pub struct TradingMaterial {
    pub keypair: Keypair,
    pub nonce: Option<NonceAccount>,
}

/// C1's in-memory registry: `user_id -> encrypted key blob`. The blob is only
/// ever decrypted for the lifetime of a single `material_for` call.
pub struct KeyVault {
    store: Arc<dyn SecretStore>,
    encrypted_keys: DashMap<String, Vec<u8>>,
    nonce_accounts: DashMap<String, NonceAccount>,
}

impl KeyVault {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            encrypted_keys: DashMap::new(),
            nonce_accounts: DashMap::new(),
        }
    }

    /// Registers a user's trading key from its already-encrypted form (as
    /// read back from persistence). The plaintext secret key never passes
    /// through this call.
    pub fn register_encrypted(&self, user_id: &str, encrypted_blob: Vec<u8>) {
        self.encrypted_keys.insert(user_id.to_string(), encrypted_blob);
    }

    /// Encrypts `secret_key_bytes` with the configured secret store and
    /// registers the result under `user_id`. Used by the operator's
    /// `add_trader`-adjacent wallet-import path.
    pub fn import_plaintext(&self, user_id: &str, secret_key_bytes: &[u8]) -> Result<(), VaultError> {
        let blob = self.store.encrypt(secret_key_bytes)?;
        self.encrypted_keys.insert(user_id.to_string(), blob);
        Ok(())
    }

    pub fn set_nonce_account(&self, user_id: &str, nonce: NonceAccount) {
        self.nonce_accounts.insert(user_id.to_string(), nonce);
    }

    pub fn clear_nonce_account(&self, user_id: &str) {
        self.nonce_accounts.remove(user_id);
    }

    pub fn trading_pubkey(&self, user_id: &str) -> Result<Pubkey, VaultError> {
        let material = self.material_for(user_id)?;
        Ok(material.keypair.pubkey())
    }

    /// Decrypts the user's trading key on demand. The returned keypair's
    /// scope should be as narrow as possible; callers must not retain it
    /// past the single dispatch that needed it.
    pub fn material_for(&self, user_id: &str) -> Result<TradingMaterial, VaultError> {
        let blob = self
            .encrypted_keys
            .get(user_id)
            .ok_or_else(|| VaultError::UnknownUser(user_id.to_string()))?;
        let secret_bytes = self.store.decrypt(&blob)?;
        let keypair = Keypair::try_from(secret_bytes.as_slice()).map_err(|_| VaultError::MalformedKey)?;
        let nonce = self.nonce_accounts.get(user_id).map(|n| n.clone());
        Ok(TradingMaterial { keypair, nonce })
    }
}
