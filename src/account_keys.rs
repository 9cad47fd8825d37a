//! Builds the full account-key array for a transaction (static keys plus any
//! address-lookup-table extensions) and the signer/writable flags that go
//! with each index. Generalizes the teacher's
//! `trade_extractor::build_full_account_keys`, which only needed the key
//! list; C8's `CoreInstruction.accounts` additionally needs `is_signer`/
//! `is_writable` per spec §3, which the teacher never computed because it
//! only scans for program-id matches (`instruction_scanner.rs`).

use carbon_core::transaction::TransactionMetadata;
use solana_pubkey::Pubkey;
use solana_transaction_status::TransactionStatusMeta;
use std::sync::Arc;

/// Resolved account reference: index, key, and the flags `CoreInstruction`
/// needs to reproduce them faithfully in the cloned transaction.
#[derive(Debug, Clone, Copy)]
pub struct KeyFlags {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

/// Concatenates static message keys with ALT writable/readonly extensions,
/// same ordering the teacher relies on (`static || alt_writable || alt_readonly`).
pub fn build_full_account_keys(metadata: &Arc<TransactionMetadata>, meta: &TransactionStatusMeta) -> Vec<Pubkey> {
    let message = &metadata.message;
    let mut keys = message.static_account_keys().to_vec();
    keys.extend(meta.loaded_addresses.writable.iter().cloned());
    keys.extend(meta.loaded_addresses.readonly.iter().cloned());
    keys
}

/// Same key list, annotated with per-index signer/writable flags derived
/// from the message header plus the ALT partition (ALT writable entries are
/// writable-non-signer by construction; ALT readonly entries are
/// readonly-non-signer by construction — a table lookup can never add a
/// signer).
pub fn build_full_account_flags(metadata: &Arc<TransactionMetadata>, meta: &TransactionStatusMeta) -> Vec<KeyFlags> {
    let message = &metadata.message;
    let header = message.header();
    let static_keys = message.static_account_keys();
    let static_count = static_keys.len();
    let num_required_signatures = header.num_required_signatures as usize;
    let num_readonly_signed = header.num_readonly_signed_accounts as usize;
    let num_readonly_unsigned = header.num_readonly_unsigned_accounts as usize;

    let mut flags = Vec::with_capacity(
        static_count + meta.loaded_addresses.writable.len() + meta.loaded_addresses.readonly.len(),
    );

    for (idx, pubkey) in static_keys.iter().enumerate() {
        let is_signer = idx < num_required_signatures;
        let is_writable = if is_signer {
            idx < num_required_signatures.saturating_sub(num_readonly_signed)
        } else {
            idx < static_count.saturating_sub(num_readonly_unsigned)
        };
        flags.push(KeyFlags { pubkey: *pubkey, is_signer, is_writable });
    }

    for pubkey in meta.loaded_addresses.writable.iter() {
        flags.push(KeyFlags { pubkey: *pubkey, is_signer: false, is_writable: true });
    }
    for pubkey in meta.loaded_addresses.readonly.iter() {
        flags.push(KeyFlags { pubkey: *pubkey, is_signer: false, is_writable: false });
    }

    flags
}

#[cfg(test)]
mod tests {
    // Exercised indirectly by locator/analyzer tests, which construct
    // `RawTx` fixtures directly rather than real `TransactionMetadata`
    // values (carbon-core's type has no public constructor suited to unit
    // tests outside the crate).
}
