//! Account substitution: the four ordered rules of spec §4.5. Pure and
//! synchronous — no network I/O here. The async precheck (does the user's
//! ATA already exist?) lives in `builder`, which is the only part of the
//! cloner that talks to C2.

use super::platform::user_derived_seed_tag;
use crate::types::{AccountRef, PlatformTag};
use solana_pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address;

/// One substitution applied to a single account reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Substitution {
    /// Exact match on the master wallet (rule 1).
    MasterWallet,
    /// Associated token account for `mint`, owned by the user (rule 2).
    AssociatedTokenAccount { mint: Pubkey },
    /// User-derived PDA recomputed with the user's key in place of the
    /// master's (rule 3).
    UserDerivedPda,
    /// Passed through byte-identical (rule 4).
    PassThrough,
}

/// Applies the four substitution rules to every account of the core
/// instruction, in order, and returns the rewritten account list alongside
/// which mints need an associated-account existence check.
pub fn substitute(
    accounts: &[AccountRef],
    program_id: Pubkey,
    platform_tag: PlatformTag,
    master: Pubkey,
    user: Pubkey,
    observed_mints: &[Pubkey],
) -> Vec<(AccountRef, Substitution)> {
    accounts
        .iter()
        .map(|account| {
            if account.pubkey == master {
                return (AccountRef { pubkey: user, ..*account }, Substitution::MasterWallet);
            }

            if let Some(mint) = observed_mints.iter().find(|mint| get_associated_token_address(&master, mint) == account.pubkey) {
                let user_ata = get_associated_token_address(&user, mint);
                return (AccountRef { pubkey: user_ata, ..*account }, Substitution::AssociatedTokenAccount { mint: *mint });
            }

            if let Some(seed_tag) = user_derived_seed_tag(program_id, platform_tag) {
                let (master_pda, _) = Pubkey::find_program_address(&[seed_tag, master.as_ref()], &program_id);
                if master_pda == account.pubkey {
                    let (user_pda, _) = Pubkey::find_program_address(&[seed_tag, user.as_ref()], &program_id);
                    return (AccountRef { pubkey: user_pda, ..*account }, Substitution::UserDerivedPda);
                }
            }

            (*account, Substitution::PassThrough)
        })
        .collect()
}

/// Associated token accounts the substituted instruction now references,
/// in the deterministic `input_mint, then output_mint` order spec §4.5
/// requires for create-instruction emission.
pub fn required_atas(input_mint: Pubkey, output_mint: Pubkey, user: Pubkey) -> Vec<(Pubkey, Pubkey)> {
    vec![(input_mint, get_associated_token_address(&user, &input_mint)), (output_mint, get_associated_token_address(&user, &output_mint))]
}
