//! C9 — Universal Cloner (spec §4.5). Rewrites a [`CoreInstruction`]
//! observed on the master's transaction into one or more instructions that
//! perform the equivalent trade for the local user, and assembles the
//! unsigned [`ClonedTransaction`] around it (ATA precheck, nonce wiring).
//!
//! Grounded on `other_examples/.../ronaldslwong-copyrust::build_tx::tx_builder`
//! (nonce blockhash read, instruction assembly order) and
//! `other_examples/.../0xfnzero-sol-trade-sdk` (ATA-create-before-swap
//! ordering); the teacher has no counterpart since solflow never submits
//! anything.
//!
//! `compute_unit_limit` / `priority_fee_micro_lamports` on the returned
//! [`ClonedTransaction`] are left at `0` here — those are C10's pre-send
//! responsibility (spec §4.6) and are overwritten just before signing.

pub mod platform;
pub mod substitution;

use crate::error::ClonerError;
use crate::network::NetworkClient;
use crate::types::{AccountRef, BuiltInstruction, ClonedTransaction, Commitment, CoreInstruction, NonceAccount, PlatformTag, RecentAnchor, TradeIntent, TradeType, NATIVE_MINT};
use platform::amount_layout;
use solana_instruction::Instruction as SolanaInstruction;
use solana_pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address;
use std::str::FromStr;

fn from_solana_instruction(ix: SolanaInstruction) -> BuiltInstruction {
    BuiltInstruction {
        program_id: ix.program_id,
        accounts: ix.accounts.into_iter().map(|m| AccountRef { pubkey: m.pubkey, is_signer: m.is_signer, is_writable: m.is_writable }).collect(),
        data: ix.data,
    }
}

/// Overwrites the amount field(s) (and, where the layout describes one, the
/// min-out guard and track-volume flag) in `data` per spec §4.5.1. Leaves
/// the data untouched if the platform has no known layout.
///
/// Buy-side venues with a `max_cost_offset` (pump.fun bonding-curve/AMM) use
/// a two-field layout: `amount=0`, and the scaled native-in amount goes into
/// the separate max-cost/max-quote-in field instead. Sell-side and
/// single-field venues write the scaled amount straight into
/// `amount_offset` and zero the min-out guard.
fn rewrite_amount(data: &[u8], tag: PlatformTag, trade_type: TradeType, scaled_amount: u64) -> Vec<u8> {
    let mut out = data.to_vec();
    let Some(layout) = amount_layout(tag, trade_type) else {
        return out;
    };
    let bytes = scaled_amount.to_le_bytes();

    if let Some(cost_offset) = layout.max_cost_offset {
        if layout.amount_offset + 8 <= out.len() {
            out[layout.amount_offset..layout.amount_offset + 8].copy_from_slice(&0u64.to_le_bytes());
        }
        if cost_offset + 8 <= out.len() {
            out[cost_offset..cost_offset + 8].copy_from_slice(&bytes);
        }
    } else if layout.amount_offset + 8 <= out.len() {
        out[layout.amount_offset..layout.amount_offset + 8].copy_from_slice(&bytes);
    }

    if let Some(offset) = layout.min_out_offset {
        if offset + 8 <= out.len() {
            out[offset..offset + 8].copy_from_slice(&0u64.to_le_bytes());
        }
    }
    if let Some(offset) = layout.track_volume_offset {
        if offset < out.len() {
            out[offset] = 1;
        }
    }
    out
}

/// Assembles the cloned transaction for `core` against `user`'s key.
/// `scaled_input_amount` is the orchestrator's already-sized amount (buy
/// sizing / sell clamp happen in C12, not here — the cloner only rewrites
/// the data blob with whatever amount it's given).
pub async fn clone_trade(
    core: &CoreInstruction,
    intent: &TradeIntent,
    master: Pubkey,
    user: Pubkey,
    nonce: Option<&NonceAccount>,
    network: &dyn NetworkClient,
    scaled_input_amount: u64,
) -> Result<ClonedTransaction, ClonerError> {
    if !core.platform_tag.is_known() {
        return Err(ClonerError::UnknownPlatform);
    }

    let input_mint = Pubkey::from_str(&intent.input_mint).map_err(|_| ClonerError::AtaDeriveFailed)?;
    let output_mint = Pubkey::from_str(&intent.output_mint).map_err(|_| ClonerError::AtaDeriveFailed)?;
    let observed_mints = [input_mint, output_mint];

    let substituted = substitution::substitute(&core.accounts, core.program_id, core.platform_tag, master, user, &observed_mints);
    let rewritten_data = rewrite_amount(&core.data, core.platform_tag, intent.trade_type, scaled_input_amount);

    let core_ix = BuiltInstruction {
        program_id: core.program_id,
        accounts: substituted.into_iter().map(|(account, _)| account).collect(),
        data: rewritten_data,
    };

    let mut instructions = Vec::new();

    // Per spec §4.5, the ATA existence precheck is a single batched read
    // (C2) rather than one RPC round-trip per mint.
    let native_str = NATIVE_MINT;
    let atas_to_check: Vec<(Pubkey, Pubkey)> =
        substitution::required_atas(input_mint, output_mint, user).into_iter().filter(|(mint, _)| mint.to_string() != native_str).collect();

    if !atas_to_check.is_empty() {
        let ata_pubkeys: Vec<Pubkey> = atas_to_check.iter().map(|(_, ata)| *ata).collect();
        let accounts = network.get_multiple_accounts(&ata_pubkeys, Commitment::Processed).await.map_err(|_| ClonerError::AtaDeriveFailed)?;
        for ((mint, _ata), account) in atas_to_check.iter().zip(accounts.iter()) {
            if account.is_none() {
                instructions.push(from_solana_instruction(spl_associated_token_account::instruction::create_associated_token_account(
                    &user,
                    &user,
                    mint,
                    &spl_token::id(),
                )));
            }
        }
    }

    instructions.push(core_ix);

    let recent_anchor = if let Some(nonce_account) = nonce {
        if nonce_account.current_nonce.is_empty() {
            return Err(ClonerError::NonceReadFailed("cached nonce value is empty".into()));
        }
        let advance = solana_system_interface::instruction::advance_nonce_account(&nonce_account.pubkey, &user);
        instructions.insert(0, from_solana_instruction(advance));
        RecentAnchor::Nonce { nonce_pubkey: nonce_account.pubkey, current_nonce: nonce_account.current_nonce.clone() }
    } else {
        let anchor = network
            .get_latest_anchor(Commitment::Processed)
            .await
            .map_err(|e| ClonerError::NonceReadFailed(format!("fresh blockhash fetch failed: {e}")))?;
        RecentAnchor::Blockhash { blockhash: anchor.blockhash, valid_until_height: anchor.valid_until_height }
    };

    Ok(ClonedTransaction { instructions, recent_anchor, signers: vec![user], compute_unit_limit: 0, priority_fee_micro_lamports: 0, platform_tag: core.platform_tag })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use crate::types::{Anchor, SignatureStatus};
    use async_trait::async_trait;

    struct FakeNetwork {
        ata_exists: bool,
    }

    #[async_trait]
    impl NetworkClient for FakeNetwork {
        async fn submit(&self, _serialized_tx: &[u8], _target_endpoint: Option<&str>) -> Result<String, NetworkError> {
            unimplemented!()
        }
        async fn get_signature_status(&self, _signature: &str) -> Result<Option<SignatureStatus>, NetworkError> {
            unimplemented!()
        }
        async fn get_account_info(&self, _pubkey: &Pubkey, _commitment: Commitment) -> Result<Option<Vec<u8>>, NetworkError> {
            unimplemented!()
        }
        async fn get_multiple_accounts(&self, pubkeys: &[Pubkey], _commitment: Commitment) -> Result<Vec<Option<Vec<u8>>>, NetworkError> {
            Ok(pubkeys.iter().map(|_| if self.ata_exists { Some(vec![0u8; 165]) } else { None }).collect())
        }
        async fn get_latest_anchor(&self, _commitment: Commitment) -> Result<Anchor, NetworkError> {
            Ok(Anchor { blockhash: "fake_blockhash".into(), valid_until_height: 100 })
        }
        async fn get_current_slot(&self, _commitment: Commitment) -> Result<u64, NetworkError> {
            unimplemented!()
        }
        async fn get_slot_leaders(&self, _start_slot: u64, _count: u64) -> Result<Vec<Pubkey>, NetworkError> {
            unimplemented!()
        }
        async fn get_signatures_for_address(&self, _pubkey: &Pubkey, _before: Option<&str>, _limit: usize) -> Result<Vec<String>, NetworkError> {
            unimplemented!()
        }
        async fn get_transaction(&self, _signature: &str, _trader_id: Pubkey) -> Result<Option<crate::types::RawTx>, NetworkError> {
            unimplemented!()
        }
    }

    fn base_intent(master: Pubkey, input_mint: String, output_mint: String) -> TradeIntent {
        TradeIntent {
            trade_type: TradeType::Buy,
            input_mint,
            output_mint,
            input_amount_raw: 1_000_000,
            output_amount_raw: 500,
            trader_id: master,
            token_decimals: 6,
            signature: "sig".into(),
            slot: 1,
            observed_compute_unit_limit: None,
        }
    }

    #[test]
    fn pumpfun_bc_buy_zeroes_amount_and_writes_max_cost_separately() {
        let data = vec![0xAAu8; 32]; // discriminator + whatever else, doesn't matter here
        let out = rewrite_amount(&data, PlatformTag::PumpfunBc, TradeType::Buy, 1_000_000);
        assert_eq!(&out[8..16], &0u64.to_le_bytes());
        assert_eq!(&out[16..24], &1_000_000u64.to_le_bytes());
        assert_eq!(out[24], 1); // track_volume flag
    }

    #[test]
    fn pumpfun_bc_sell_writes_amount_and_zeroes_min_out() {
        let data = vec![0xAAu8; 32];
        let out = rewrite_amount(&data, PlatformTag::PumpfunBc, TradeType::Sell, 500);
        assert_eq!(&out[8..16], &500u64.to_le_bytes());
        assert_eq!(&out[16..24], &0u64.to_le_bytes());
    }

    #[tokio::test]
    async fn unknown_platform_tag_is_rejected() {
        let master = Pubkey::new_unique();
        let user = Pubkey::new_unique();
        let core = CoreInstruction { program_id: Pubkey::new_unique(), accounts: vec![], data: vec![], platform_tag: PlatformTag::Unknown, instruction_index: 0 };
        let intent = base_intent(master, NATIVE_MINT.to_string(), Pubkey::new_unique().to_string());
        let network = FakeNetwork { ata_exists: true };
        let result = clone_trade(&core, &intent, master, user, None, &network, 1_000_000).await;
        assert_eq!(result.unwrap_err(), ClonerError::UnknownPlatform);
    }

    #[tokio::test]
    async fn missing_user_ata_produces_a_create_instruction() {
        let master = Pubkey::new_unique();
        let user = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let core = CoreInstruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![AccountRef { pubkey: master, is_signer: true, is_writable: true }],
            data: vec![0u8; 32],
            platform_tag: PlatformTag::PumpfunBc,
            instruction_index: 0,
        };
        let intent = base_intent(master, NATIVE_MINT.to_string(), mint.to_string());
        let network = FakeNetwork { ata_exists: false };
        let cloned = clone_trade(&core, &intent, master, user, None, &network, 900_000).await.unwrap();
        assert!(cloned.instructions.iter().any(|ix| ix.program_id == spl_associated_token_account::id()));
        assert!(matches!(cloned.recent_anchor, RecentAnchor::Blockhash { .. }));
    }

    #[tokio::test]
    async fn nonce_account_prepends_advance_instruction() {
        let master = Pubkey::new_unique();
        let user = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let core = CoreInstruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![AccountRef { pubkey: master, is_signer: true, is_writable: true }],
            data: vec![0u8; 32],
            platform_tag: PlatformTag::PumpfunBc,
            instruction_index: 0,
        };
        let intent = base_intent(master, NATIVE_MINT.to_string(), mint.to_string());
        let network = FakeNetwork { ata_exists: true };
        let nonce = NonceAccount { pubkey: Pubkey::new_unique(), authority: user, current_nonce: "cached_nonce_hash".into() };
        let cloned = clone_trade(&core, &intent, master, user, Some(&nonce), &network, 900_000).await.unwrap();
        assert!(cloned.uses_nonce());
        assert!(cloned.instructions[0].accounts.iter().any(|a| a.pubkey == nonce.pubkey));
    }
}
