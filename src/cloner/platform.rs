//! Per-platform amount-field layout descriptors and user-derived-PDA seed
//! tags (spec §4.5.1, §4.5 substitution rule 3). The table shape mirrors
//! `locator`'s program-id table: a closed set, looked up once, never a
//! scattered `match` across the cloner.

use crate::types::{PlatformTag, TradeType};

/// Where in the instruction `data` blob the scaled amount (and, where
/// applicable, the min-output guard) lives for a platform+direction pair.
/// `None` means "don't touch the data, pass it through" (router venues).
#[derive(Debug, Clone, Copy)]
pub struct AmountLayout {
    /// Byte offset of the 8-byte little-endian amount-in field.
    pub amount_offset: usize,
    /// Byte offset of the 8-byte little-endian min-out field, if the venue
    /// has one in a fixed position (sells only).
    pub min_out_offset: Option<usize>,
    /// Byte offset of the 8-byte little-endian max-cost/max-quote-in field
    /// (buys only). When set, `amount_offset` is zeroed and the scaled
    /// amount is written here instead, per §4.5.1's `amount=0,
    /// max_native_cost=scaled` pump.fun buy layout.
    pub max_cost_offset: Option<usize>,
    /// `track_volume` flag byte offset for bonding-curve buys, if present.
    pub track_volume_offset: Option<usize>,
}

/// Resolves the data-layout descriptor for a platform tag and trade
/// direction, per the §4.5.1 table. `None` means the venue is a
/// pass-through (e.g. `jupiter_router`) or a direction that table doesn't
/// describe.
pub fn amount_layout(tag: PlatformTag, trade_type: TradeType) -> Option<AmountLayout> {
    use PlatformTag::*;
    use TradeType::*;
    match (tag, trade_type) {
        (PumpfunBc, Buy) => Some(AmountLayout { amount_offset: 8, min_out_offset: None, max_cost_offset: Some(16), track_volume_offset: Some(24) }),
        (PumpfunBc, Sell) => Some(AmountLayout { amount_offset: 8, min_out_offset: Some(16), max_cost_offset: None, track_volume_offset: None }),
        (PumpfunAmm, Buy) => Some(AmountLayout { amount_offset: 8, min_out_offset: None, max_cost_offset: Some(16), track_volume_offset: Some(24) }),
        (PumpfunAmm, Sell) => Some(AmountLayout { amount_offset: 8, min_out_offset: Some(16), max_cost_offset: None, track_volume_offset: None }),
        (RaydiumV4, _) | (RaydiumClmm, _) => {
            Some(AmountLayout { amount_offset: 8, min_out_offset: Some(16), max_cost_offset: None, track_volume_offset: None })
        }
        (MeteoraDlmm, _) | (MeteoraDbc, _) | (OrcaWhirlpool, _) => {
            Some(AmountLayout { amount_offset: 8, min_out_offset: Some(16), max_cost_offset: None, track_volume_offset: None })
        }
        (JupiterRouter, _) => None,
        (RaydiumLaunchpad, _) => Some(AmountLayout { amount_offset: 8, min_out_offset: Some(16), max_cost_offset: None, track_volume_offset: None }),
        (Unknown, _) => None,
    }
}

/// Seed tag used to derive a venue's per-trader PDA (creator vault, volume
/// accumulator, ...). `None` for venues with no such account in their
/// instruction layout. Recomputation always follows `(tag_bytes, user)`.
pub fn user_derived_seed_tag(program_id: solana_pubkey::Pubkey, tag: PlatformTag) -> Option<&'static [u8]> {
    use PlatformTag::*;
    match tag {
        PumpfunBc => {
            let _ = program_id;
            Some(b"creator-vault")
        }
        PumpfunAmm => Some(b"volume-accumulator"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jupiter_router_has_no_layout() {
        assert!(amount_layout(PlatformTag::JupiterRouter, TradeType::Buy).is_none());
    }

    #[test]
    fn pumpfun_bc_buy_sets_track_volume_flag_and_max_cost_field() {
        let layout = amount_layout(PlatformTag::PumpfunBc, TradeType::Buy).unwrap();
        assert!(layout.track_volume_offset.is_some());
        assert!(layout.min_out_offset.is_none());
        assert!(layout.max_cost_offset.is_some());
        assert_ne!(layout.max_cost_offset.unwrap(), layout.amount_offset);
    }

    #[test]
    fn pumpfun_bc_sell_has_min_out_but_no_max_cost() {
        let layout = amount_layout(PlatformTag::PumpfunBc, TradeType::Sell).unwrap();
        assert!(layout.min_out_offset.is_some());
        assert!(layout.max_cost_offset.is_none());
    }
}
