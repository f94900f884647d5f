//! Fee calculation for marketplace charges.
//!
//! This is the single source of truth for the fee formulas: the webhook
//! ledger path and the weekly batch both call [`calculate_fees`], so the two
//! paths cannot drift apart. Pure arithmetic, no I/O; rounding happens only
//! in [`to_minor_units`] at the processor boundary.

use anyhow::{Result, ensure};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Fee-rate snapshot consumed per calculation. Rates are fractions; the
/// fixed fee is in major units (dollars).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeeConfig {
    pub platform_fee_rate: Decimal,
    pub trust_and_support_fee_rate: Decimal,
    pub processor_fee_rate: Decimal,
    pub processor_fixed_fee: Decimal,
}

impl Default for FeeConfig {
    /// Hard fallback used when the settings store is unreachable:
    /// 15% platform, 15% trust & support, 2.9% + $0.30 processor.
    fn default() -> Self {
        Self {
            platform_fee_rate: Decimal::new(15, 2),
            trust_and_support_fee_rate: Decimal::new(15, 2),
            processor_fee_rate: Decimal::new(29, 3),
            processor_fixed_fee: Decimal::new(30, 2),
        }
    }
}

impl FeeConfig {
    /// Rates must be fractions in [0, 1) and the fixed fee non-negative.
    /// Config is rejected at load time so the calculation itself never
    /// validates.
    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("platform_fee_rate", self.platform_fee_rate),
            ("trust_and_support_fee_rate", self.trust_and_support_fee_rate),
            ("processor_fee_rate", self.processor_fee_rate),
        ] {
            ensure!(
                rate >= Decimal::ZERO && rate < Decimal::ONE,
                "{name} must be in [0, 1), got {rate}"
            );
        }
        ensure!(
            self.processor_fixed_fee >= Decimal::ZERO,
            "processor_fixed_fee must be non-negative, got {}",
            self.processor_fixed_fee
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeeCalculation {
    pub base_amount: Decimal,
    /// Deducted from the worker's payout, never charged to the buyer.
    pub platform_fee: Decimal,
    /// Added to the buyer's total charge only.
    pub trust_and_support_fee: Decimal,
    /// Estimated processor pass-through, added to the buyer's total charge.
    pub processor_fee: Decimal,
    pub total_amount: Decimal,
    pub worker_payout: Decimal,
}

/// Compute the fee split for a charge. Callers guard `base_amount > 0`
/// before invoking; amounts stay at full precision here and are rounded only
/// when converted to minor units.
pub fn calculate_fees(base_amount: Decimal, config: &FeeConfig) -> FeeCalculation {
    let platform_fee = base_amount * config.platform_fee_rate;
    let trust_and_support_fee = base_amount * config.trust_and_support_fee_rate;
    let processor_fee = base_amount * config.processor_fee_rate + config.processor_fixed_fee;

    FeeCalculation {
        base_amount,
        platform_fee,
        trust_and_support_fee,
        processor_fee,
        total_amount: base_amount + trust_and_support_fee + processor_fee,
        worker_payout: base_amount - platform_fee,
    }
}

/// Convert a major-unit amount to the processor's integer minor units
/// (cents), rounding half-up. This is the only place an amount is rounded.
pub fn to_minor_units(amount: Decimal) -> Result<i64> {
    let cents = (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    cents
        .to_i64()
        .ok_or_else(|| anyhow::anyhow!("amount {amount} does not fit in minor units"))
}
