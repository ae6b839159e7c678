use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::round2;

/// VAT rate applied to the platform's commission income (15%).
pub fn vat_rate() -> Decimal {
    Decimal::new(15, 2)
}

/// Withholding tax rate on commission income (10%).
pub fn withholding_rate() -> Decimal {
    Decimal::new(10, 2)
}

/// Platform share of a booking's gross payment (15%).
pub fn corporate_rate() -> Decimal {
    Decimal::new(15, 2)
}

/// Referring agent ("Dellala") share of a booking's gross payment (5%).
pub fn dellala_rate() -> Decimal {
    Decimal::new(5, 2)
}

/// A Dellala earns commission for 36 calendar months after registration.
pub const DELLALA_COMMISSION_MONTHS: i32 = 36;

/// VAT on an amount, rounded to 2 decimal places.
pub fn vat_on(amount: Decimal) -> Decimal {
    round2(amount * vat_rate())
}

/// Withholding tax on a commission amount, rounded to 2 decimal places.
pub fn withholding_on(commission: Decimal) -> Decimal {
    round2(commission * withholding_rate())
}

/// How a booking's gross payment splits among stakeholders.
///
/// VAT and withholding tax are computed from the corporate share for
/// reporting only; they are never subtracted from any share, so
/// `owner_share + dellala_share + corporate_share == gross` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionSplit {
    pub gross: Decimal,
    pub owner_share: Decimal,
    pub dellala_share: Decimal,
    pub corporate_share: Decimal,
    pub vat_amount: Decimal,
    pub withholding_tax: Decimal,
}

/// Split a gross payment: 15% corporate, 5% Dellala (when one referred the
/// property and their commission window is still open), remainder to the
/// owner. Rounding happens at each intermediate step.
pub fn commission_split(gross: Decimal, has_dellala: bool, dellala_active: bool) -> CommissionSplit {
    let corporate_share = round2(gross * corporate_rate());
    let dellala_share = if has_dellala && dellala_active {
        round2(gross * dellala_rate())
    } else {
        Decimal::ZERO
    };
    let owner_share = gross - corporate_share - dellala_share;

    CommissionSplit {
        gross,
        owner_share,
        dellala_share,
        corporate_share,
        vat_amount: vat_on(corporate_share),
        withholding_tax: withholding_on(corporate_share),
    }
}

/// Whether a Dellala registered at `registered` still earns commission at
/// `now`: true iff the calendar-month difference is at most 36. The day of
/// month is ignored.
pub fn dellala_commission_active(registered: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let months = (now.year() - registered.year()) * 12 + now.month() as i32
        - registered.month() as i32;
    months <= DELLALA_COMMISSION_MONTHS
}

/// Receipt-shaped tax summary for ERCA reporting. Informational only:
/// the net figure is what the platform would retain if taxes were remitted
/// from its share, but no share is actually reduced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErcaReceipt {
    pub gross_amount: Decimal,
    pub corporate_share: Decimal,
    pub vat_amount: Decimal,
    pub withholding_tax: Decimal,
    pub corporate_net_of_tax: Decimal,
}

impl ErcaReceipt {
    pub fn from_split(split: &CommissionSplit) -> Self {
        Self {
            gross_amount: split.gross,
            corporate_share: split.corporate_share,
            vat_amount: split.vat_amount,
            withholding_tax: split.withholding_tax,
            corporate_net_of_tax: split.corporate_share - split.vat_amount - split.withholding_tax,
        }
    }
}
