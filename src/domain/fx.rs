use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type FxRateId = Uuid;

/// Hardcoded last-resort USD/ETB rate used when no stored rate matches.
pub fn usd_etb_fallback_rate() -> Decimal {
    Decimal::new(5650, 2)
}

/// One stored exchange rate. At most one active row exists per
/// (from, to) pair; setting a new rate deactivates the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxRate {
    pub id: FxRateId,
    pub from_currency: String,
    pub to_currency: String,
    pub rate: Decimal,
    pub inverse_rate: Decimal,
    pub buy_rate: Option<Decimal>,
    pub sell_rate: Option<Decimal>,
    /// Where the rate came from ("nbe", "manual", ...)
    pub source: String,
    pub effective_from: DateTime<Utc>,
    pub effective_to: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl FxRate {
    pub fn new(
        from_currency: impl Into<String>,
        to_currency: impl Into<String>,
        rate: Decimal,
        source: impl Into<String>,
        effective_from: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_currency: from_currency.into().to_uppercase(),
            to_currency: to_currency.into().to_uppercase(),
            rate,
            inverse_rate: (Decimal::ONE / rate).round_dp(8),
            buy_rate: None,
            sell_rate: None,
            source: source.into(),
            effective_from,
            effective_to: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_buy_sell(mut self, buy: Decimal, sell: Decimal) -> Self {
        self.buy_rate = Some(buy);
        self.sell_rate = Some(sell);
        self
    }

    /// Whether this row governed conversions at `at`.
    pub fn applies_at(&self, at: DateTime<Utc>) -> bool {
        self.effective_from <= at && self.effective_to.map_or(true, |end| at < end)
    }
}
