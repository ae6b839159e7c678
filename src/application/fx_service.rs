use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info};

use crate::domain::{round2, usd_etb_fallback_rate, AuditCategory, AuditDraft, FxRate};
use crate::storage::Repository;

use super::{AppError, AuditLogService};

/// Result of one currency conversion. `rate` is None for identity
/// conversions so callers can tell a real FX leg from a no-op.
#[derive(Debug, Clone, Copy)]
pub struct Conversion {
    pub amount: Decimal,
    pub rate: Option<Decimal>,
}

/// Exchange rates and conversions. One active rate per currency pair;
/// conversion falls back to the inverse of the reverse pair, then to the
/// hardcoded USD/ETB rate, before giving up.
pub struct FxService {
    repo: Repository,
    audit: AuditLogService,
}

impl FxService {
    pub fn new(repo: Repository) -> Self {
        let audit = AuditLogService::new(repo.clone());
        Self { repo, audit }
    }

    /// Store a new rate for the pair, deactivating the previous one.
    /// `buy_sell` carries the bank's buy/sell quotes when the source
    /// publishes them.
    pub async fn set_rate(
        &self,
        from: &str,
        to: &str,
        rate: Decimal,
        buy_sell: Option<(Decimal, Decimal)>,
        source: &str,
        actor: &str,
    ) -> Result<FxRate, AppError> {
        if rate <= Decimal::ZERO {
            return Err(AppError::Validation("exchange rate must be positive".into()));
        }
        let from = from.to_uppercase();
        let to = to.to_uppercase();
        if from == to {
            return Err(AppError::Validation("from and to currencies must differ".into()));
        }

        let previous = self.repo.get_active_rate(&from, &to).await?;
        let mut fx_rate = FxRate::new(&from, &to, rate, source, Utc::now());
        if let Some((buy, sell)) = buy_sell {
            fx_rate = fx_rate.with_buy_sell(buy, sell);
        }
        self.repo.activate_rate(&fx_rate).await?;
        info!(%from, %to, %rate, source, "exchange rate set");

        let draft = AuditDraft::new("fx_rate_set", AuditCategory::Fx, actor, fx_rate.id.to_string())
            .with_before(json!({ "rate": previous.as_ref().map(|r| r.rate) }))
            .with_after(json!({ "from": from, "to": to, "rate": rate, "source": source }));
        self.audit.record(draft).await?;

        Ok(fx_rate)
    }

    pub async fn active_rate(&self, from: &str, to: &str) -> Result<Option<FxRate>, AppError> {
        Ok(self
            .repo
            .get_active_rate(&from.to_uppercase(), &to.to_uppercase())
            .await?)
    }

    pub async fn rate_at(
        &self,
        from: &str,
        to: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<FxRate>, AppError> {
        Ok(self
            .repo
            .get_rate_at(&from.to_uppercase(), &to.to_uppercase(), at)
            .await?)
    }

    /// Convert an amount, rounded to 2 decimal places.
    ///
    /// Resolution order: identity, active direct rate, inverse of the active
    /// reverse rate, hardcoded USD/ETB fallback. Anything else is
    /// `RateNotFound`.
    pub async fn convert(&self, amount: Decimal, from: &str, to: &str) -> Result<Conversion, AppError> {
        let from = from.to_uppercase();
        let to = to.to_uppercase();
        if from == to {
            return Ok(Conversion { amount, rate: None });
        }

        if let Some(direct) = self.repo.get_active_rate(&from, &to).await? {
            debug!(%from, %to, rate = %direct.rate, "direct rate");
            return Ok(Conversion { amount: round2(amount * direct.rate), rate: Some(direct.rate) });
        }

        if let Some(reverse) = self.repo.get_active_rate(&to, &from).await? {
            debug!(%from, %to, rate = %reverse.inverse_rate, "inverse of reverse rate");
            return Ok(Conversion {
                amount: round2(amount * reverse.inverse_rate),
                rate: Some(reverse.inverse_rate),
            });
        }

        if from == "USD" && to == "ETB" {
            let rate = usd_etb_fallback_rate();
            debug!("hardcoded USD/ETB fallback rate");
            return Ok(Conversion { amount: round2(amount * rate), rate: Some(rate) });
        }
        if from == "ETB" && to == "USD" {
            let inverse = (Decimal::ONE / usd_etb_fallback_rate()).round_dp(8);
            debug!("hardcoded ETB/USD fallback rate");
            return Ok(Conversion { amount: round2(amount * inverse), rate: Some(inverse) });
        }

        Err(AppError::RateNotFound { from, to })
    }
}
