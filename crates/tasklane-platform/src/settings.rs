use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tasklane_fees::FeeConfig;
use tracing::warn;

/// Load the current fee configuration. Platform and trust & support rates
/// come from the settings store, processor rate and fixed fee from the
/// environment; anything missing or unreadable falls back to the hard
/// defaults so payment processing keeps working when settings are down.
pub async fn load_fee_config(pool: &PgPool) -> FeeConfig {
    let mut config = FeeConfig::default();

    match fetch_stored_rates(pool).await {
        Ok(rates) => {
            if let Some(rate) = rates.platform_fee_rate {
                config.platform_fee_rate = rate;
            }
            if let Some(rate) = rates.trust_and_support_fee_rate {
                config.trust_and_support_fee_rate = rate;
            }
        }
        Err(err) => {
            warn!("settings store unreachable, using default fee rates: {err:#}");
        }
    }

    if let Some(rate) = env_decimal("STRIPE_FEE_RATE") {
        config.processor_fee_rate = rate;
    }
    if let Some(fee) = env_decimal("STRIPE_FIXED_FEE") {
        config.processor_fixed_fee = fee;
    }

    if let Err(err) = config.validate() {
        warn!("configured fee rates are invalid, using defaults: {err:#}");
        return FeeConfig::default();
    }

    config
}

#[derive(Default)]
struct StoredRates {
    platform_fee_rate: Option<Decimal>,
    trust_and_support_fee_rate: Option<Decimal>,
}

async fn fetch_stored_rates(pool: &PgPool) -> anyhow::Result<StoredRates> {
    let rows = sqlx::query(
        r#"
        SELECT key, value
        FROM platform_settings
        WHERE key IN ('platform_fee_rate', 'trust_and_support_fee_rate')
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut rates = StoredRates::default();
    for row in rows {
        let key: String = row.try_get("key")?;
        let value: String = row.try_get("value")?;
        let parsed: Decimal = match value.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("platform setting {key} holds non-numeric value '{value}', skipping");
                continue;
            }
        };
        match key.as_str() {
            "platform_fee_rate" => rates.platform_fee_rate = Some(parsed),
            "trust_and_support_fee_rate" => rates.trust_and_support_fee_rate = Some(parsed),
            _ => {}
        }
    }

    Ok(rates)
}

fn env_decimal(name: &str) -> Option<Decimal> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("{name} holds non-numeric value '{raw}', ignoring");
            None
        }
    }
}
