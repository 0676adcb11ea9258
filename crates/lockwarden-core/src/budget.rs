//! Budget alert ingestion

use lockwarden_api::{BudgetEvent, BudgetUnlockParams};
use lockwarden_util::{GovernanceError, Result};
use serde_json::Value;

/// Threshold (percent of budget) at which the emergency unlock runs
pub const UNLOCK_THRESHOLD_PERCENT: f64 = 100.0;

/// Parse a budget alert webhook payload.
///
/// The payload must be a JSON object with a `data` object carrying a numeric
/// `threshold`. `actualSpend` defaults to zero and `budgetName` to
/// `"Unknown"` when absent. Numbers may also arrive as numeric strings.
pub fn parse_budget_event(payload: &[u8]) -> Result<BudgetEvent> {
    let root: Value = serde_json::from_slice(payload)
        .map_err(|e| GovernanceError::parse(format!("payload is not JSON: {}", e)))?;

    let data = root
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| GovernanceError::parse("missing 'data' object"))?;

    let threshold_percent = match data.get("threshold") {
        Some(value) => number(value, "threshold")?,
        None => return Err(GovernanceError::parse("missing 'data.threshold'")),
    };
    let actual_spend = match data.get("actualSpend") {
        Some(value) => number(value, "actualSpend")?,
        None => 0.0,
    };
    let forecasted_spend = match data.get("forecastedSpend") {
        Some(Value::Null) | None => None,
        Some(value) => Some(number(value, "forecastedSpend")?),
    };
    let budget_name = data
        .get("budgetName")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .unwrap_or("Unknown")
        .to_string();

    Ok(BudgetEvent {
        budget_name,
        threshold_percent,
        actual_spend,
        forecasted_spend,
    })
}

fn number(value: &Value, field: &str) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(GovernanceError::parse(format!(
            "'data.{}' is not a number: {}",
            field, value
        ))),
    }
}

/// The sole trigger condition for the emergency unlock
pub fn should_trigger_unlock(event: &BudgetEvent) -> bool {
    event.threshold_percent >= UNLOCK_THRESHOLD_PERCENT
}

/// Unlock parameters synthesized from a triggering alert
pub fn unlock_params(event: &BudgetEvent) -> BudgetUnlockParams {
    let budget_limit = (event.threshold_percent > 0.0)
        .then(|| event.actual_spend / (event.threshold_percent / 100.0));
    BudgetUnlockParams {
        budget_limit,
        current_cost: Some(event.actual_spend),
    }
}
