//! Budget alert events and the unlock parameters derived from them

use serde::{Deserialize, Serialize};

/// A parsed budget alert notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetEvent {
    pub budget_name: String,
    pub threshold_percent: f64,
    pub actual_spend: f64,
    pub forecasted_spend: Option<f64>,
}

/// Inputs of a budget-unlock run
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BudgetUnlockParams {
    pub budget_limit: Option<f64>,
    pub current_cost: Option<f64>,
}

/// The only accepted value of the budget-unlock `action` parameter
pub const BUDGET_UNLOCK_ACTION: &str = "Disable";
