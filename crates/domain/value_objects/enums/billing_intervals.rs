use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Billing interval of a plan price. The credit grant itself is always
/// monthly; a yearly price simply prepays twelve periods.
#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    #[default]
    Monthly,
    Yearly,
}

impl Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let interval = match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
        };
        write!(f, "{}", interval)
    }
}

impl BillingInterval {
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "monthly" => Some(BillingInterval::Monthly),
            "yearly" => Some(BillingInterval::Yearly),
            _ => None,
        }
    }

    /// Length of one billing period in days.
    pub fn period_days(&self) -> i64 {
        match self {
            BillingInterval::Monthly => 30,
            BillingInterval::Yearly => 365,
        }
    }
}
