use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Kind of a ledger row. Grants are positive, debits negative; the kind
/// records why the balance moved, the signed amount records by how much.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CreditTransactionKind {
    Purchase,
    Subscription,
    Bonus,
    Refund,
    Consumption,
    Expiration,
}

impl Display for CreditTransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            CreditTransactionKind::Purchase => "purchase",
            CreditTransactionKind::Subscription => "subscription",
            CreditTransactionKind::Bonus => "bonus",
            CreditTransactionKind::Refund => "refund",
            CreditTransactionKind::Consumption => "consumption",
            CreditTransactionKind::Expiration => "expiration",
        };
        write!(f, "{}", kind)
    }
}

impl CreditTransactionKind {
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "purchase" => Some(CreditTransactionKind::Purchase),
            "subscription" => Some(CreditTransactionKind::Subscription),
            "bonus" => Some(CreditTransactionKind::Bonus),
            "refund" => Some(CreditTransactionKind::Refund),
            "consumption" => Some(CreditTransactionKind::Consumption),
            "expiration" => Some(CreditTransactionKind::Expiration),
            _ => None,
        }
    }
}
