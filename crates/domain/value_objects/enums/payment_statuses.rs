use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum PaymentStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    Cancelled,
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", status)
    }
}

impl PaymentStatus {
    pub fn from_str(value: &str) -> Self {
        match value {
            "pending" => PaymentStatus::Pending,
            "processing" => PaymentStatus::Processing,
            "completed" => PaymentStatus::Completed,
            "failed" => PaymentStatus::Failed,
            "refunded" => PaymentStatus::Refunded,
            "cancelled" => PaymentStatus::Cancelled,
            _ => PaymentStatus::Failed,
        }
    }

    /// Completed payment amounts are immutable; a refund records new state
    /// instead of rewriting the original row's amount.
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Refunded)
    }
}
