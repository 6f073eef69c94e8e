use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum SubscriptionStatus {
    #[default]
    Pending,
    Trialing,
    Active,
    PastDue,
    Suspended,
    Cancelled,
    Expired,
}

impl Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Suspended => "suspended",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        };
        write!(f, "{}", status)
    }
}

impl SubscriptionStatus {
    pub fn from_str(value: &str) -> Self {
        match value {
            "pending" => SubscriptionStatus::Pending,
            "trialing" => SubscriptionStatus::Trialing,
            "active" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "suspended" => SubscriptionStatus::Suspended,
            "cancelled" => SubscriptionStatus::Cancelled,
            "expired" => SubscriptionStatus::Expired,
            _ => SubscriptionStatus::Expired,
        }
    }

    /// A live subscription is the one a user is currently entitled under.
    /// At most one live subscription per user is allowed.
    pub fn is_live(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }

    /// Terminal states admit no further automatic transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Cancelled | SubscriptionStatus::Expired)
    }

    /// The lifecycle transition table. Anything not listed here is an
    /// illegal transition and must be rejected without a write.
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, next),
            (Pending, Trialing)
                | (Pending, Active)
                | (Pending, Cancelled)
                | (Trialing, Active)
                | (Trialing, Expired)
                | (Trialing, Cancelled)
                | (Active, PastDue)
                | (Active, Cancelled)
                | (Active, Expired)
                | (PastDue, Active)
                | (PastDue, Suspended)
                | (PastDue, Cancelled)
                | (Suspended, Active)
                | (Suspended, Cancelled)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_states_are_active_and_trialing() {
        assert!(SubscriptionStatus::Active.is_live());
        assert!(SubscriptionStatus::Trialing.is_live());
        assert!(!SubscriptionStatus::PastDue.is_live());
        assert!(!SubscriptionStatus::Cancelled.is_live());
    }

    #[test]
    fn terminal_states_admit_no_transitions() {
        for next in [
            SubscriptionStatus::Pending,
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Suspended,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Expired,
        ] {
            assert!(!SubscriptionStatus::Cancelled.can_transition_to(next));
            assert!(!SubscriptionStatus::Expired.can_transition_to(next));
        }
    }

    #[test]
    fn lifecycle_transitions() {
        use SubscriptionStatus::*;
        assert!(Pending.can_transition_to(Trialing));
        assert!(Pending.can_transition_to(Active));
        assert!(Trialing.can_transition_to(Active));
        assert!(Trialing.can_transition_to(Expired));
        assert!(Active.can_transition_to(PastDue));
        assert!(PastDue.can_transition_to(Active));
        assert!(PastDue.can_transition_to(Suspended));

        assert!(!Active.can_transition_to(Trialing));
        assert!(!Expired.can_transition_to(Active));
        assert!(!Suspended.can_transition_to(PastDue));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            SubscriptionStatus::Pending,
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Suspended,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Expired,
        ] {
            assert_eq!(SubscriptionStatus::from_str(&status.to_string()), status);
        }
    }
}
