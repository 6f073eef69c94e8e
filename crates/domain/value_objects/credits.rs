use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::value_objects::enums::credit_transaction_kinds::CreditTransactionKind;

/// Failure modes of the credit ledger. `DuplicateOperation` is a replay of an
/// already-applied reference and is treated as success-no-op by callers;
/// `ConcurrencyConflict` is retried a bounded number of times before being
/// surfaced.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid ledger request: {0}")]
    Validation(String),
    #[error("insufficient credits: requested {requested}, available {available}")]
    InsufficientCredits { requested: i64, available: i64 },
    #[error("operation already applied")]
    DuplicateOperation,
    #[error("concurrent balance update, retry")]
    ConcurrencyConflict,
    #[error("credit balance not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// In-memory view of one user's `credit_balances` row, decoupled from diesel
/// so the ledger arithmetic stays testable without a database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BalanceSnapshot {
    pub monthly_credits: i64,
    pub monthly_used: i64,
    pub extra_credits: i64,
    pub extra_used: i64,
    pub total_earned: i64,
    pub total_consumed: i64,
    pub monthly_reset_at: Option<DateTime<Utc>>,
}

impl BalanceSnapshot {
    /// Raw monthly remainder, including a remainder whose period has lapsed.
    /// The raw value is what the conservation law is stated over.
    pub fn monthly_remaining(&self) -> i64 {
        self.monthly_credits - self.monthly_used
    }

    pub fn extra_remaining(&self) -> i64 {
        self.extra_credits - self.extra_used
    }

    /// Raw total, the quantity every ledger row's `balance_before`/`balance_after`
    /// is chained over.
    pub fn total(&self) -> i64 {
        self.monthly_remaining() + self.extra_remaining()
    }

    /// Monthly remainder that is still consumable at `now`. A remainder past
    /// `monthly_reset_at` is frozen until the expiry sweep records its
    /// expiration row.
    pub fn consumable_monthly(&self, now: DateTime<Utc>) -> i64 {
        match self.monthly_reset_at {
            Some(reset_at) if reset_at <= now => 0,
            _ => self.monthly_remaining(),
        }
    }

    pub fn consumable_total(&self, now: DateTime<Utc>) -> i64 {
        self.consumable_monthly(now) + self.extra_remaining()
    }
}

/// Balance view returned to API callers: consumable amounts only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BalanceDto {
    pub monthly_remaining: i64,
    pub extra_remaining: i64,
    pub total_available: i64,
}

impl BalanceDto {
    pub fn from_snapshot(snapshot: &BalanceSnapshot, now: DateTime<Utc>) -> Self {
        let monthly_remaining = snapshot.consumable_monthly(now);
        let extra_remaining = snapshot.extra_remaining();
        Self {
            monthly_remaining,
            extra_remaining,
            total_available: monthly_remaining + extra_remaining,
        }
    }
}

/// Ledger row view returned to API callers.
#[derive(Debug, Clone, Serialize)]
pub struct CreditTransactionDto {
    pub id: Uuid,
    pub kind: String,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<crate::domain::entities::credits::CreditTransactionEntity> for CreditTransactionDto {
    fn from(entity: crate::domain::entities::credits::CreditTransactionEntity) -> Self {
        Self {
            id: entity.id,
            kind: entity.kind,
            amount: entity.amount,
            balance_before: entity.balance_before,
            balance_after: entity.balance_after,
            expires_at: entity.expires_at,
            description: entity.description,
            created_at: entity.created_at,
        }
    }
}

/// A logical ledger operation, before it is turned into a concrete row.
///
/// Debits consume the monthly remainder before extra credits; reclaims run
/// the other way around because purchased credits are what a refund takes
/// back. Both orderings are deliberate and load-bearing for expiry.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerOp {
    /// Positive grant. `Subscription` grants replace the monthly bucket
    /// (the caller expires any stale remainder first); every other kind
    /// tops up the extra bucket.
    Grant {
        kind: CreditTransactionKind,
        amount: i64,
        monthly_reset_at: Option<DateTime<Utc>>,
    },
    /// Debit for usage. Fails with `InsufficientCredits` when the consumable
    /// balance cannot cover it.
    Consume { amount: i64 },
    /// Compensating debit after a payment refund, capped at what the user
    /// still holds.
    Reclaim { amount: i64 },
    /// Expire the lapsed monthly remainder (audit row, never a silent drop).
    ExpireMonthly,
    /// Expire up to `amount` extra credits from a lapsed grant lot.
    ExpireExtra { amount: i64 },
}

/// Outcome of planning one operation against a snapshot: the row to append
/// and the balance row that must be written in the same transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTransaction {
    pub kind: CreditTransactionKind,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub next: BalanceSnapshot,
}

impl LedgerOp {
    /// Plans `self` against `snapshot`. Pure: no I/O, no clock reads beyond
    /// the passed-in `now`. Every returned plan satisfies
    /// `balance_after == balance_before + amount`.
    pub fn plan(
        &self,
        snapshot: &BalanceSnapshot,
        now: DateTime<Utc>,
    ) -> Result<PlannedTransaction, LedgerError> {
        let balance_before = snapshot.total();
        let mut next = snapshot.clone();

        let (kind, amount) = match self {
            LedgerOp::Grant {
                kind,
                amount,
                monthly_reset_at,
            } => {
                if *amount <= 0 {
                    return Err(LedgerError::Validation(
                        "grant amount must be positive".to_string(),
                    ));
                }
                match kind {
                    CreditTransactionKind::Subscription => {
                        // The caller expires a stale remainder before the
                        // period grant, so the carried remainder is folded in
                        // rather than overwritten.
                        next.monthly_credits = snapshot.monthly_remaining() + amount;
                        next.monthly_used = 0;
                        next.monthly_reset_at = *monthly_reset_at;
                    }
                    CreditTransactionKind::Purchase
                    | CreditTransactionKind::Bonus
                    | CreditTransactionKind::Refund => {
                        next.extra_credits += amount;
                    }
                    CreditTransactionKind::Consumption | CreditTransactionKind::Expiration => {
                        return Err(LedgerError::Validation(format!(
                            "{kind} is not a grant kind"
                        )));
                    }
                }
                next.total_earned += amount;
                (*kind, *amount)
            }
            LedgerOp::Consume { amount } => {
                if *amount <= 0 {
                    return Err(LedgerError::Validation(
                        "consume amount must be positive".to_string(),
                    ));
                }
                let monthly_available = snapshot.consumable_monthly(now);
                let extra_available = snapshot.extra_remaining();
                let available = monthly_available + extra_available;
                if available < *amount {
                    return Err(LedgerError::InsufficientCredits {
                        requested: *amount,
                        available,
                    });
                }
                let from_monthly = monthly_available.min(*amount);
                let from_extra = amount - from_monthly;
                next.monthly_used += from_monthly;
                next.extra_used += from_extra;
                next.total_consumed += amount;
                (CreditTransactionKind::Consumption, -amount)
            }
            LedgerOp::Reclaim { amount } => {
                if *amount <= 0 {
                    return Err(LedgerError::Validation(
                        "reclaim amount must be positive".to_string(),
                    ));
                }
                let effective = (*amount).min(snapshot.total());
                if effective <= 0 {
                    return Err(LedgerError::Validation(
                        "nothing left to reclaim".to_string(),
                    ));
                }
                let from_extra = snapshot.extra_remaining().min(effective);
                let from_monthly = effective - from_extra;
                next.extra_used += from_extra;
                next.monthly_used += from_monthly;
                (CreditTransactionKind::Refund, -effective)
            }
            LedgerOp::ExpireMonthly => {
                let remainder = snapshot.monthly_remaining();
                if remainder <= 0 {
                    return Err(LedgerError::Validation(
                        "no monthly remainder to expire".to_string(),
                    ));
                }
                next.monthly_used += remainder;
                (CreditTransactionKind::Expiration, -remainder)
            }
            LedgerOp::ExpireExtra { amount } => {
                if *amount <= 0 {
                    return Err(LedgerError::Validation(
                        "expire amount must be positive".to_string(),
                    ));
                }
                let effective = (*amount).min(snapshot.extra_remaining());
                if effective <= 0 {
                    return Err(LedgerError::Validation(
                        "no extra remainder to expire".to_string(),
                    ));
                }
                next.extra_used += effective;
                (CreditTransactionKind::Expiration, -effective)
            }
        };

        Ok(PlannedTransaction {
            kind,
            amount,
            balance_before,
            balance_after: balance_before + amount,
            next,
        })
    }
}

/// Idempotence key for a ledger row: one `(reference_type, reference_id)`
/// pair is applied at most once, enforced by a unique index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerReference {
    pub reference_type: String,
    pub reference_id: String,
}

impl LedgerReference {
    pub const TYPE_PAYMENT: &'static str = "payment";
    pub const TYPE_REFUND: &'static str = "refund";
    pub const TYPE_SUBSCRIPTION_PERIOD: &'static str = "subscription_period";
    pub const TYPE_GRANT_EXPIRY: &'static str = "grant_expiry";
    pub const TYPE_MONTHLY_EXPIRY: &'static str = "monthly_expiry";

    pub fn payment(payment_id: Uuid) -> Self {
        Self {
            reference_type: Self::TYPE_PAYMENT.to_string(),
            reference_id: payment_id.to_string(),
        }
    }

    pub fn refund(payment_id: Uuid) -> Self {
        Self {
            reference_type: Self::TYPE_REFUND.to_string(),
            reference_id: payment_id.to_string(),
        }
    }

    /// Exactly-once key for a billing-period grant.
    pub fn subscription_period(subscription_id: Uuid, period_start: DateTime<Utc>) -> Self {
        Self {
            reference_type: Self::TYPE_SUBSCRIPTION_PERIOD.to_string(),
            reference_id: format!("{}:{}", subscription_id, period_start.timestamp()),
        }
    }

    /// Exactly-once key for the expiry sweep of one grant lot.
    pub fn grant_expiry(grant_transaction_id: Uuid) -> Self {
        Self {
            reference_type: Self::TYPE_GRANT_EXPIRY.to_string(),
            reference_id: grant_transaction_id.to_string(),
        }
    }

    /// Exactly-once key for expiring one lapsed monthly window.
    pub fn monthly_expiry(user_id: Uuid, reset_at: DateTime<Utc>) -> Self {
        Self {
            reference_type: Self::TYPE_MONTHLY_EXPIRY.to_string(),
            reference_id: format!("{}:{}", user_id, reset_at.timestamp()),
        }
    }
}

/// Full request handed to the credit repository: the operation plus the
/// bookkeeping that ends up on the appended row.
#[derive(Debug, Clone)]
pub struct RecordCreditTransaction {
    pub user_id: Uuid,
    pub op: LedgerOp,
    pub reference: Option<LedgerReference>,
    pub expires_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

impl RecordCreditTransaction {
    pub fn new(user_id: Uuid, op: LedgerOp) -> Self {
        Self {
            user_id,
            op,
            reference: None,
            expires_at: None,
            description: None,
        }
    }

    pub fn with_reference(mut self, reference: LedgerReference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn apply(snapshot: &mut BalanceSnapshot, op: LedgerOp, now: DateTime<Utc>) -> PlannedTransaction {
        let planned = op.plan(snapshot, now).unwrap();
        *snapshot = planned.next.clone();
        planned
    }

    #[test]
    fn grant_then_consume_then_reject_scenario() {
        // The canonical scenario: 0 -> 1000 -> 700 -> rejected debit of 800.
        let now = Utc::now();
        let mut balance = BalanceSnapshot::default();

        let grant = apply(
            &mut balance,
            LedgerOp::Grant {
                kind: CreditTransactionKind::Subscription,
                amount: 1000,
                monthly_reset_at: Some(now + Duration::days(30)),
            },
            now,
        );
        assert_eq!(grant.balance_before, 0);
        assert_eq!(grant.balance_after, 1000);

        let debit = apply(&mut balance, LedgerOp::Consume { amount: 300 }, now);
        assert_eq!(debit.amount, -300);
        assert_eq!(debit.balance_before, 1000);
        assert_eq!(debit.balance_after, 700);

        let rejected = LedgerOp::Consume { amount: 800 }.plan(&balance, now);
        match rejected {
            Err(LedgerError::InsufficientCredits {
                requested,
                available,
            }) => {
                assert_eq!(requested, 800);
                assert_eq!(available, 700);
            }
            other => panic!("expected InsufficientCredits, got {:?}", other.map(|p| p.amount)),
        }
        // Rejection leaves the snapshot untouched.
        assert_eq!(balance.total(), 700);
    }

    #[test]
    fn every_plan_satisfies_conservation() {
        let now = Utc::now();
        let mut balance = BalanceSnapshot::default();
        let ops = [
            LedgerOp::Grant {
                kind: CreditTransactionKind::Subscription,
                amount: 500,
                monthly_reset_at: Some(now + Duration::days(30)),
            },
            LedgerOp::Grant {
                kind: CreditTransactionKind::Purchase,
                amount: 250,
                monthly_reset_at: None,
            },
            LedgerOp::Consume { amount: 600 },
            LedgerOp::Grant {
                kind: CreditTransactionKind::Bonus,
                amount: 40,
                monthly_reset_at: None,
            },
            LedgerOp::Consume { amount: 100 },
        ];

        let mut running = 0i64;
        for op in ops {
            let planned = apply(&mut balance, op, now);
            assert_eq!(planned.balance_after, planned.balance_before + planned.amount);
            assert_eq!(planned.balance_before, running);
            running = planned.balance_after;
        }
        assert_eq!(balance.total(), running);
        assert_eq!(balance.total_earned, 790);
        assert_eq!(balance.total_consumed, 700);
    }

    #[test]
    fn consume_takes_monthly_before_extra() {
        let now = Utc::now();
        let mut balance = BalanceSnapshot::default();
        apply(
            &mut balance,
            LedgerOp::Grant {
                kind: CreditTransactionKind::Subscription,
                amount: 100,
                monthly_reset_at: Some(now + Duration::days(30)),
            },
            now,
        );
        apply(
            &mut balance,
            LedgerOp::Grant {
                kind: CreditTransactionKind::Purchase,
                amount: 100,
                monthly_reset_at: None,
            },
            now,
        );

        // 130 splits into the full monthly remainder plus 30 extra.
        apply(&mut balance, LedgerOp::Consume { amount: 130 }, now);
        assert_eq!(balance.monthly_used, 100);
        assert_eq!(balance.extra_used, 30);
        assert_eq!(balance.total(), 70);
    }

    #[test]
    fn expired_monthly_remainder_is_not_consumable() {
        let now = Utc::now();
        let mut balance = BalanceSnapshot::default();
        apply(
            &mut balance,
            LedgerOp::Grant {
                kind: CreditTransactionKind::Subscription,
                amount: 100,
                monthly_reset_at: Some(now - Duration::hours(1)),
            },
            now,
        );
        apply(
            &mut balance,
            LedgerOp::Grant {
                kind: CreditTransactionKind::Purchase,
                amount: 50,
                monthly_reset_at: None,
            },
            now,
        );

        // Only the 50 extra credits are spendable; the lapsed 100 wait for
        // the expiry sweep.
        assert_eq!(balance.consumable_total(now), 50);
        let err = LedgerOp::Consume { amount: 60 }.plan(&balance, now).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientCredits { available: 50, .. }
        ));

        let ok = LedgerOp::Consume { amount: 50 }.plan(&balance, now).unwrap();
        assert_eq!(ok.next.extra_used, 50);
        assert_eq!(ok.next.monthly_used, 0);
    }

    #[test]
    fn expire_monthly_records_the_full_remainder() {
        let now = Utc::now();
        let mut balance = BalanceSnapshot::default();
        apply(
            &mut balance,
            LedgerOp::Grant {
                kind: CreditTransactionKind::Subscription,
                amount: 100,
                monthly_reset_at: Some(now - Duration::hours(1)),
            },
            now,
        );
        apply(&mut balance, LedgerOp::Consume { amount: 25 }, now - Duration::days(1));

        let expired = apply(&mut balance, LedgerOp::ExpireMonthly, now);
        assert_eq!(expired.kind, CreditTransactionKind::Expiration);
        assert_eq!(expired.amount, -75);
        assert_eq!(balance.monthly_remaining(), 0);

        // Idempotent at the math level too: nothing left, second plan fails.
        assert!(LedgerOp::ExpireMonthly.plan(&balance, now).is_err());
    }

    #[test]
    fn expire_extra_is_capped_by_the_remainder() {
        let now = Utc::now();
        let mut balance = BalanceSnapshot::default();
        apply(
            &mut balance,
            LedgerOp::Grant {
                kind: CreditTransactionKind::Purchase,
                amount: 100,
                monthly_reset_at: None,
            },
            now,
        );
        apply(&mut balance, LedgerOp::Consume { amount: 80 }, now);

        // The lot was 100 but only 20 remain unconsumed.
        let expired = apply(&mut balance, LedgerOp::ExpireExtra { amount: 100 }, now);
        assert_eq!(expired.amount, -20);
        assert_eq!(balance.extra_remaining(), 0);
    }

    #[test]
    fn reclaim_takes_extra_before_monthly_and_is_capped() {
        let now = Utc::now();
        let mut balance = BalanceSnapshot::default();
        apply(
            &mut balance,
            LedgerOp::Grant {
                kind: CreditTransactionKind::Subscription,
                amount: 100,
                monthly_reset_at: Some(now + Duration::days(30)),
            },
            now,
        );
        apply(
            &mut balance,
            LedgerOp::Grant {
                kind: CreditTransactionKind::Purchase,
                amount: 50,
                monthly_reset_at: None,
            },
            now,
        );

        let reclaimed = apply(&mut balance, LedgerOp::Reclaim { amount: 120 }, now);
        assert_eq!(reclaimed.kind, CreditTransactionKind::Refund);
        assert_eq!(reclaimed.amount, -120);
        assert_eq!(balance.extra_used, 50);
        assert_eq!(balance.monthly_used, 70);

        // Balance only holds 30 now; a 200 reclaim is capped to it.
        let capped = apply(&mut balance, LedgerOp::Reclaim { amount: 200 }, now);
        assert_eq!(capped.amount, -30);
        assert_eq!(balance.total(), 0);
    }

    #[test]
    fn sequential_debits_drain_exactly_to_zero() {
        // N debits of A against (N-1)*A: N-1 succeed, the last is rejected.
        let now = Utc::now();
        let mut balance = BalanceSnapshot::default();
        apply(
            &mut balance,
            LedgerOp::Grant {
                kind: CreditTransactionKind::Purchase,
                amount: 400,
                monthly_reset_at: None,
            },
            now,
        );

        let mut successes = 0;
        let mut rejections = 0;
        for _ in 0..5 {
            match (LedgerOp::Consume { amount: 100 }).plan(&balance, now) {
                Ok(planned) => {
                    balance = planned.next;
                    successes += 1;
                }
                Err(LedgerError::InsufficientCredits { .. }) => rejections += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 4);
        assert_eq!(rejections, 1);
        assert_eq!(balance.total(), 0);
    }

    #[test]
    fn invalid_amounts_are_rejected_before_any_mutation() {
        let now = Utc::now();
        let balance = BalanceSnapshot::default();
        assert!(matches!(
            LedgerOp::Consume { amount: 0 }.plan(&balance, now),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            LedgerOp::Grant {
                kind: CreditTransactionKind::Purchase,
                amount: -5,
                monthly_reset_at: None,
            }
            .plan(&balance, now),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            LedgerOp::Grant {
                kind: CreditTransactionKind::Consumption,
                amount: 10,
                monthly_reset_at: None,
            }
            .plan(&balance, now),
            Err(LedgerError::Validation(_))
        ));
    }
}
