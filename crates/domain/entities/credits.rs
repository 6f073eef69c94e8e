use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::value_objects::credits::BalanceSnapshot;
use crate::infra::db::postgres::schema::{credit_balances, credit_transactions};

/// One append-only ledger row. Never updated after insert.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = credit_transactions)]
pub struct CreditTransactionEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = credit_transactions)]
pub struct NewCreditTransactionEntity {
    pub user_id: Uuid,
    pub kind: String,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

/// Denormalized projection of the ledger, one row per user. Owned
/// exclusively by the credit repository; no other component writes it.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = credit_balances)]
#[diesel(primary_key(user_id))]
pub struct CreditBalanceEntity {
    pub user_id: Uuid,
    pub monthly_credits: i64,
    pub monthly_used: i64,
    pub extra_credits: i64,
    pub extra_used: i64,
    pub total_earned: i64,
    pub total_consumed: i64,
    pub monthly_reset_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl CreditBalanceEntity {
    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            monthly_credits: self.monthly_credits,
            monthly_used: self.monthly_used,
            extra_credits: self.extra_credits,
            extra_used: self.extra_used,
            total_earned: self.total_earned,
            total_consumed: self.total_consumed,
            monthly_reset_at: self.monthly_reset_at,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = credit_balances)]
pub struct NewCreditBalanceEntity {
    pub user_id: Uuid,
    pub monthly_credits: i64,
    pub monthly_used: i64,
    pub extra_credits: i64,
    pub extra_used: i64,
    pub total_earned: i64,
    pub total_consumed: i64,
    pub monthly_reset_at: Option<DateTime<Utc>>,
    pub version: i64,
}
