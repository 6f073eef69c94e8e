use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::credits::{CreditBalanceEntity, CreditTransactionEntity};
use crate::domain::value_objects::credits::{LedgerError, RecordCreditTransaction};

/// Owner of both the append-only ledger and the balance cache. The two are
/// written together inside one database transaction; no other component
/// writes either table.
#[async_trait]
#[automock]
pub trait CreditRepository {
    /// Plans and applies one ledger operation atomically: reads the balance
    /// row under a lock, checks preconditions, appends the row, writes the
    /// updated cache. Replayed references surface as
    /// `LedgerError::DuplicateOperation`.
    async fn record_transaction(
        &self,
        request: RecordCreditTransaction,
    ) -> Result<CreditTransactionEntity, LedgerError>;

    /// The cache row, if the user has ever touched the ledger.
    async fn get_balance(&self, user_id: Uuid) -> Result<Option<CreditBalanceEntity>>;

    async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CreditTransactionEntity>>;

    async fn find_by_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> Result<Option<CreditTransactionEntity>>;

    /// Grant rows whose `expires_at` has lapsed and that have no
    /// `grant_expiry` row referencing them yet.
    async fn list_expired_unswept_grants(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CreditTransactionEntity>>;

    /// Balance rows whose monthly window lapsed with a remainder left.
    async fn list_lapsed_monthly_balances(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CreditBalanceEntity>>;
}
