use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::{Connection, OptionalExtension, RunQueryDsl, insert_into, prelude::*, update};
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{
        postgres_connection::PgPoolSquad,
        schema::{credit_balances, credit_transactions},
    },
};
use domain::{
    entities::credits::{
        CreditBalanceEntity, CreditTransactionEntity, NewCreditBalanceEntity,
        NewCreditTransactionEntity,
    },
    repositories::credits::CreditRepository,
    value_objects::{
        credits::{LedgerError, LedgerReference, RecordCreditTransaction},
        enums::credit_transaction_kinds::CreditTransactionKind,
    },
};

impl From<DieselError> for LedgerError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                LedgerError::DuplicateOperation
            }
            DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => {
                LedgerError::ConcurrencyConflict
            }
            other => LedgerError::Internal(other.into()),
        }
    }
}

pub struct CreditPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl CreditPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }

    /// Locks the user's balance row, inserting the zero row on first touch.
    fn lock_balance_row(
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<CreditBalanceEntity, LedgerError> {
        let locked = credit_balances::table
            .filter(credit_balances::user_id.eq(user_id))
            .for_update()
            .select(CreditBalanceEntity::as_select())
            .first::<CreditBalanceEntity>(conn)
            .optional()?;

        if let Some(balance) = locked {
            return Ok(balance);
        }

        insert_into(credit_balances::table)
            .values(&NewCreditBalanceEntity {
                user_id,
                monthly_credits: 0,
                monthly_used: 0,
                extra_credits: 0,
                extra_used: 0,
                total_earned: 0,
                total_consumed: 0,
                monthly_reset_at: None,
                version: 0,
            })
            .on_conflict(credit_balances::user_id)
            .do_nothing()
            .execute(conn)?;

        let balance = credit_balances::table
            .filter(credit_balances::user_id.eq(user_id))
            .for_update()
            .select(CreditBalanceEntity::as_select())
            .first::<CreditBalanceEntity>(conn)?;

        Ok(balance)
    }
}

#[async_trait]
impl CreditRepository for CreditPostgres {
    async fn record_transaction(
        &self,
        request: RecordCreditTransaction,
    ) -> Result<CreditTransactionEntity, LedgerError> {
        let mut conn = Arc::clone(&self.db_pool)
            .get()
            .map_err(|err| LedgerError::Internal(err.into()))?;
        let now = Utc::now();

        conn.transaction::<CreditTransactionEntity, LedgerError, _>(|conn| {
            // Replay detection up front: webhook retries must short-circuit
            // before any balance math runs.
            if let Some(reference) = &request.reference {
                let already_applied = credit_transactions::table
                    .filter(credit_transactions::reference_type.eq(&reference.reference_type))
                    .filter(credit_transactions::reference_id.eq(&reference.reference_id))
                    .select(credit_transactions::id)
                    .first::<Uuid>(conn)
                    .optional()?;

                if already_applied.is_some() {
                    return Err(LedgerError::DuplicateOperation);
                }
            }

            let balance = Self::lock_balance_row(conn, request.user_id)?;
            let planned = request.op.plan(&balance.snapshot(), now)?;

            let row = insert_into(credit_transactions::table)
                .values(&NewCreditTransactionEntity {
                    user_id: request.user_id,
                    kind: planned.kind.to_string(),
                    amount: planned.amount,
                    balance_before: planned.balance_before,
                    balance_after: planned.balance_after,
                    reference_type: request
                        .reference
                        .as_ref()
                        .map(|r| r.reference_type.clone()),
                    reference_id: request.reference.as_ref().map(|r| r.reference_id.clone()),
                    expires_at: request.expires_at,
                    description: request.description.clone(),
                })
                .returning(CreditTransactionEntity::as_returning())
                .get_result::<CreditTransactionEntity>(conn)?;

            // The row lock serializes writers; the version CAS stays as a
            // second guard on the cache write.
            let updated = update(
                credit_balances::table
                    .filter(credit_balances::user_id.eq(request.user_id))
                    .filter(credit_balances::version.eq(balance.version)),
            )
            .set((
                credit_balances::monthly_credits.eq(planned.next.monthly_credits),
                credit_balances::monthly_used.eq(planned.next.monthly_used),
                credit_balances::extra_credits.eq(planned.next.extra_credits),
                credit_balances::extra_used.eq(planned.next.extra_used),
                credit_balances::total_earned.eq(planned.next.total_earned),
                credit_balances::total_consumed.eq(planned.next.total_consumed),
                credit_balances::monthly_reset_at.eq(planned.next.monthly_reset_at),
                credit_balances::version.eq(balance.version + 1),
                credit_balances::updated_at.eq(now),
            ))
            .execute(conn)?;

            if updated == 0 {
                return Err(LedgerError::ConcurrencyConflict);
            }

            Ok(row)
        })
    }

    async fn get_balance(&self, user_id: Uuid) -> Result<Option<CreditBalanceEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let balance = credit_balances::table
            .filter(credit_balances::user_id.eq(user_id))
            .select(CreditBalanceEntity::as_select())
            .first::<CreditBalanceEntity>(&mut conn)
            .optional()?;

        Ok(balance)
    }

    async fn list_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<CreditTransactionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let transactions = credit_transactions::table
            .filter(credit_transactions::user_id.eq(user_id))
            .order(credit_transactions::created_at.desc())
            .limit(limit)
            .offset(offset)
            .select(CreditTransactionEntity::as_select())
            .load::<CreditTransactionEntity>(&mut conn)?;

        Ok(transactions)
    }

    async fn find_by_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> Result<Option<CreditTransactionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let transaction = credit_transactions::table
            .filter(credit_transactions::reference_type.eq(reference_type))
            .filter(credit_transactions::reference_id.eq(reference_id))
            .select(CreditTransactionEntity::as_select())
            .first::<CreditTransactionEntity>(&mut conn)
            .optional()?;

        Ok(transaction)
    }

    async fn list_expired_unswept_grants(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CreditTransactionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        // Subscription grants are excluded: their lapse is handled through
        // the monthly window, not per-lot.
        let candidates = credit_transactions::table
            .filter(credit_transactions::amount.gt(0))
            .filter(credit_transactions::kind.ne(CreditTransactionKind::Subscription.to_string()))
            .filter(credit_transactions::expires_at.le(now))
            .order(credit_transactions::expires_at.asc())
            .limit(limit)
            .select(CreditTransactionEntity::as_select())
            .load::<CreditTransactionEntity>(&mut conn)?;

        if candidates.is_empty() {
            return Ok(candidates);
        }

        let candidate_ids: Vec<String> = candidates.iter().map(|tx| tx.id.to_string()).collect();
        let swept: HashSet<String> = credit_transactions::table
            .filter(credit_transactions::reference_type.eq(LedgerReference::TYPE_GRANT_EXPIRY))
            .filter(credit_transactions::reference_id.eq_any(&candidate_ids))
            .select(credit_transactions::reference_id)
            .load::<Option<String>>(&mut conn)?
            .into_iter()
            .flatten()
            .collect();

        Ok(candidates
            .into_iter()
            .filter(|tx| !swept.contains(&tx.id.to_string()))
            .collect())
    }

    async fn list_lapsed_monthly_balances(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<CreditBalanceEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let balances = credit_balances::table
            .filter(credit_balances::monthly_reset_at.le(now))
            .filter(credit_balances::monthly_credits.gt(credit_balances::monthly_used))
            .order(credit_balances::monthly_reset_at.asc())
            .limit(limit)
            .select(CreditBalanceEntity::as_select())
            .load::<CreditBalanceEntity>(&mut conn)?;

        Ok(balances)
    }
}
