use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use diesel::{OptionalExtension, RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::payments},
};
use domain::{
    entities::payments::{NewPaymentEntity, PaymentEntity},
    repositories::payments::PaymentRepository,
    value_objects::enums::payment_statuses::PaymentStatus,
};

pub struct PaymentPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PaymentPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PaymentRepository for PaymentPostgres {
    async fn record_payment(&self, payment: NewPaymentEntity) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let payment_id = insert_into(payments::table)
            .values(&payment)
            .returning(payments::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(payment_id)
    }

    async fn find_by_id(&self, payment_id: Uuid) -> Result<Option<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let payment = payments::table
            .filter(payments::id.eq(payment_id))
            .select(PaymentEntity::as_select())
            .first::<PaymentEntity>(&mut conn)
            .optional()?;

        Ok(payment)
    }

    async fn find_by_provider_payment_id(
        &self,
        provider_payment_id: &str,
    ) -> Result<Option<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let payment = payments::table
            .filter(payments::provider_payment_id.eq(provider_payment_id))
            .select(PaymentEntity::as_select())
            .first::<PaymentEntity>(&mut conn)
            .optional()?;

        Ok(payment)
    }

    async fn find_by_provider_session_ref(
        &self,
        provider_session_ref: &str,
    ) -> Result<Option<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let payment = payments::table
            .filter(payments::provider_session_ref.eq(provider_session_ref))
            .select(PaymentEntity::as_select())
            .first::<PaymentEntity>(&mut conn)
            .optional()?;

        Ok(payment)
    }

    async fn update_status(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        provider_payment_id: Option<String>,
        error: Option<String>,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        match provider_payment_id {
            Some(provider_payment_id) => {
                update(payments::table.filter(payments::id.eq(payment_id)))
                    .set((
                        payments::status.eq(status.to_string()),
                        payments::provider_payment_id.eq(Some(provider_payment_id)),
                        payments::error.eq(error),
                        payments::updated_at.eq(Utc::now()),
                    ))
                    .execute(&mut conn)?;
            }
            None => {
                update(payments::table.filter(payments::id.eq(payment_id)))
                    .set((
                        payments::status.eq(status.to_string()),
                        payments::error.eq(error),
                        payments::updated_at.eq(Utc::now()),
                    ))
                    .execute(&mut conn)?;
            }
        }

        Ok(())
    }

    async fn increment_attempts(&self, payment_id: Uuid) -> Result<i32> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let attempts = update(payments::table.filter(payments::id.eq(payment_id)))
            .set((
                payments::attempts.eq(payments::attempts + 1),
                payments::updated_at.eq(Utc::now()),
            ))
            .returning(payments::attempts)
            .get_result::<i32>(&mut conn)?;

        Ok(attempts)
    }
}
