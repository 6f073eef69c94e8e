use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::payments::{NewPaymentEntity, PaymentEntity};
use crate::domain::value_objects::enums::payment_statuses::PaymentStatus;

#[async_trait]
#[automock]
pub trait PaymentRepository {
    async fn record_payment(&self, payment: NewPaymentEntity) -> Result<Uuid>;

    async fn find_by_id(&self, payment_id: Uuid) -> Result<Option<PaymentEntity>>;

    /// Lookup by the gateway transaction id — the webhook idempotence key.
    async fn find_by_provider_payment_id(
        &self,
        provider_payment_id: &str,
    ) -> Result<Option<PaymentEntity>>;

    async fn find_by_provider_session_ref(
        &self,
        provider_session_ref: &str,
    ) -> Result<Option<PaymentEntity>>;

    async fn update_status(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        provider_payment_id: Option<String>,
        error: Option<String>,
    ) -> Result<()>;

    async fn increment_attempts(&self, payment_id: Uuid) -> Result<i32>;
}
