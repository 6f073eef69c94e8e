use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::payments;

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = payments)]
pub struct PaymentEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub provider: String,
    pub provider_payment_id: Option<String>,
    pub provider_session_ref: Option<String>,
    pub amount_minor: i32,
    pub currency: String,
    pub status: String,
    pub attempts: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = payments)]
pub struct NewPaymentEntity {
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub provider: String,
    pub provider_payment_id: Option<String>,
    pub provider_session_ref: Option<String>,
    pub amount_minor: i32,
    pub currency: String,
    pub status: String,
    pub attempts: i32,
    pub error: Option<String>,
}
