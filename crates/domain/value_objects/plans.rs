use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entities::plans::{PlanEntity, PlanPriceEntity};
use crate::domain::value_objects::enums::billing_intervals::BillingInterval;

/// Limits and feature flags attached to a plan. Stored as JSONB in the
/// database.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PlanFeatures {
    #[serde(default)]
    pub max_concurrent_jobs: Option<i32>,

    #[serde(default)]
    pub max_resolution: Option<i32>,

    #[serde(default)]
    pub priority_queue: Option<bool>,

    #[serde(default)]
    pub api_access: Option<bool>,

    #[serde(default)]
    pub commercial_use: Option<bool>,
}

impl PlanFeatures {
    pub fn max_concurrent_jobs_or_default(&self) -> i32 {
        self.max_concurrent_jobs.unwrap_or(1)
    }

    pub fn has_priority_queue(&self) -> bool {
        self.priority_queue.unwrap_or(false)
    }

    pub fn has_api_access(&self) -> bool {
        self.api_access.unwrap_or(false)
    }
}

#[derive(Debug, Serialize)]
pub struct PlanPriceDto {
    pub currency: String,
    pub interval: BillingInterval,
    pub amount_minor: i32,
}

impl From<PlanPriceEntity> for PlanPriceDto {
    fn from(value: PlanPriceEntity) -> Self {
        Self {
            interval: BillingInterval::from_str(&value.interval).unwrap_or_default(),
            currency: value.currency,
            amount_minor: value.amount_minor,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PlanDto {
    pub id: Uuid,
    pub name: String,
    pub monthly_credits: i64,
    pub trial_days: i32,
    pub features: PlanFeatures,
    pub is_featured: bool,
    pub prices: Vec<PlanPriceDto>,
}

impl PlanDto {
    pub fn from_entity(plan: PlanEntity, prices: Vec<PlanPriceEntity>) -> Self {
        Self {
            id: plan.id,
            name: plan.name,
            monthly_credits: plan.monthly_credits,
            trial_days: plan.trial_days,
            features: plan.features,
            is_featured: plan.is_featured,
            prices: prices.into_iter().map(PlanPriceDto::from).collect(),
        }
    }
}
