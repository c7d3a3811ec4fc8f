//! Campaign mutations sent through the platform's mutation service

use crate::error::{AdsError, AdsResult};
use tracing::{error, info};

const MICROS_PER_UNIT: f64 = 1_000_000.0;

/// Currency units for an amount in micros
pub fn micros_to_units(micros: i64) -> f64 {
    micros as f64 / MICROS_PER_UNIT
}

/// Micros for an amount in currency units, rounded to the nearest micro
pub fn units_to_micros(units: f64) -> i64 {
    (units * MICROS_PER_UNIT).round() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignStatus {
    Enabled,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDeliveryMethod {
    /// Serving is throttled evenly across the budget period
    Standard,
    /// Serving is not throttled
    Accelerated,
}

/// Sparse update of one campaign; only set fields are written
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CampaignUpdate {
    pub resource_name: String,
    pub status: Option<CampaignStatus>,
    pub target_cpa_micros: Option<i64>,
    pub campaign_budget: Option<String>,
}

impl CampaignUpdate {
    pub fn new(resource_name: impl Into<String>) -> Self {
        CampaignUpdate {
            resource_name: resource_name.into(),
            ..CampaignUpdate::default()
        }
    }

    /// Paths of the fields this update writes
    pub fn update_mask(&self) -> Vec<&'static str> {
        let mut mask = Vec::new();
        if self.status.is_some() {
            mask.push("status");
        }
        if self.target_cpa_micros.is_some() {
            mask.push("target_cpa.target_cpa_micros");
        }
        if self.campaign_budget.is_some() {
            mask.push("campaign_budget");
        }
        mask
    }
}

/// A budget to create before attaching it to a campaign
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignBudget {
    /// Non-shared budgets without a name take the campaign's name
    pub name: Option<String>,
    pub delivery_method: BudgetDeliveryMethod,
    pub explicitly_shared: bool,
    pub amount_micros: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutateResponse {
    pub resource_names: Vec<String>,
}

/// Remote write operations of the ads platform
pub trait MutationClient {
    fn mutate_campaign(&self, customer_id: &str, update: &CampaignUpdate) -> AdsResult<MutateResponse>;

    /// Create a budget and return its resource name
    fn create_campaign_budget(&self, customer_id: &str, budget: &CampaignBudget) -> AdsResult<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum CampaignMutation {
    Pause,
    Enable,
    TargetCpa { micros: i64 },
    /// Create a dedicated, non-shared budget and move the campaign onto it
    Budget {
        micros: i64,
        name: Option<String>,
        delivery_method: BudgetDeliveryMethod,
    },
}

impl CampaignMutation {
    /// Budget change with standard delivery
    pub fn budget(micros: i64, name: Option<String>) -> Self {
        CampaignMutation::Budget {
            micros,
            name,
            delivery_method: BudgetDeliveryMethod::Standard,
        }
    }
}

pub fn campaign_path(customer_id: &str, campaign_id: &str) -> String {
    format!("customers/{}/campaigns/{}", customer_id, campaign_id)
}

/// Applies [`CampaignMutation`]s for one customer
pub struct CampaignMutator<'c, C: MutationClient> {
    client: &'c C,
    customer_id: String,
}

impl<'c, C: MutationClient> CampaignMutator<'c, C> {
    pub fn new(client: &'c C, customer_id: impl Into<String>) -> Self {
        CampaignMutator {
            client,
            customer_id: customer_id.into(),
        }
    }

    pub fn mutate(&self, campaign_id: &str, mutation: &CampaignMutation) -> AdsResult<MutateResponse> {
        let result = self.prepare(campaign_id, mutation).and_then(|update| {
            info!(
                customer_id = %self.customer_id,
                campaign = %update.resource_name,
                mask = ?update.update_mask(),
                "Updating campaign"
            );
            self.client.mutate_campaign(&self.customer_id, &update)
        });

        if let Err(err) = &result {
            log_failure(err);
        }
        result
    }

    fn prepare(&self, campaign_id: &str, mutation: &CampaignMutation) -> AdsResult<CampaignUpdate> {
        let mut update = CampaignUpdate::new(campaign_path(&self.customer_id, campaign_id));

        match mutation {
            CampaignMutation::Pause => update.status = Some(CampaignStatus::Paused),
            CampaignMutation::Enable => update.status = Some(CampaignStatus::Enabled),
            CampaignMutation::TargetCpa { micros } => update.target_cpa_micros = Some(*micros),
            CampaignMutation::Budget {
                micros,
                name,
                delivery_method,
            } => {
                let budget = CampaignBudget {
                    name: name.clone(),
                    delivery_method: *delivery_method,
                    explicitly_shared: false,
                    amount_micros: *micros,
                };
                let budget_resource = self.client.create_campaign_budget(&self.customer_id, &budget)?;
                update.campaign_budget = Some(budget_resource);
            }
        }

        Ok(update)
    }
}

fn log_failure(err: &AdsError) {
    match err {
        AdsError::Remote(failure) => {
            error!(request_id = %failure.request_id, status = %failure.status, "Mutation failed");
            for field_error in &failure.errors {
                error!("  {}", field_error);
            }
        }
        other => error!("Mutation failed: {}", other),
    }
}
