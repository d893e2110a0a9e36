//! Customer lifetime value and retention ROI over a scored batch.

use crate::config::RoiConfig;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Per-customer inputs to the value model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiInput {
    pub id: i64,
    pub balance: f64,
    pub num_of_products: f64,
    pub has_cr_card: f64,
    pub is_active_member: f64,
    pub churn_probability: f64,
}

/// Value estimate for one customer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CustomerValue {
    pub id: i64,
    pub churn_probability: f64,
    pub annual_profit: f64,
    pub expected_lifespan: f64,
    pub ltv: f64,
    /// Expected net return of one retention action
    pub enr: f64,
}

/// Aggregate retention economics of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RoiSummary {
    pub total_ltv: f64,
    pub actionable_count: usize,
    pub total_net_enr: f64,
    pub retention_cost: f64,
    pub total_roi: f64,
    /// Actionable customers with the highest ENR, best first
    pub top_targets: Vec<CustomerValue>,
}

/// Retention value model parameterized by business constants
pub struct RoiCalculator {
    config: RoiConfig,
    top_n: usize,
}

impl RoiCalculator {
    pub fn new(config: RoiConfig) -> Self {
        Self { config, top_n: 10 }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn value(&self, input: &RoiInput) -> CustomerValue {
        let c = &self.config;
        let active_card = if input.has_cr_card == 1.0 && input.is_active_member == 1.0 {
            1.0
        } else {
            0.0
        };
        let annual_profit = input.balance * c.nim_rate
            + input.num_of_products * c.product_profit
            + active_card * c.active_card_profit;
        let expected_lifespan = (1.0 / input.churn_probability.max(1e-6)).min(c.max_lifespan);
        let ltv = annual_profit * expected_lifespan;
        let enr = ltv * input.churn_probability * c.success_rate - c.retention_cost;

        CustomerValue {
            id: input.id,
            churn_probability: input.churn_probability,
            annual_profit,
            expected_lifespan,
            ltv,
            enr,
        }
    }

    pub fn summarize(&self, inputs: &[RoiInput]) -> RoiSummary {
        let values: Vec<CustomerValue> = inputs.iter().map(|i| self.value(i)).collect();

        let total_ltv = values.iter().map(|v| v.ltv).sum();
        let mut actionable: Vec<CustomerValue> =
            values.into_iter().filter(|v| v.enr > 0.0).collect();
        actionable.sort_by(|a, b| b.enr.partial_cmp(&a.enr).unwrap_or(Ordering::Equal));

        let actionable_count = actionable.len();
        let total_net_enr = actionable.iter().map(|v| v.enr).sum();
        let retention_cost = actionable_count as f64 * self.config.retention_cost;
        let total_roi = if retention_cost > 0.0 {
            total_net_enr / retention_cost
        } else {
            0.0
        };
        actionable.truncate(self.top_n);

        RoiSummary {
            total_ltv,
            actionable_count,
            total_net_enr,
            retention_cost,
            total_roi,
            top_targets: actionable,
        }
    }
}
