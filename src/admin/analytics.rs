//! Revenue and order statistics for the admin console

use anyhow::Result;
use serde::Serialize;

use crate::models::OrderStatus;
use crate::store::{OrderStore, ServiceUsage};

const TOP_SERVICES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusCount {
    pub status: OrderStatus,
    pub count: i64,
}

/// Split of completed revenue between providers and the platform
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RevenueSplit {
    pub revenue: f64,
    pub master_share_percent: f64,
    pub master_cost: f64,
    pub profit: f64,
}

pub fn split_revenue(revenue: f64, master_share_percent: f64) -> RevenueSplit {
    let master_cost = revenue * master_share_percent / 100.0;
    RevenueSplit {
        revenue,
        master_share_percent,
        master_cost,
        profit: revenue - master_cost,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Analytics {
    pub total_orders: i64,
    /// Every status, zero when no order has it
    pub status_counts: Vec<StatusCount>,
    #[serde(flatten)]
    pub revenue: RevenueSplit,
    pub top_services: Vec<ServiceUsage>,
}

pub async fn compute(store: &dyn OrderStore, master_share_percent: f64) -> Result<Analytics> {
    let counts = store.status_counts().await?;
    let status_counts: Vec<StatusCount> = OrderStatus::ALL
        .into_iter()
        .map(|status| StatusCount {
            status,
            count: counts
                .iter()
                .find(|(s, _)| *s == status)
                .map(|(_, count)| *count)
                .unwrap_or(0),
        })
        .collect();

    let revenue = store.completed_revenue().await?;

    Ok(Analytics {
        total_orders: status_counts.iter().map(|c| c.count).sum(),
        status_counts,
        revenue: split_revenue(revenue, master_share_percent),
        top_services: store.top_services(TOP_SERVICES).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revenue_split() {
        let split = split_revenue(200_000.0, 30.0);
        assert_eq!(split.master_cost, 60_000.0);
        assert_eq!(split.profit, 140_000.0);
    }

    #[test]
    fn test_zero_revenue() {
        let split = split_revenue(0.0, 30.0);
        assert_eq!(split.master_cost, 0.0);
        assert_eq!(split.profit, 0.0);
    }
}
