//! Efficiency ranking of creatives. Pure and deterministic.

use std::cmp::Ordering;

use db::models::top_performer::MetricsSnapshot;

use super::ads_platform::CreativeMetric;

pub const DEFAULT_TOP_K: usize = 3;

/// Conversions per unit of spend; 0 when nothing was spent
pub fn efficiency(conversions: f64, spend: f64) -> f64 {
    if spend > 0.0 && conversions.is_finite() {
        (conversions / spend).max(0.0)
    } else {
        0.0
    }
}

/// A creative that made the cut, with its 1-based rank
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCreative {
    pub rank: i32,
    pub efficiency: f64,
    pub metric: CreativeMetric,
}

impl RankedCreative {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            impressions: self.metric.impressions,
            clicks: self.metric.clicks,
            click_rate: self.metric.click_rate,
            conversions: self.metric.conversions,
            spend: self.metric.spend,
            efficiency: self.efficiency,
            reach: self.metric.reach,
        }
    }
}

/// Aggregate rows and zero-delivery entries are not creatives
fn is_creative(metric: &CreativeMetric) -> bool {
    metric.impressions > 0 && !metric.creative_name.trim().is_empty()
}

/// Best first: efficiency desc, then spend desc, then creative id asc
fn compare(a: &(f64, &CreativeMetric), b: &(f64, &CreativeMetric)) -> Ordering {
    b.0.total_cmp(&a.0)
        .then_with(|| b.1.spend.total_cmp(&a.1.spend))
        .then_with(|| a.1.creative_id.cmp(&b.1.creative_id))
}

/// Rank creatives by efficiency and keep the best `top_k`.
/// Returns fewer than `top_k` (possibly none) when not enough creatives qualify.
pub fn rank_creatives(metrics: &[CreativeMetric], top_k: usize) -> Vec<RankedCreative> {
    let mut scored: Vec<(f64, &CreativeMetric)> = metrics
        .iter()
        .filter(|m| is_creative(m))
        .map(|m| (efficiency(m.conversions, m.spend), m))
        .collect();

    scored.sort_by(compare);

    scored
        .into_iter()
        .take(top_k)
        .enumerate()
        .map(|(idx, (efficiency, metric))| RankedCreative {
            rank: idx as i32 + 1,
            efficiency,
            metric: metric.clone(),
        })
        .collect()
}
