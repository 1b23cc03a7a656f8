//! Price catalogue rules
//!
//! Prices are addressed by lookup keys of the form `{plan}_{interval}`, e.g.
//! `pro_monthly` or `premium_annually`. Plans rank basic < pro < premium and
//! both intervals of a plan share its rank.

use crate::domain::entities::{BillingInterval, PlanType};

/// Plans offered through self-serve checkout
pub const SELF_SERVE_PLANS: [PlanType; 3] = [PlanType::Basic, PlanType::Pro, PlanType::Premium];

/// How a subscription moved between two prices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanChange {
    Upgrade,
    Downgrade,
    /// Same rank; an interval switch or no price change
    Lateral,
    /// One side has no rank (missing key or enterprise)
    Unranked,
}

impl std::fmt::Display for PlanChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PlanChange::Upgrade => "upgrade",
            PlanChange::Downgrade => "downgrade",
            PlanChange::Lateral => "lateral",
            PlanChange::Unranked => "unranked",
        })
    }
}

/// Plan named by the first `_` token of a lookup key, `basic` when unknown
pub fn plan_type_from_lookup_key(lookup_key: Option<&str>) -> PlanType {
    let token = lookup_key
        .and_then(|key| key.split('_').next())
        .unwrap_or_default();
    match token {
        "pro" => PlanType::Pro,
        "premium" => PlanType::Premium,
        "enterprise" => PlanType::Enterprise,
        _ => PlanType::Basic,
    }
}

/// Interval named by the lookup-key suffix
pub fn interval_from_lookup_key(lookup_key: &str) -> Option<BillingInterval> {
    match lookup_key.rsplit_once('_')?.1 {
        "monthly" => Some(BillingInterval::Month),
        "annually" => Some(BillingInterval::Year),
        _ => None,
    }
}

pub fn lookup_key(plan: PlanType, interval: BillingInterval) -> String {
    format!("{}_{}", plan.as_str(), interval.lookup_suffix())
}

/// Rank of a self-serve lookup key
pub fn plan_rank(lookup_key: &str) -> Option<u8> {
    interval_from_lookup_key(lookup_key)?;
    match lookup_key.split('_').next()? {
        "basic" => Some(1),
        "pro" => Some(2),
        "premium" => Some(3),
        _ => None,
    }
}

pub fn classify_change(current: Option<&str>, new: Option<&str>) -> PlanChange {
    match (current.and_then(plan_rank), new.and_then(plan_rank)) {
        (Some(from), Some(to)) if to > from => PlanChange::Upgrade,
        (Some(from), Some(to)) if to < from => PlanChange::Downgrade,
        (Some(_), Some(_)) => PlanChange::Lateral,
        _ => PlanChange::Unranked,
    }
}

/// The same plan billed at the other interval
///
/// Defined only for the self-serve catalogue: `pro_monthly` ↔ `pro_annually`.
pub fn alternate_lookup_key(lookup_key: &str) -> Option<String> {
    let (plan, suffix) = lookup_key.rsplit_once('_')?;
    let plan = SELF_SERVE_PLANS.into_iter().find(|p| p.as_str() == plan)?;
    let other = match suffix {
        "monthly" => BillingInterval::Year,
        "annually" => BillingInterval::Month,
        _ => return None,
    };
    Some(self::lookup_key(plan, other))
}
