// src/dashboard.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

use crate::domain::{Agent, AgentStatus, Contract, GlobalTarget};
use crate::hierarchy::normalize_code;
use crate::period::ReportMonth;
use crate::rollup::{is_issued_in, is_submitted_in, percent};

const TOP_LIST_SIZE: usize = 10;

/// Targets used when a month has no stored global target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DashboardDefaults {
    pub fyp_target: Decimal,
    pub active_target: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusTotals<T> {
    pub submitted: T,
    pub issued: T,
    pub pending: T,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayStats {
    pub submitted_count: u32,
    pub issued_count: u32,
    pub fyp_submitted: Decimal,
    pub fyp_issued: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manpower {
    pub total: u32,
    pub active: u32,
    pub active_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Actuals {
    pub fyp: StatusTotals<Decimal>,
    pub cc: StatusTotals<u32>,
    pub manpower: Manpower,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Targets {
    pub fyp: Decimal,
    pub maa_1: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentPerformance {
    pub agent_code: String,
    pub name: String,
    pub rank: String,
    pub fyp_submitted: Decimal,
    pub cc_submitted: u32,
    pub fyp_issued: Decimal,
    pub cc_issued: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedAgent {
    pub stt: usize,
    #[serde(flatten)]
    pub performance: AgentPerformance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopLists {
    pub fyp: Vec<RankedAgent>,
    pub cc: Vec<RankedAgent>,
    pub fyp_issued: Vec<RankedAgent>,
    pub cc_issued: Vec<RankedAgent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardOverview {
    pub month: ReportMonth,
    pub targets: Targets,
    pub actual: Actuals,
    pub today: TodayStats,
    pub top_lists: TopLists,
}

/// The real date when `month` is the current month, else its last day.
pub fn reference_day(month: &ReportMonth, today: NaiveDate) -> NaiveDate {
    if month.contains(today) {
        today
    } else {
        month.last_day()
    }
}

/// Monthly KPIs over the contracts touching `month` and the active agents.
///
/// Manual actuals on the stored target win when positive: `actual_fyp`
/// replaces the issued FYP and `actual_active` the active headcount.
pub fn overview(
    month: &ReportMonth,
    today: NaiveDate,
    contracts: &[Contract],
    agents: &[Agent],
    target: Option<&GlobalTarget>,
    defaults: DashboardDefaults,
) -> DashboardOverview {
    let day = reference_day(month, today);
    let active_agents: Vec<&Agent> = agents
        .iter()
        .filter(|a| a.status == AgentStatus::Active)
        .collect();

    let mut fyp = StatusTotals::<Decimal>::default();
    let mut cc = StatusTotals::<u32>::default();
    let mut today_stats = TodayStats::default();

    // Insertion order is kept so equal values rank by first appearance.
    let mut order: Vec<String> = Vec::new();
    let mut performance: HashMap<String, AgentPerformance> = HashMap::new();
    for agent in &active_agents {
        let code = normalize_code(&agent.agent_code);
        if performance.contains_key(&code) {
            continue;
        }
        order.push(code.clone());
        performance.insert(
            code,
            AgentPerformance {
                agent_code: agent.agent_code.clone(),
                name: agent.full_name.clone(),
                rank: agent.display_rank(),
                ..Default::default()
            },
        );
    }

    for contract in contracts {
        let submitted = is_submitted_in(contract, month);
        let issued = is_issued_in(contract, month);
        let code = normalize_code(&contract.agent_code);

        let mut entry = if (submitted || issued) && !code.is_empty() {
            if !performance.contains_key(&code) {
                order.push(code.clone());
            }
            Some(performance.entry(code).or_insert_with(|| AgentPerformance {
                agent_code: contract.agent_code.clone(),
                name: "Unknown".to_string(),
                ..Default::default()
            }))
        } else {
            None
        };

        if submitted {
            fyp.submitted += contract.fyp;
            cc.submitted += 1;
            if let Some(perf) = entry.as_deref_mut() {
                perf.fyp_submitted += contract.fyp;
                perf.cc_submitted += 1;
            }
            if contract.submit_date == Some(day) {
                today_stats.submitted_count += 1;
                today_stats.fyp_submitted += contract.fyp;
            }
        }
        if issued {
            fyp.issued += contract.fyp;
            cc.issued += 1;
            if let Some(perf) = entry.as_deref_mut() {
                perf.fyp_issued += contract.fyp;
                perf.cc_issued += 1;
            }
            if contract.issue_date == Some(day) {
                today_stats.issued_count += 1;
                today_stats.fyp_issued += contract.fyp;
            }
        }
        if contract.is_pending() {
            fyp.pending += contract.fyp;
            cc.pending += 1;
        }
    }

    let total = active_agents.len() as u32;
    let computed_active = active_agents
        .iter()
        .filter(|a| {
            performance
                .get(&normalize_code(&a.agent_code))
                .is_some_and(|p| p.cc_submitted > 0)
        })
        .count() as u32;

    let manual_fyp = target.map(|t| t.actual_fyp).unwrap_or_default();
    let manual_active = target.map(|t| t.actual_active).unwrap_or_default();
    if manual_fyp > Decimal::ZERO {
        fyp.issued = manual_fyp;
    }
    let active = if manual_active > 0 { manual_active } else { computed_active };

    let targets = Targets {
        fyp: target
            .map(|t| t.fyp_target)
            .filter(|v| *v > Decimal::ZERO)
            .unwrap_or(defaults.fyp_target),
        maa_1: target
            .map(|t| t.active_target)
            .filter(|v| *v > 0)
            .unwrap_or(defaults.active_target),
    };

    let ranked: Vec<AgentPerformance> = order
        .iter()
        .filter_map(|code| performance.remove(code))
        .collect();

    DashboardOverview {
        month: *month,
        targets,
        actual: Actuals {
            fyp,
            cc,
            manpower: Manpower {
                total,
                active,
                active_ratio: percent(Decimal::from(active), Decimal::from(total)),
            },
        },
        today: today_stats,
        top_lists: TopLists {
            fyp: top_by(&ranked, |p| p.fyp_submitted),
            cc: top_by(&ranked, |p| Decimal::from(p.cc_submitted)),
            fyp_issued: top_by(&ranked, |p| p.fyp_issued),
            cc_issued: top_by(&ranked, |p| Decimal::from(p.cc_issued)),
        },
    }
}

/// Top entries by `metric` descending (stable); zero entries dropped after the cut.
fn top_by<F>(agents: &[AgentPerformance], metric: F) -> Vec<RankedAgent>
where
    F: Fn(&AgentPerformance) -> Decimal,
{
    let mut sorted: Vec<&AgentPerformance> = agents.iter().collect();
    sorted.sort_by(|a, b| metric(b).cmp(&metric(a)));
    sorted
        .into_iter()
        .take(TOP_LIST_SIZE)
        .filter(|p| metric(p) > Decimal::ZERO)
        .enumerate()
        .map(|(i, p)| RankedAgent {
            stt: i + 1,
            performance: p.clone(),
        })
        .collect()
}
