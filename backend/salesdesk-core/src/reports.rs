// src/reports.rs
use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use tracing::info;

use crate::domain::{Agent, Contract, Rank, TargetBook};
use crate::hierarchy::{reporting_units, ManagerOverrides};
use crate::period::ReportMonth;
use crate::rollup::{percent, ContractIndex, MemberStats};

// --- Manager Summary ---

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStats {
    pub total_agents: u32,
    pub submitted_agents: u32,
    pub active_agents: u32,
    pub active_percent: f64,
    pub fyp_target: Decimal,
    #[serde(rename = "submittedFYP")]
    pub submitted_fyp: Decimal,
    #[serde(rename = "issuedFYP")]
    pub issued_fyp: Decimal,
    pub completion_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerSummaryRow {
    pub group_code: String,
    pub manager_name: String,
    pub manager_code: String,
    pub manager_rank: String,
    pub stats: ManagerStats,
}

/// One row per reporting unit with an eligible manager, sorted by manager name.
pub fn manager_summary(
    month: &ReportMonth,
    agents: &[Agent],
    contracts: &[Contract],
    targets: &TargetBook,
    overrides: &ManagerOverrides,
) -> Vec<ManagerSummaryRow> {
    let by_agent = ContractIndex::new(contracts);

    let mut rows: Vec<ManagerSummaryRow> = reporting_units(agents, overrides)
        .into_iter()
        .map(|unit| {
            let headcount = unit.members.iter().filter(|a| a.rank != Rank::Sm).count() as u32;

            let mut submitted_agents = 0u32;
            let mut active_agents = 0u32;
            let mut totals = MemberStats::default();
            for member in &unit.members {
                let stats = MemberStats::from_contracts(by_agent.for_agent(&member.agent_code), month);
                if stats.active_by_submitted() {
                    submitted_agents += 1;
                }
                if stats.active_by_issued() {
                    active_agents += 1;
                }
                totals.absorb(&stats);
            }

            let fyp_target = targets.fyp_target(&unit.manager.agent_code);
            let manager_rank = if unit.is_override || unit.manager.rank == Rank::Sm {
                Rank::Sm.as_str().to_string()
            } else {
                unit.manager.display_rank()
            };

            ManagerSummaryRow {
                group_code: unit.key,
                manager_name: unit.manager.full_name.clone(),
                manager_code: unit.manager.agent_code.clone(),
                manager_rank,
                stats: ManagerStats {
                    total_agents: headcount,
                    submitted_agents,
                    active_agents,
                    active_percent: percent(Decimal::from(active_agents), Decimal::from(headcount)),
                    fyp_target,
                    submitted_fyp: totals.submitted_fyp,
                    issued_fyp: totals.issued_fyp,
                    completion_percent: percent(totals.issued_fyp, fyp_target),
                },
            }
        })
        .collect();

    rows.sort_by(|a, b| compare_names(&a.manager_name, &b.manager_name));
    info!("Manager summary for {}: {} rows", month, rows.len());
    rows
}

// --- Team Detail ---

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMemberStats {
    pub working_months: u32,
    #[serde(flatten)]
    pub contracts: MemberStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamMemberRow {
    pub agent: Agent,
    pub stats: TeamMemberStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamGroup {
    pub group_code: String,
    pub manager_name: String,
    pub summary: MemberStats,
    pub items: Vec<TeamMemberRow>,
}

/// Per-unit member listing with per-member and per-unit contract sums.
/// Units without reportable members are left out.
pub fn team_detail(
    month: &ReportMonth,
    agents: &[Agent],
    contracts: &[Contract],
    overrides: &ManagerOverrides,
) -> Vec<TeamGroup> {
    let by_agent = ContractIndex::new(contracts);

    let groups: Vec<TeamGroup> = reporting_units(agents, overrides)
        .into_iter()
        .filter(|unit| !unit.members.is_empty())
        .map(|unit| {
            let mut members = unit.members.clone();
            members.sort_by(|a, b| compare_team_members(a, b));

            let mut summary = MemberStats::default();
            let items = members
                .into_iter()
                .map(|agent| {
                    let stats = MemberStats::from_contracts(by_agent.for_agent(&agent.agent_code), month);
                    summary.absorb(&stats);
                    TeamMemberRow {
                        agent: agent.clone(),
                        stats: TeamMemberStats {
                            working_months: agent
                                .join_date
                                .map(|join| month.working_months_since(join))
                                .unwrap_or(0),
                            contracts: stats,
                        },
                    }
                })
                .collect();

            TeamGroup {
                group_code: unit.key,
                manager_name: unit.manager.full_name.clone(),
                summary,
                items,
            }
        })
        .collect();

    // Units come out of `reporting_units` in ascending key order already.
    info!("Team detail for {}: {} groups", month, groups.len());
    groups
}

/// Managers first and left in place; the rest by join date, missing first.
fn compare_team_members(a: &Agent, b: &Agent) -> Ordering {
    match (a.rank.is_manager(), b.rank.is_manager()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a
            .join_date
            .unwrap_or_default()
            .cmp(&b.join_date.unwrap_or_default()),
    }
}

// --- Name collation ---

fn fold_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'ả' | 'ã' | 'ạ' | 'ă' | 'ằ' | 'ắ' | 'ẳ' | 'ẵ' | 'ặ' | 'â' | 'ầ' | 'ấ' | 'ẩ'
        | 'ẫ' | 'ậ' | 'ä' | 'å' => 'a',
        'è' | 'é' | 'ẻ' | 'ẽ' | 'ẹ' | 'ê' | 'ề' | 'ế' | 'ể' | 'ễ' | 'ệ' | 'ë' => 'e',
        'ì' | 'í' | 'ỉ' | 'ĩ' | 'ị' | 'î' | 'ï' => 'i',
        'ò' | 'ó' | 'ỏ' | 'õ' | 'ọ' | 'ô' | 'ồ' | 'ố' | 'ổ' | 'ỗ' | 'ộ' | 'ơ' | 'ờ' | 'ớ' | 'ở'
        | 'ỡ' | 'ợ' | 'ö' => 'o',
        'ù' | 'ú' | 'ủ' | 'ũ' | 'ụ' | 'ư' | 'ừ' | 'ứ' | 'ử' | 'ữ' | 'ự' | 'û' | 'ü' => 'u',
        'ỳ' | 'ý' | 'ỷ' | 'ỹ' | 'ỵ' | 'ÿ' => 'y',
        'đ' => 'd',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

fn collation_key(name: &str) -> String {
    name.to_lowercase().chars().map(fold_diacritic).collect()
}

/// Case- and accent-insensitive order, raw text as tiebreak.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    collation_key(a)
        .cmp(&collation_key(b))
        .then_with(|| a.cmp(b))
}
