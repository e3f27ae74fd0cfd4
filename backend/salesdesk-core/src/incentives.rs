// src/incentives.rs
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::domain::{Agent, AgentStatus, Contract, ContractStatus, ProMetadata, SopRecord};
use crate::hierarchy::normalize_code;
use crate::normalize::{parse_amount, SOP_FIELDS};

// --- Supplemental FYP ---

/// FYP of contracts issued after an SOP snapshot was cut, per agent.
#[derive(Debug, Clone, Default)]
pub struct Supplement {
    by_agent: HashMap<String, Decimal>,
    contract_count: usize,
    /// Latest issue date over all issued contracts, not only the supplemental ones.
    pub latest_issue_date: Option<NaiveDate>,
}

impl Supplement {
    pub fn after(sop_date: NaiveDate, contracts: &[Contract]) -> Self {
        let mut supplement = Self::default();
        for contract in contracts.iter().filter(|c| c.status == ContractStatus::Issued) {
            let Some(issued) = contract.issue_date else {
                continue;
            };
            supplement.latest_issue_date = supplement.latest_issue_date.max(Some(issued));
            if issued <= sop_date {
                continue;
            }
            supplement.contract_count += 1;
            let code = normalize_code(&contract.agent_code);
            if !code.is_empty() {
                *supplement.by_agent.entry(code).or_default() += contract.fyp;
            }
        }
        supplement
    }

    pub fn for_agent(&self, agent_code: &str) -> Decimal {
        self.by_agent
            .get(&normalize_code(agent_code))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn has_data(&self) -> bool {
        self.contract_count > 0
    }

    /// The later of the snapshot date and the newest issued contract.
    pub fn display_date(&self, sop_date: NaiveDate) -> NaiveDate {
        self.latest_issue_date.map_or(sop_date, |d| d.max(sop_date))
    }
}

fn sop_amount(record: &SopRecord, field: &str) -> Decimal {
    SOP_FIELDS
        .resolve(&record.data, field)
        .as_deref()
        .map(parse_amount)
        .unwrap_or(Decimal::ZERO)
}

// --- MDRT ---

/// Cumulative MDRT FYP targets by calendar month, in thousands.
const MDRT_TARGETS: [Decimal; 12] = [
    dec!(40000),
    dec!(90000),
    dec!(160000),
    dec!(250000),
    dec!(365000),
    dec!(430000),
    dec!(530000),
    dec!(640000),
    dec!(750000),
    dec!(860000),
    dec!(970000),
    dec!(1073645.2),
];

/// Target for a 1-based month; out of range gives 0.
pub fn mdrt_target(month: u32) -> Decimal {
    month
        .checked_sub(1)
        .and_then(|i| MDRT_TARGETS.get(i as usize))
        .copied()
        .unwrap_or(Decimal::ZERO)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MdrtMonthTarget {
    pub month: String,
    pub target: Decimal,
    pub month_name: String,
}

pub fn mdrt_schedule(year: i32) -> Vec<MdrtMonthTarget> {
    (1..=12)
        .map(|m| MdrtMonthTarget {
            month: format!("{:02}/{}", m, year),
            target: mdrt_target(m),
            month_name: format!("Tháng {}", m),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MdrtAgentRow {
    pub agent_code: String,
    pub full_name: String,
    pub rank: String,
    pub fyp_issued: Decimal,
    pub sop_fyp: Decimal,
    pub supplemental_fyp: Decimal,
    pub progress_percent: f64,
    pub remaining_fyp: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MdrtMeta {
    pub month: String,
    pub current_month_target: Decimal,
    pub upload_date: NaiveDate,
    pub sop_date: NaiveDate,
    pub contract_date: Option<NaiveDate>,
    pub total_agents: usize,
    pub displayed_agents: usize,
    pub has_supplemental_data: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MdrtReport {
    pub data: Vec<MdrtAgentRow>,
    pub meta: MdrtMeta,
}

/// Progress of active agents towards the cumulative target of `month`,
/// from one SOP snapshot plus contracts issued after it. Sorted by FYP
/// descending, then cut to `limit`.
pub fn mdrt_progress(
    month: u32,
    limit: Option<usize>,
    sop_date: NaiveDate,
    snapshot: &[SopRecord],
    contracts: &[Contract],
    agents: &[Agent],
) -> MdrtReport {
    let target = mdrt_target(month);
    let supplement = Supplement::after(sop_date, contracts);
    let active: HashSet<String> = agents
        .iter()
        .filter(|a| a.status == AgentStatus::Active)
        .map(|a| normalize_code(&a.agent_code))
        .collect();

    let mut rows: Vec<MdrtAgentRow> = snapshot
        .iter()
        .filter(|r| r.upload_date == sop_date && active.contains(&normalize_code(&r.agent_code)))
        .map(|record| {
            let sop_fyp = sop_amount(record, "mdrt_fyp");
            let supplemental_fyp = supplement.for_agent(&record.agent_code);
            let fyp_issued = sop_fyp + supplemental_fyp;
            let progress = if target > Decimal::ZERO {
                (fyp_issued / target * Decimal::ONE_HUNDRED).round_dp(2)
            } else {
                Decimal::ZERO
            };
            MdrtAgentRow {
                agent_code: record.agent_code.clone(),
                full_name: SOP_FIELDS
                    .resolve(&record.data, "full_name")
                    .unwrap_or_else(|| record.agent_code.clone()),
                rank: SOP_FIELDS
                    .resolve(&record.data, "rank")
                    .unwrap_or_else(|| "N/A".to_string()),
                fyp_issued,
                sop_fyp,
                supplemental_fyp,
                progress_percent: progress.to_f64().unwrap_or(0.0),
                remaining_fyp: (target - fyp_issued).max(Decimal::ZERO),
            }
        })
        .collect();

    rows.sort_by(|a, b| b.fyp_issued.cmp(&a.fyp_issued));
    let total_agents = rows.len();
    if let Some(limit) = limit {
        rows.truncate(limit);
    }

    info!("MDRT progress for month {:02}: {} of {} agents", month, rows.len(), total_agents);
    MdrtReport {
        meta: MdrtMeta {
            month: format!("{:02}", month),
            current_month_target: target,
            upload_date: supplement.display_date(sop_date),
            sop_date,
            contract_date: supplement.latest_issue_date,
            total_agents,
            displayed_agents: rows.len(),
            has_supplemental_data: supplement.has_data(),
        },
        data: rows,
    }
}

// --- Manulife Pro ---

/// Pro program tier, read from the agent group column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProTier {
    /// "Bạch Kim"
    Platinum,
    /// "Vàng"
    Gold,
    /// "Bạc"
    Silver,
    Other,
}

// (FYP threshold, bonus), highest first.
const PLATINUM_STEPS: &[(Decimal, Decimal)] = &[
    (dec!(120000), dec!(20000)),
    (dec!(100000), dec!(16000)),
    (dec!(80000), dec!(12000)),
    (dec!(60000), dec!(10000)),
    (dec!(45000), dec!(8000)),
    (dec!(30000), dec!(4000)),
    (dec!(15000), dec!(2000)),
];
const GOLD_STEPS: &[(Decimal, Decimal)] = &[
    (dec!(60000), dec!(7000)),
    (dec!(45000), dec!(5000)),
    (dec!(30000), dec!(3000)),
    (dec!(15000), dec!(1500)),
];
const SILVER_STEPS: &[(Decimal, Decimal)] = &[
    (dec!(45000), dec!(3000)),
    (dec!(30000), dec!(3000)),
    (dec!(15000), dec!(1500)),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProReward {
    pub bonus: Decimal,
    /// Threshold of the next step; `None` at the top step or outside the program.
    pub next_tier: Option<Decimal>,
}

impl ProTier {
    /// "Bạch Kim" must be checked before "Bạc", which it contains.
    pub fn classify(group: &str) -> Self {
        if group.contains("Bạch Kim") {
            ProTier::Platinum
        } else if group.contains("Vàng") {
            ProTier::Gold
        } else if group.contains("Bạc") {
            ProTier::Silver
        } else {
            ProTier::Other
        }
    }

    pub fn sort_order(&self) -> u8 {
        match self {
            ProTier::Platinum => 1,
            ProTier::Gold => 2,
            ProTier::Silver => 3,
            ProTier::Other => 99,
        }
    }

    fn steps(&self) -> &'static [(Decimal, Decimal)] {
        match self {
            ProTier::Platinum => PLATINUM_STEPS,
            ProTier::Gold => GOLD_STEPS,
            ProTier::Silver => SILVER_STEPS,
            ProTier::Other => &[],
        }
    }

    pub fn reward(&self, fyp: Decimal) -> ProReward {
        let steps = self.steps();
        match steps.iter().position(|(threshold, _)| fyp >= *threshold) {
            Some(i) => ProReward {
                bonus: steps[i].1,
                next_tier: i.checked_sub(1).map(|above| steps[above].0),
            },
            None => ProReward {
                bonus: Decimal::ZERO,
                next_tier: steps.last().map(|(threshold, _)| *threshold),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProBonusRow {
    pub stt: usize,
    pub agent_code: String,
    pub full_name: String,
    pub pro_type: String,
    pub promo_month: String,
    pub monthly_fyp: Decimal,
    pub sop_fyp: Decimal,
    pub supplemental_fyp: Decimal,
    pub bonus_amount: Decimal,
    pub next_tier: Option<Decimal>,
    pub remaining_fyp: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProBonusMeta {
    pub upload_date: NaiveDate,
    pub sop_date: NaiveDate,
    pub contract_date: Option<NaiveDate>,
    pub sop_month: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProBonusReport {
    pub data: Vec<ProBonusRow>,
    pub meta: ProBonusMeta,
}

/// Bonus table for agents whose group names a Manulife Pro tier.
pub fn pro_bonus(
    sop_date: NaiveDate,
    snapshot: &[SopRecord],
    contracts: &[Contract],
    metadata: &[ProMetadata],
) -> ProBonusReport {
    let supplement = Supplement::after(sop_date, contracts);
    let promo: HashMap<String, &str> = metadata
        .iter()
        .map(|m| (normalize_code(&m.agent_code), m.promo_month.as_str()))
        .collect();

    let mut rows: Vec<(ProTier, ProBonusRow)> = snapshot
        .iter()
        .filter(|r| r.upload_date == sop_date)
        .filter_map(|record| {
            let pro_type = SOP_FIELDS.resolve(&record.data, "agent_group")?;
            if !pro_type.contains("Manulife Pro") {
                return None;
            }
            let tier = ProTier::classify(&pro_type);
            let sop_fyp = sop_amount(record, "monthly_fyp");
            let supplemental_fyp = supplement.for_agent(&record.agent_code);
            let monthly_fyp = sop_fyp + supplemental_fyp;
            let reward = tier.reward(monthly_fyp);

            Some((
                tier,
                ProBonusRow {
                    stt: 0,
                    agent_code: record.agent_code.clone(),
                    full_name: SOP_FIELDS
                        .resolve(&record.data, "full_name")
                        .unwrap_or_else(|| record.agent_code.clone()),
                    promo_month: promo
                        .get(&normalize_code(&record.agent_code))
                        .map(|m| m.to_string())
                        .unwrap_or_default(),
                    pro_type,
                    monthly_fyp,
                    sop_fyp,
                    supplemental_fyp,
                    bonus_amount: reward.bonus,
                    next_tier: reward.next_tier,
                    remaining_fyp: reward
                        .next_tier
                        .map(|next| (next - monthly_fyp).max(Decimal::ZERO))
                        .unwrap_or(Decimal::ZERO),
                },
            ))
        })
        .collect();

    rows.sort_by(|(ta, a), (tb, b)| {
        ta.sort_order()
            .cmp(&tb.sort_order())
            .then_with(|| b.monthly_fyp.cmp(&a.monthly_fyp))
    });
    let data: Vec<ProBonusRow> = rows
        .into_iter()
        .enumerate()
        .map(|(i, (_, row))| ProBonusRow { stt: i + 1, ..row })
        .collect();

    ProBonusReport {
        meta: ProBonusMeta {
            upload_date: supplement.display_date(sop_date),
            sop_date,
            contract_date: supplement.latest_issue_date,
            sop_month: sop_date.format("%Y-%m").to_string(),
        },
        data,
    }
}

// --- SOP groups ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCounts {
    pub groups: Vec<GroupCount>,
    pub sa_count: usize,
}

const GROUP_ORDER: [&str; 8] = [
    "Manulife Pro Bạch Kim",
    "Manulife Pro Vàng",
    "Manulife Pro Bạc",
    "M0",
    "M1-3",
    "M4-6",
    "M7-12",
    "M13+",
];

fn group_order(name: &str) -> usize {
    GROUP_ORDER
        .iter()
        .position(|g| *g == name)
        .map_or(999, |i| i + 1)
}

/// Agents per group of one snapshot. SA rows only feed `sa_count`; rows
/// without a group are not counted.
pub fn sop_group_counts(snapshot: &[SopRecord]) -> GroupCounts {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut sa_count = 0;

    for record in snapshot {
        let rank = SOP_FIELDS.resolve(&record.data, "rank").unwrap_or_default();
        if rank.trim().eq_ignore_ascii_case("SA") {
            sa_count += 1;
            continue;
        }
        if let Some(group) = SOP_FIELDS.resolve(&record.data, "agent_group") {
            *counts.entry(group).or_default() += 1;
        }
    }

    let mut groups: Vec<GroupCount> = counts
        .into_iter()
        .map(|(name, count)| GroupCount { name, count })
        .collect();
    groups.sort_by(|a, b| {
        group_order(&a.name)
            .cmp(&group_order(&b.name))
            .then_with(|| a.name.cmp(&b.name))
    });
    GroupCounts { groups, sa_count }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Rank;
    use crate::loader::SheetRow;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sop(code: &str, cells: &[(&str, &str)]) -> SopRecord {
        let mut all = vec![("MSDL", code)];
        all.extend_from_slice(cells);
        SopRecord {
            agent_code: code.to_string(),
            upload_date: d("2024-03-15"),
            data: SheetRow::new(all),
        }
    }

    fn issued(agent: &str, fyp: Decimal, date: &str) -> Contract {
        Contract {
            policy_number: format!("{}-{}", agent, date),
            agent_code: agent.to_string(),
            fyp,
            issue_date: Some(d(date)),
            status: ContractStatus::Issued,
            ..Default::default()
        }
    }

    #[test]
    fn mdrt_targets_are_cumulative_and_bounded() {
        assert_eq!(mdrt_target(1), dec!(40000));
        assert_eq!(mdrt_target(12), dec!(1073645.2));
        assert_eq!(mdrt_target(0), Decimal::ZERO);
        assert_eq!(mdrt_target(13), Decimal::ZERO);

        let schedule = mdrt_schedule(2026);
        assert_eq!(schedule[2].month, "03/2026");
        assert_eq!(schedule[2].month_name, "Tháng 3");
    }

    #[test]
    fn mdrt_adds_supplemental_fyp_and_keeps_active_agents_only() {
        let snapshot = vec![
            sop("A1", &[("Tên Đại lý", "Lan"), ("MDRT-FYP tới hiện tại", "100,000")]),
            sop("A2", &[("MDRT-FYP tới hiện tại", "150000")]),
            sop("A3", &[("MDRT-FYP tới hiện tại", "999999")]),
        ];
        let contracts = vec![
            issued("A1", dec!(80000), "2024-03-20"),
            issued("A1", dec!(5000), "2024-03-15"),
        ];
        let mut gone = Agent::new("A3", "Gone", Rank::Fa);
        gone.status = AgentStatus::Terminated;
        let agents = vec![Agent::new("A1", "Lan", Rank::Fa), Agent::new("A2", "Minh", Rank::Fa), gone];

        let report = mdrt_progress(3, None, d("2024-03-15"), &snapshot, &contracts, &agents);

        let codes: Vec<&str> = report.data.iter().map(|r| r.agent_code.as_str()).collect();
        assert_eq!(codes, vec!["A1", "A2"], "A1 leads with 180000, A3 is not active");
        let a1 = &report.data[0];
        assert_eq!(a1.supplemental_fyp, dec!(80000), "issued on the snapshot day is already counted");
        assert_eq!(a1.fyp_issued, dec!(180000));
        assert_eq!(a1.progress_percent, 112.5);
        assert_eq!(a1.remaining_fyp, Decimal::ZERO);
        assert_eq!(report.data[1].full_name, "A2", "falls back to the code");
        assert_eq!(report.data[1].rank, "N/A");

        assert_eq!(report.meta.upload_date, d("2024-03-20"));
        assert!(report.meta.has_supplemental_data);
        assert_eq!(report.meta.total_agents, 2);
    }

    #[test]
    fn mdrt_limit_cuts_after_sorting() {
        let snapshot = vec![
            sop("A1", &[("FYP Issued", "10")]),
            sop("A2", &[("FYP Issued", "30")]),
            sop("A3", &[("FYP Issued", "20")]),
        ];
        let agents: Vec<Agent> = ["A1", "A2", "A3"]
            .iter()
            .map(|c| Agent::new(*c, *c, Rank::Fa))
            .collect();
        let report = mdrt_progress(1, Some(2), d("2024-03-15"), &snapshot, &[], &agents);

        assert_eq!(report.data.len(), 2);
        assert_eq!(report.data[0].agent_code, "A2");
        assert_eq!(report.meta.total_agents, 3);
        assert_eq!(report.meta.displayed_agents, 2);
        assert!(!report.meta.has_supplemental_data);
    }

    #[test]
    fn pro_reward_ladders() {
        let reward = ProTier::Platinum.reward(dec!(125000));
        assert_eq!((reward.bonus, reward.next_tier), (dec!(20000), None));
        let reward = ProTier::Platinum.reward(dec!(50000));
        assert_eq!((reward.bonus, reward.next_tier), (dec!(8000), Some(dec!(60000))));
        let reward = ProTier::Gold.reward(dec!(14999));
        assert_eq!((reward.bonus, reward.next_tier), (Decimal::ZERO, Some(dec!(15000))));
        let reward = ProTier::Silver.reward(dec!(45000));
        assert_eq!((reward.bonus, reward.next_tier), (dec!(3000), None));
        let reward = ProTier::Silver.reward(dec!(30000));
        assert_eq!((reward.bonus, reward.next_tier), (dec!(3000), Some(dec!(45000))));
        let reward = ProTier::Other.reward(dec!(1000000));
        assert_eq!((reward.bonus, reward.next_tier), (Decimal::ZERO, None));
    }

    #[test]
    fn pro_tier_classification_checks_platinum_first() {
        assert_eq!(ProTier::classify("Manulife Pro Bạch Kim"), ProTier::Platinum);
        assert_eq!(ProTier::classify("Manulife Pro Bạc"), ProTier::Silver);
        assert_eq!(ProTier::classify("Manulife Pro"), ProTier::Other);
    }

    #[test]
    fn pro_bonus_rows_sorted_by_tier_then_fyp() {
        let snapshot = vec![
            sop("S1", &[("Nhóm Đại lý", "Manulife Pro Bạc"), ("FYP  tháng T", "40,000")]),
            sop("G1", &[("Nhóm Đại lý", "Manulife Pro Vàng"), ("FYP  tháng T", "10000")]),
            sop("G2", &[("Nhóm ĐL", "Manulife Pro Vàng"), ("FYP  tháng T", "20000")]),
            sop("X1", &[("Nhóm Đại lý", "M0"), ("FYP  tháng T", "90000")]),
        ];
        let contracts = vec![issued("G1", dec!(25000), "2024-03-18")];
        let metadata = vec![ProMetadata {
            agent_code: "g1".into(),
            promo_month: "01/2024".into(),
        }];

        let report = pro_bonus(d("2024-03-15"), &snapshot, &contracts, &metadata);
        let order: Vec<(usize, &str)> = report
            .data
            .iter()
            .map(|r| (r.stt, r.agent_code.as_str()))
            .collect();
        assert_eq!(order, vec![(1, "G1"), (2, "G2"), (3, "S1")]);

        let g1 = &report.data[0];
        assert_eq!(g1.monthly_fyp, dec!(35000));
        assert_eq!(g1.bonus_amount, dec!(3000));
        assert_eq!(g1.next_tier, Some(dec!(45000)));
        assert_eq!(g1.remaining_fyp, dec!(10000));
        assert_eq!(g1.promo_month, "01/2024");
        assert_eq!(report.meta.sop_month, "2024-03");
    }

    #[test]
    fn group_counts_follow_display_order_and_split_sa() {
        let snapshot = vec![
            sop("A", &[("Nhóm Đại lý", "M13+")]),
            sop("B", &[("Nhóm Đại lý", "Manulife Pro Vàng")]),
            sop("C", &[("Nhóm Đại lý", "Khác")]),
            sop("D", &[("Nhóm Đại lý", "M13+")]),
            sop("E", &[("Chức danh", "sa"), ("Nhóm Đại lý", "M0")]),
            sop("F", &[("Nhóm Đại lý", "  ")]),
        ];
        let counts = sop_group_counts(&snapshot);

        let names: Vec<(&str, usize)> = counts
            .groups
            .iter()
            .map(|g| (g.name.as_str(), g.count))
            .collect();
        assert_eq!(names, vec![("Manulife Pro Vàng", 1), ("M13+", 2), ("Khác", 1)]);
        assert_eq!(counts.sa_count, 1);
    }
}
