// src/rollup.rs
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

use crate::domain::{Contract, ContractStatus};
use crate::hierarchy::normalize_code;
use crate::period::ReportMonth;

// --- Month predicates ---

/// Submitted in the month, whatever happened to the contract afterwards.
pub fn is_submitted_in(contract: &Contract, month: &ReportMonth) -> bool {
    contract.submit_date.is_some_and(|d| month.contains(d))
}

/// Issued in the month and not cancelled since.
pub fn is_issued_in(contract: &Contract, month: &ReportMonth) -> bool {
    contract.status != ContractStatus::Cancelled
        && contract.issue_date.is_some_and(|d| month.contains(d))
}

// --- Contract index ---

/// Contracts grouped by normalized agent code.
pub struct ContractIndex<'a> {
    by_agent: HashMap<String, Vec<&'a Contract>>,
}

impl<'a> ContractIndex<'a> {
    pub fn new(contracts: &'a [Contract]) -> Self {
        let mut by_agent: HashMap<String, Vec<&'a Contract>> = HashMap::new();
        for contract in contracts {
            let code = normalize_code(&contract.agent_code);
            if code.is_empty() {
                continue;
            }
            by_agent.entry(code).or_default().push(contract);
        }
        Self { by_agent }
    }

    pub fn for_agent(&self, agent_code: &str) -> &[&'a Contract] {
        self.by_agent
            .get(&normalize_code(agent_code))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

// --- Stats ---

/// Per-member (or per-unit, when absorbed) contract sums for one month.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStats {
    pub submitted_count: u32,
    pub issued_count: u32,
    pub pending_count: u32,
    #[serde(rename = "submittedFYP")]
    pub submitted_fyp: Decimal,
    #[serde(rename = "issuedFYP")]
    pub issued_fyp: Decimal,
    #[serde(rename = "pendingFYP")]
    pub pending_fyp: Decimal,
}

impl MemberStats {
    pub fn from_contracts(contracts: &[&Contract], month: &ReportMonth) -> Self {
        let mut stats = Self::default();
        for contract in contracts {
            if is_submitted_in(contract, month) {
                stats.submitted_count += 1;
                stats.submitted_fyp += contract.fyp;
            }
            if is_issued_in(contract, month) {
                stats.issued_count += 1;
                stats.issued_fyp += contract.fyp;
            }
            if contract.is_pending() {
                stats.pending_count += 1;
                stats.pending_fyp += contract.fyp;
            }
        }
        stats
    }

    /// Activity as counted by the Manager Summary.
    pub fn active_by_issued(&self) -> bool {
        self.issued_count > 0
    }

    /// Activity as counted by the dashboard's "has business" checks.
    pub fn active_by_submitted(&self) -> bool {
        self.submitted_count > 0
    }

    pub fn absorb(&mut self, other: &MemberStats) {
        self.submitted_count += other.submitted_count;
        self.issued_count += other.issued_count;
        self.pending_count += other.pending_count;
        self.submitted_fyp += other.submitted_fyp;
        self.issued_fyp += other.issued_fyp;
        self.pending_fyp += other.pending_fyp;
    }
}

/// `part / whole * 100`, or 0 when `whole` is not positive.
pub fn percent(part: Decimal, whole: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;

    if whole <= Decimal::ZERO {
        return 0.0;
    }
    (part / whole * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn contract(
        policy: &str,
        agent: &str,
        fyp: Decimal,
        submit: Option<&str>,
        issue: Option<&str>,
        status: ContractStatus,
    ) -> Contract {
        Contract {
            policy_number: policy.into(),
            agent_code: agent.into(),
            fyp,
            submit_date: submit.map(d),
            issue_date: issue.map(d),
            status,
            ..Default::default()
        }
    }

    #[test]
    fn cancelled_contract_counts_as_submitted_only() {
        let month = ReportMonth::parse("2024-03").unwrap();
        let c = contract(
            "P1",
            "A1",
            dec!(1000),
            Some("2024-03-05"),
            Some("2024-03-10"),
            ContractStatus::Cancelled,
        );
        assert!(is_submitted_in(&c, &month));
        assert!(!is_issued_in(&c, &month));
    }

    #[test]
    fn contract_without_dates_never_matches_a_month() {
        let month = ReportMonth::parse("2024-03").unwrap();
        let c = contract("P1", "A1", dec!(1), None, None, ContractStatus::Issued);
        assert!(!is_submitted_in(&c, &month));
        assert!(!is_issued_in(&c, &month));
    }

    #[test]
    fn stats_sum_per_contract_and_flag_activity_separately() {
        let month = ReportMonth::parse("2024-03").unwrap();
        let contracts = vec![
            contract("P1", "A1", dec!(1000), Some("2024-03-05"), None, ContractStatus::Pending),
            contract("P2", "A1", dec!(500), Some("2024-03-06"), None, ContractStatus::Pending),
            contract("P3", "A1", dec!(200), Some("2024-02-01"), Some("2024-03-02"), ContractStatus::Issued),
        ];
        let refs: Vec<&Contract> = contracts.iter().collect();
        let stats = MemberStats::from_contracts(&refs, &month);

        assert_eq!(stats.submitted_count, 2);
        assert_eq!(stats.submitted_fyp, dec!(1500));
        assert_eq!(stats.issued_fyp, dec!(200));
        assert_eq!(stats.pending_count, 2);
        assert!(stats.active_by_issued());
        assert!(stats.active_by_submitted());
    }

    #[test]
    fn activity_definitions_can_disagree() {
        let month = ReportMonth::parse("2024-03").unwrap();
        let contracts = vec![contract(
            "P1",
            "A1",
            dec!(1000),
            Some("2024-03-05"),
            None,
            ContractStatus::Pending,
        )];
        let refs: Vec<&Contract> = contracts.iter().collect();
        let stats = MemberStats::from_contracts(&refs, &month);

        assert!(stats.active_by_submitted());
        assert!(!stats.active_by_issued());
    }

    #[test]
    fn contract_index_matches_codes_loosely() {
        let contracts = vec![
            contract("P1", " a1", dec!(1), None, None, ContractStatus::Pending),
            contract("P2", "", dec!(1), None, None, ContractStatus::Pending),
        ];
        let index = ContractIndex::new(&contracts);
        assert_eq!(index.for_agent("A1").len(), 1);
        assert!(index.for_agent("").is_empty());
        assert!(index.for_agent("B2").is_empty());
    }

    #[test]
    fn percent_never_divides_by_zero() {
        assert_eq!(percent(dec!(5), Decimal::ZERO), 0.0);
        assert_eq!(percent(dec!(500), dec!(2000)), 25.0);
    }
}
