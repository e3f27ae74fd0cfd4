// src/contracts.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{Agent, Contract, ContractStatus};
use crate::hierarchy::AgentIndex;
use crate::period::ReportMonth;
use crate::rollup::{is_issued_in, is_submitted_in};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractFilter {
    /// Submitted or issued in the month; cancelled contracts only in their submission month.
    #[default]
    All,
    Issued,
    Cancelled,
    Pending,
}

/// Agent columns joined onto a contract row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSummary {
    pub full_name: String,
    pub rank: String,
    pub manager_code: Option<String>,
    pub manager_name: Option<String>,
}

impl From<&Agent> for AgentSummary {
    fn from(agent: &Agent) -> Self {
        Self {
            full_name: agent.full_name.clone(),
            rank: agent.display_rank(),
            manager_code: agent.manager_code.clone(),
            manager_name: agent.manager_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractRow {
    #[serde(flatten)]
    pub contract: Contract,
    #[serde(rename = "agents")]
    pub agent: Option<AgentSummary>,
}

const CANCEL_MARKERS: [&str; 3] = ["hủy", "cancel", "từ chối"];

fn looks_cancelled(contract: &Contract) -> bool {
    contract.status == ContractStatus::Cancelled
        || contract.status_note.as_deref().is_some_and(|note| {
            let note = note.to_lowercase();
            CANCEL_MARKERS.iter().any(|m| note.contains(m))
        })
}

/// Contracts of a month under one of the listing filters, ordered by
/// submission date (undated first). Without a month every contract is listed.
pub fn list_contracts(
    contracts: Vec<Contract>,
    agents: &[Agent],
    month: Option<&ReportMonth>,
    filter: ContractFilter,
) -> Vec<ContractRow> {
    let mut selected: Vec<Contract> = match month {
        None => contracts,
        Some(month) => match filter {
            ContractFilter::Issued => contracts.into_iter().filter(|c| is_issued_in(c, month)).collect(),
            ContractFilter::Cancelled => contracts
                .into_iter()
                .filter(|c| looks_cancelled(c) && is_submitted_in(c, month))
                .collect(),
            ContractFilter::Pending => contracts.into_iter().filter(Contract::is_pending).collect(),
            ContractFilter::All => {
                let mut by_policy: BTreeMap<String, Contract> = BTreeMap::new();
                for contract in contracts {
                    let submitted = is_submitted_in(&contract, month);
                    let issued = contract.issue_date.is_some_and(|d| month.contains(d));
                    // A cancelled contract only shows up in its submission month.
                    let keep = submitted
                        || (issued && contract.status != ContractStatus::Cancelled);
                    if keep {
                        by_policy.insert(contract.policy_number.clone(), contract);
                    }
                }
                by_policy.into_values().collect()
            }
        },
    };

    selected.sort_by_key(|c| c.submit_date);

    let index = AgentIndex::new(agents);
    selected
        .into_iter()
        .map(|contract| ContractRow {
            agent: index.get(&contract.agent_code).map(AgentSummary::from),
            contract,
        })
        .collect()
}
