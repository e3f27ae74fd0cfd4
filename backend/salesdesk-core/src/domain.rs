// src/domain.rs
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::hierarchy::normalize_code;
use crate::loader::SheetRow;

// --- Ranks ---

/// Role of an agent in the sales organization.
///
/// The legacy "Ter" value is not a rank: it is parsed as `Unranked` and the
/// lifecycle half of its meaning lives in [`AgentStatus::Terminated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Rank {
    #[default]
    Fa,
    Um,
    Sum,
    Dm,
    Sdm,
    Bm,
    Am,
    Sa,
    Sm,
    Unranked,
}

/// Ranks that can lead a reporting unit.
pub const MANAGER_RANKS: [Rank; 7] = [
    Rank::Um,
    Rank::Sum,
    Rank::Dm,
    Rank::Sdm,
    Rank::Bm,
    Rank::Am,
    Rank::Sm,
];

impl Rank {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "FA" => Rank::Fa,
            "UM" => Rank::Um,
            "SUM" => Rank::Sum,
            "DM" => Rank::Dm,
            "SDM" => Rank::Sdm,
            "BM" => Rank::Bm,
            "AM" => Rank::Am,
            "SA" => Rank::Sa,
            "SM" => Rank::Sm,
            _ => Rank::Unranked,
        }
    }

    /// True for the legacy rank texts that encode termination.
    pub fn is_termination_marker(raw: &str) -> bool {
        matches!(raw.trim().to_uppercase().as_str(), "TER" | "TERMINATED")
    }

    pub fn is_manager(&self) -> bool {
        MANAGER_RANKS.contains(self)
    }

    /// Manager ranks plus FA: the ranks that appear in unit reports.
    pub fn is_reportable(&self) -> bool {
        self.is_manager() || *self == Rank::Fa
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::Fa => "FA",
            Rank::Um => "UM",
            Rank::Sum => "SUM",
            Rank::Dm => "DM",
            Rank::Sdm => "SDM",
            Rank::Bm => "BM",
            Rank::Am => "AM",
            Rank::Sa => "SA",
            Rank::Sm => "SM",
            Rank::Unranked => "",
        }
    }
}

impl From<String> for Rank {
    fn from(raw: String) -> Self {
        Rank::parse(&raw)
    }
}

impl From<Rank> for String {
    fn from(rank: Rank) -> Self {
        rank.as_str().to_string()
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Agent lifecycle ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AgentStatus {
    #[default]
    Active,
    Terminated,
    Pending,
    Hold,
}

impl AgentStatus {
    /// Maps a status cell onto a known lifecycle value, if it is one.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "ACTIVE" => Some(AgentStatus::Active),
            "TERMINATED" | "TER" => Some(AgentStatus::Terminated),
            "PENDING" => Some(AgentStatus::Pending),
            "HOLD" => Some(AgentStatus::Hold),
            _ => None,
        }
    }

    /// Lifecycle from the raw rank and status texts of an input row.
    pub fn derive(raw_rank: &str, raw_status: &str) -> Self {
        let rank = raw_rank.trim().to_uppercase();
        let status = raw_status.trim().to_uppercase();

        if Rank::is_termination_marker(&rank) || status == "TERMINATED" || status == "TER" {
            AgentStatus::Terminated
        } else if rank == "SA" || status == "PENDING" {
            AgentStatus::Pending
        } else {
            AgentStatus::Active
        }
    }
}

// --- Agent ---

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "AgentRecord")]
pub struct Agent {
    pub agent_code: String,
    pub full_name: String,
    pub rank: Rank,
    pub status: AgentStatus,
    /// Free-text status that is not one of the lifecycle values.
    pub status_note: Option<String>,
    pub manager_code: Option<String>,
    pub manager_name: Option<String>,
    pub group_code: Option<String>,
    pub join_date: Option<NaiveDate>,
    pub dob: Option<NaiveDate>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub id_card: Option<String>,
    pub address: Option<String>,
    pub bank_account: Option<String>,
    pub bank_name: Option<String>,
    pub tax_code: Option<String>,
    pub office_code: Option<String>,
    pub recruiter_code: Option<String>,
}

impl Agent {
    pub fn new(agent_code: impl Into<String>, full_name: impl Into<String>, rank: Rank) -> Self {
        Self {
            agent_code: agent_code.into(),
            full_name: full_name.into(),
            rank,
            ..Default::default()
        }
    }

    /// Terminated either by lifecycle or by a free-text leave marker.
    pub fn is_terminated(&self) -> bool {
        if self.status == AgentStatus::Terminated {
            return true;
        }
        match &self.status_note {
            Some(note) => {
                let note = note.trim().to_lowercase();
                note == "ter" || note.contains("terminated") || note.contains("nghỉ")
            }
            None => false,
        }
    }

    /// Combined rank text used in exports and report rows.
    pub fn display_rank(&self) -> String {
        if self.rank == Rank::Unranked && self.status == AgentStatus::Terminated {
            "Ter".to_string()
        } else {
            self.rank.as_str().to_string()
        }
    }
}

/// Wire shape of an agent. Accepts the legacy rank/status texts and folds
/// them into the typed fields.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AgentRecord {
    agent_code: String,
    full_name: String,
    rank: Option<String>,
    status: Option<String>,
    status_note: Option<String>,
    manager_code: Option<String>,
    manager_name: Option<String>,
    group_code: Option<String>,
    join_date: Option<NaiveDate>,
    dob: Option<NaiveDate>,
    phone: Option<String>,
    email: Option<String>,
    id_card: Option<String>,
    address: Option<String>,
    bank_account: Option<String>,
    bank_name: Option<String>,
    tax_code: Option<String>,
    office_code: Option<String>,
    recruiter_code: Option<String>,
}

impl From<AgentRecord> for Agent {
    fn from(record: AgentRecord) -> Self {
        let raw_rank = record.rank.unwrap_or_else(|| "FA".to_string());
        let raw_status = record.status.unwrap_or_default();

        // Hold is only ever set explicitly; rank and status texts never derive it.
        let status = match AgentStatus::parse(&raw_status) {
            Some(AgentStatus::Hold) => AgentStatus::Hold,
            _ => AgentStatus::derive(&raw_rank, &raw_status),
        };
        let status_note = record.status_note.or_else(|| {
            let trimmed = raw_status.trim();
            if trimmed.is_empty() || AgentStatus::parse(trimmed).is_some() {
                None
            } else {
                Some(trimmed.to_string())
            }
        });

        Agent {
            agent_code: record.agent_code.trim().to_string(),
            full_name: record.full_name,
            rank: Rank::parse(&raw_rank),
            status,
            status_note,
            manager_code: record.manager_code,
            manager_name: record.manager_name,
            group_code: record.group_code,
            join_date: record.join_date,
            dob: record.dob,
            phone: record.phone,
            email: record.email,
            id_card: record.id_card,
            address: record.address,
            bank_account: record.bank_account,
            bank_name: record.bank_name,
            tax_code: record.tax_code,
            office_code: record.office_code,
            recruiter_code: record.recruiter_code,
        }
    }
}

// --- Contracts ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ContractStatus {
    #[default]
    Pending,
    Issued,
    Ack,
    Cancelled,
}

impl ContractStatus {
    /// Label used in exported sheets.
    pub fn display_label(&self) -> &'static str {
        match self {
            ContractStatus::Issued => "Đã cấp",
            ContractStatus::Cancelled => "Hủy",
            ContractStatus::Pending => "Chờ cấp",
            ContractStatus::Ack => "ACK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Contract {
    pub policy_number: String,
    pub agent_code: String,
    pub customer_name: Option<String>,
    pub product_code: Option<String>,
    pub submit_date: Option<NaiveDate>,
    pub issue_date: Option<NaiveDate>,
    pub fyp: Decimal,
    pub ape: Decimal,
    pub status: ContractStatus,
    /// Raw status text from the source sheet.
    pub status_note: Option<String>,
}

impl Contract {
    pub fn is_pending(&self) -> bool {
        self.status == ContractStatus::Pending
            || self
                .status_note
                .as_deref()
                .is_some_and(|note| note.to_lowercase().contains("chờ"))
    }
}

/// Partial contract update from one import row. `None` means the column was
/// absent from the sheet and the stored value must be kept.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContractPatch {
    pub policy_number: String,
    pub agent_code: Option<String>,
    pub customer_name: Option<Option<String>>,
    pub product_code: Option<Option<String>>,
    pub submit_date: Option<Option<NaiveDate>>,
    pub issue_date: Option<Option<NaiveDate>>,
    pub fyp: Option<Decimal>,
    pub ape: Option<Decimal>,
    pub status: Option<(ContractStatus, Option<String>)>,
}

impl ContractPatch {
    pub fn merge_into(self, existing: Option<&Contract>) -> Contract {
        let mut contract = existing.cloned().unwrap_or_else(|| Contract {
            policy_number: self.policy_number.clone(),
            ..Default::default()
        });

        if let Some(agent_code) = self.agent_code {
            contract.agent_code = agent_code;
        }
        if let Some(customer_name) = self.customer_name {
            contract.customer_name = customer_name;
        }
        if let Some(product_code) = self.product_code {
            contract.product_code = product_code;
        }
        if let Some(submit_date) = self.submit_date {
            contract.submit_date = submit_date;
        }
        if let Some(issue_date) = self.issue_date {
            contract.issue_date = issue_date;
        }
        if let Some(fyp) = self.fyp {
            contract.fyp = fyp;
        }
        if let Some(ape) = self.ape {
            contract.ape = ape;
        }
        if let Some((status, note)) = self.status {
            contract.status = status;
            contract.status_note = note;
        }
        contract
    }
}

// --- Targets ---

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamAllocation {
    pub month: String,
    pub manager_code: String,
    pub fyp_target: Decimal,
    pub active_target: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalTarget {
    pub month: String,
    pub fyp_target: Decimal,
    pub active_target: u32,
    pub actual_fyp: Decimal,
    pub actual_active: u32,
}

impl GlobalTarget {
    pub fn empty(month: impl Into<String>) -> Self {
        Self {
            month: month.into(),
            ..Default::default()
        }
    }
}

/// FYP targets of one month keyed by normalized manager code.
#[derive(Debug, Clone, Default)]
pub struct TargetBook {
    fyp_by_manager: HashMap<String, Decimal>,
}

impl TargetBook {
    pub fn from_allocations(allocations: &[TeamAllocation]) -> Self {
        let fyp_by_manager = allocations
            .iter()
            .map(|a| (normalize_code(&a.manager_code), a.fyp_target))
            .collect();
        Self { fyp_by_manager }
    }

    /// Missing targets count as zero.
    pub fn fyp_target(&self, manager_code: &str) -> Decimal {
        self.fyp_by_manager
            .get(&normalize_code(manager_code))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

// --- Snapshots and metadata ---

/// One agent's row of a sales-operations (SOP) snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SopRecord {
    pub agent_code: String,
    pub upload_date: NaiveDate,
    pub data: SheetRow,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProMetadata {
    pub agent_code: String,
    pub promo_month: String,
}

/// Stored payload for the pending/handover screens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub id: u64,
    pub kind: String,
    pub content: Value,
    pub report_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}
