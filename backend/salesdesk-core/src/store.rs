// src/store.rs
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::{Agent, Contract, GlobalTarget, ProMetadata, ReportSnapshot, SopRecord, TeamAllocation};
use crate::hierarchy::normalize_code;
use crate::period::ReportMonth;

// --- Errors ---

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    #[error("{entity} '{key}' already exists")]
    Conflict { entity: &'static str, key: String },
}

fn io_context<E: Into<std::io::Error>, S: Into<String>>(source: E, context: S) -> StoreError {
    StoreError::Io {
        source: source.into(),
        context: context.into(),
    }
}

// --- Paging ---

/// Offset-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    pub offset: usize,
}

impl PageRequest {
    /// `page_number` is 1-based; 0 is read as 1. Offsets past the end
    /// saturate and yield an empty page.
    pub fn for_page(page_size: usize, page_number: usize) -> Self {
        Self {
            limit: page_size,
            offset: page_number.saturating_sub(1).saturating_mul(page_size),
        }
    }

    /// Everything from the first item on.
    pub fn unbounded() -> Self {
        Self {
            limit: usize::MAX,
            offset: 0,
        }
    }

    pub fn page_number(&self) -> usize {
        if self.limit == 0 {
            1
        } else {
            self.offset / self.limit + 1
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::for_page(50, 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> usize {
        if self.limit == 0 {
            return 1;
        }
        self.total.div_ceil(self.limit)
    }
}

/// Filters for browsing SOP snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SopFilter {
    /// Case-insensitive substring of the agent code.
    pub agent_code: Option<String>,
    pub upload_date: Option<NaiveDate>,
}

impl SopFilter {
    fn matches(&self, record: &SopRecord) -> bool {
        let code_ok = match self.agent_code.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => record
                .agent_code
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => true,
        };
        code_ok && self.upload_date.map_or(true, |d| record.upload_date == d)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub agents: usize,
    pub contracts: usize,
    pub sop_records: usize,
}

// --- Gateway ---

/// Persistence gateway. Every read returns an owned snapshot; upserts are
/// idempotent by each collection's unique key.
#[async_trait]
pub trait Store: Send + Sync {
    async fn counts(&self) -> Result<StoreCounts, StoreError>;

    // Agents, keyed by agent_code.
    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError>;
    async fn get_agent(&self, code: &str) -> Result<Option<Agent>, StoreError>;
    async fn insert_agent(&self, agent: Agent) -> Result<Agent, StoreError>;
    async fn update_agent(&self, code: &str, agent: Agent) -> Result<Agent, StoreError>;
    async fn delete_agent(&self, code: &str) -> Result<(), StoreError>;
    async fn upsert_agents(&self, agents: Vec<Agent>) -> Result<usize, StoreError>;
    async fn replace_agents(&self, agents: Vec<Agent>) -> Result<usize, StoreError>;
    async fn delete_all_agents(&self) -> Result<usize, StoreError>;

    // Contracts, keyed by policy_number.
    async fn list_contracts(&self) -> Result<Vec<Contract>, StoreError>;
    /// Submitted or issued on/after the month start, or still pending.
    async fn contracts_touching(&self, month: &ReportMonth) -> Result<Vec<Contract>, StoreError>;
    async fn upsert_contracts(&self, contracts: Vec<Contract>) -> Result<usize, StoreError>;
    async fn replace_contracts(&self, contracts: Vec<Contract>) -> Result<usize, StoreError>;

    // Targets, keyed by (month, manager_code) and by month.
    async fn allocations_for_month(&self, month: &ReportMonth) -> Result<Vec<TeamAllocation>, StoreError>;
    async fn upsert_allocations(&self, allocations: Vec<TeamAllocation>) -> Result<usize, StoreError>;
    async fn global_target(&self, month: &ReportMonth) -> Result<Option<GlobalTarget>, StoreError>;
    async fn global_targets_for_year(&self, year: i32) -> Result<Vec<GlobalTarget>, StoreError>;
    async fn upsert_global_target(&self, target: GlobalTarget) -> Result<GlobalTarget, StoreError>;

    // SOP snapshots, keyed by (agent_code, upload_date).
    async fn upsert_sop(&self, records: Vec<SopRecord>) -> Result<usize, StoreError>;
    /// Swaps out every record of `upload_date` for `records`.
    async fn replace_sop(&self, upload_date: NaiveDate, records: Vec<SopRecord>) -> Result<usize, StoreError>;
    async fn latest_sop_date(&self) -> Result<Option<NaiveDate>, StoreError>;
    async fn sop_records(&self, filter: &SopFilter, page: PageRequest) -> Result<Page<SopRecord>, StoreError>;

    // Pro program metadata, keyed by agent_code.
    async fn pro_metadata(&self) -> Result<Vec<ProMetadata>, StoreError>;
    async fn upsert_pro_metadata(&self, metadata: ProMetadata) -> Result<ProMetadata, StoreError>;

    // Report snapshots, latest per kind wins.
    async fn insert_report_snapshot(
        &self,
        kind: &str,
        content: Value,
        report_date: Option<NaiveDate>,
    ) -> Result<ReportSnapshot, StoreError>;
    async fn latest_report_snapshot(&self, kind: &str) -> Result<Option<ReportSnapshot>, StoreError>;
}

// --- JSON file store ---

#[derive(Debug, Default, Clone)]
struct StoreData {
    agents: BTreeMap<String, Agent>,
    contracts: BTreeMap<String, Contract>,
    /// Keyed by "YYYY-MM|MANAGER".
    allocations: BTreeMap<String, TeamAllocation>,
    global_targets: BTreeMap<String, GlobalTarget>,
    /// Keyed by (upload_date, AGENT).
    sop: BTreeMap<(NaiveDate, String), SopRecord>,
    pro_metadata: BTreeMap<String, ProMetadata>,
    snapshots: Vec<ReportSnapshot>,
    next_snapshot_id: u64,
}

fn allocation_key(month: &str, manager_code: &str) -> String {
    format!("{}|{}", month.trim(), normalize_code(manager_code))
}

/// On-disk shape; tuple keys do not survive as JSON object keys.
#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
struct StoreFile {
    agents: Vec<Agent>,
    contracts: Vec<Contract>,
    allocations: Vec<TeamAllocation>,
    global_targets: Vec<GlobalTarget>,
    sop: Vec<SopRecord>,
    pro_metadata: Vec<ProMetadata>,
    snapshots: Vec<ReportSnapshot>,
    next_snapshot_id: u64,
}

impl From<StoreFile> for StoreData {
    fn from(file: StoreFile) -> Self {
        Self {
            agents: file
                .agents
                .into_iter()
                .map(|a| (normalize_code(&a.agent_code), a))
                .collect(),
            contracts: file
                .contracts
                .into_iter()
                .map(|c| (c.policy_number.trim().to_string(), c))
                .collect(),
            allocations: file
                .allocations
                .into_iter()
                .map(|a| (allocation_key(&a.month, &a.manager_code), a))
                .collect(),
            global_targets: file
                .global_targets
                .into_iter()
                .map(|t| (t.month.trim().to_string(), t))
                .collect(),
            sop: file
                .sop
                .into_iter()
                .map(|r| ((r.upload_date, normalize_code(&r.agent_code)), r))
                .collect(),
            pro_metadata: file
                .pro_metadata
                .into_iter()
                .map(|m| (normalize_code(&m.agent_code), m))
                .collect(),
            snapshots: file.snapshots,
            next_snapshot_id: file.next_snapshot_id,
        }
    }
}

impl From<&StoreData> for StoreFile {
    fn from(data: &StoreData) -> Self {
        Self {
            agents: data.agents.values().cloned().collect(),
            contracts: data.contracts.values().cloned().collect(),
            allocations: data.allocations.values().cloned().collect(),
            global_targets: data.global_targets.values().cloned().collect(),
            sop: data.sop.values().cloned().collect(),
            pro_metadata: data.pro_metadata.values().cloned().collect(),
            snapshots: data.snapshots.clone(),
            next_snapshot_id: data.next_snapshot_id,
        }
    }
}

/// All collections in one JSON document, rewritten after every mutation.
/// Without a path the store lives in memory only.
pub struct JsonFileStore {
    path: Option<PathBuf>,
    data: RwLock<StoreData>,
}

impl JsonFileStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(StoreData::default()),
        }
    }

    /// Opens the data file, starting empty when it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = if path.exists() {
            let json_string = fs::read_to_string(&path)
                .map_err(|e| io_context(e, format!("Failed to read data file: {:?}", path)))?;
            let file: StoreFile = serde_json::from_str(&json_string)?;
            StoreData::from(file)
        } else {
            info!("Data file {:?} not found, starting with an empty store", path);
            StoreData::default()
        };
        info!(
            "Store opened: {} agents, {} contracts, {} SOP records",
            data.agents.len(),
            data.contracts.len(),
            data.sop.len()
        );
        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    async fn persist(&self, data: &StoreData) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_atomically(path, &serde_json::to_string_pretty(&StoreFile::from(data))?).await
    }

    /// Applies `change` and writes the file. When the write fails the
    /// in-memory state is restored, so reads never run ahead of the file.
    /// Callers hold the write lock across the whole change and write.
    async fn commit<T, F>(&self, data: &mut StoreData, change: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut StoreData) -> T + Send,
        T: Send,
    {
        let previous = self.path.is_some().then(|| data.clone());
        let outcome = change(data);
        if let Err(e) = self.persist(data).await {
            if let Some(previous) = previous {
                *data = previous;
            }
            return Err(e);
        }
        Ok(outcome)
    }
}

// Write-then-rename so a crash never leaves a truncated data file.
async fn write_atomically(path: &Path, contents: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_context(e, format!("Failed to create data directory: {:?}", parent)))?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| io_context(e, format!("Failed to write {:?}", tmp)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_context(e, format!("Failed to replace {:?}", path)))?;
    debug!("Persisted store to {:?}", path);
    Ok(())
}

#[async_trait]
impl Store for JsonFileStore {
    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        let data = self.data.read().await;
        Ok(StoreCounts {
            agents: data.agents.len(),
            contracts: data.contracts.len(),
            sop_records: data.sop.len(),
        })
    }

    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        Ok(self.data.read().await.agents.values().cloned().collect())
    }

    async fn get_agent(&self, code: &str) -> Result<Option<Agent>, StoreError> {
        Ok(self.data.read().await.agents.get(&normalize_code(code)).cloned())
    }

    async fn insert_agent(&self, agent: Agent) -> Result<Agent, StoreError> {
        let key = normalize_code(&agent.agent_code);
        let mut data = self.data.write().await;
        if data.agents.contains_key(&key) {
            return Err(StoreError::Conflict {
                entity: "agent",
                key: agent.agent_code,
            });
        }
        let stored = agent.clone();
        self.commit(&mut data, move |d| {
            d.agents.insert(key, stored);
        })
        .await?;
        Ok(agent)
    }

    async fn update_agent(&self, code: &str, mut agent: Agent) -> Result<Agent, StoreError> {
        let key = normalize_code(code);
        let mut data = self.data.write().await;
        let Some(existing) = data.agents.get(&key) else {
            return Err(StoreError::NotFound {
                entity: "agent",
                key: code.to_string(),
            });
        };
        agent.agent_code = existing.agent_code.clone();
        let stored = agent.clone();
        self.commit(&mut data, move |d| {
            d.agents.insert(key, stored);
        })
        .await?;
        Ok(agent)
    }

    async fn delete_agent(&self, code: &str) -> Result<(), StoreError> {
        let key = normalize_code(code);
        let mut data = self.data.write().await;
        if !data.agents.contains_key(&key) {
            return Err(StoreError::NotFound {
                entity: "agent",
                key: code.to_string(),
            });
        }
        self.commit(&mut data, move |d| {
            d.agents.remove(&key);
        })
        .await
    }

    async fn upsert_agents(&self, agents: Vec<Agent>) -> Result<usize, StoreError> {
        let mut data = self.data.write().await;
        self.commit(&mut data, |d| {
            let count = agents.len();
            for agent in agents {
                d.agents.insert(normalize_code(&agent.agent_code), agent);
            }
            count
        })
        .await
    }

    async fn replace_agents(&self, agents: Vec<Agent>) -> Result<usize, StoreError> {
        let fresh: BTreeMap<String, Agent> = agents
            .into_iter()
            .map(|a| (normalize_code(&a.agent_code), a))
            .collect();
        let count = fresh.len();
        let mut data = self.data.write().await;
        let previous = self
            .commit(&mut data, |d| std::mem::replace(&mut d.agents, fresh).len())
            .await?;
        info!("Replaced {} agents with {}", previous, count);
        Ok(count)
    }

    async fn delete_all_agents(&self) -> Result<usize, StoreError> {
        let mut data = self.data.write().await;
        self.commit(&mut data, |d| std::mem::take(&mut d.agents).len())
            .await
    }

    async fn list_contracts(&self) -> Result<Vec<Contract>, StoreError> {
        Ok(self.data.read().await.contracts.values().cloned().collect())
    }

    async fn contracts_touching(&self, month: &ReportMonth) -> Result<Vec<Contract>, StoreError> {
        let start = month.first_day();
        let data = self.data.read().await;
        Ok(data
            .contracts
            .values()
            .filter(|c| {
                c.submit_date.is_some_and(|d| d >= start)
                    || c.issue_date.is_some_and(|d| d >= start)
                    || c.is_pending()
            })
            .cloned()
            .collect())
    }

    async fn upsert_contracts(&self, contracts: Vec<Contract>) -> Result<usize, StoreError> {
        let mut data = self.data.write().await;
        self.commit(&mut data, |d| {
            let count = contracts.len();
            for contract in contracts {
                d.contracts
                    .insert(contract.policy_number.trim().to_string(), contract);
            }
            count
        })
        .await
    }

    async fn replace_contracts(&self, contracts: Vec<Contract>) -> Result<usize, StoreError> {
        let fresh: BTreeMap<String, Contract> = contracts
            .into_iter()
            .map(|c| (c.policy_number.trim().to_string(), c))
            .collect();
        let count = fresh.len();
        let mut data = self.data.write().await;
        self.commit(&mut data, |d| d.contracts = fresh).await?;
        Ok(count)
    }

    async fn allocations_for_month(&self, month: &ReportMonth) -> Result<Vec<TeamAllocation>, StoreError> {
        let month = month.to_string();
        let data = self.data.read().await;
        Ok(data
            .allocations
            .values()
            .filter(|a| a.month.trim() == month)
            .cloned()
            .collect())
    }

    async fn upsert_allocations(&self, allocations: Vec<TeamAllocation>) -> Result<usize, StoreError> {
        let mut data = self.data.write().await;
        self.commit(&mut data, |d| {
            let count = allocations.len();
            for allocation in allocations {
                d.allocations
                    .insert(allocation_key(&allocation.month, &allocation.manager_code), allocation);
            }
            count
        })
        .await
    }

    async fn global_target(&self, month: &ReportMonth) -> Result<Option<GlobalTarget>, StoreError> {
        Ok(self
            .data
            .read()
            .await
            .global_targets
            .get(&month.to_string())
            .cloned())
    }

    async fn global_targets_for_year(&self, year: i32) -> Result<Vec<GlobalTarget>, StoreError> {
        let prefix = format!("{:04}-", year);
        let data = self.data.read().await;
        Ok(data
            .global_targets
            .iter()
            .filter(|(month, _)| month.starts_with(&prefix))
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn upsert_global_target(&self, target: GlobalTarget) -> Result<GlobalTarget, StoreError> {
        let stored = target.clone();
        let mut data = self.data.write().await;
        self.commit(&mut data, move |d| {
            d.global_targets.insert(stored.month.trim().to_string(), stored);
        })
        .await?;
        Ok(target)
    }

    async fn upsert_sop(&self, records: Vec<SopRecord>) -> Result<usize, StoreError> {
        let mut data = self.data.write().await;
        self.commit(&mut data, |d| {
            let count = records.len();
            for record in records {
                d.sop
                    .insert((record.upload_date, normalize_code(&record.agent_code)), record);
            }
            count
        })
        .await
    }

    async fn replace_sop(&self, upload_date: NaiveDate, records: Vec<SopRecord>) -> Result<usize, StoreError> {
        let mut data = self.data.write().await;
        self.commit(&mut data, |d| {
            d.sop.retain(|(date, _), _| *date != upload_date);
            let count = records.len();
            for record in records {
                d.sop
                    .insert((record.upload_date, normalize_code(&record.agent_code)), record);
            }
            count
        })
        .await
    }

    async fn latest_sop_date(&self) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self.data.read().await.sop.keys().map(|(date, _)| *date).max())
    }

    async fn sop_records(&self, filter: &SopFilter, page: PageRequest) -> Result<Page<SopRecord>, StoreError> {
        let data = self.data.read().await;
        let mut matching: Vec<&SopRecord> = data.sop.values().filter(|r| filter.matches(r)).collect();
        matching.sort_by(|a, b| {
            b.upload_date
                .cmp(&a.upload_date)
                .then_with(|| a.agent_code.cmp(&b.agent_code))
        });
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect();
        Ok(Page {
            items,
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    async fn pro_metadata(&self) -> Result<Vec<ProMetadata>, StoreError> {
        Ok(self.data.read().await.pro_metadata.values().cloned().collect())
    }

    async fn upsert_pro_metadata(&self, metadata: ProMetadata) -> Result<ProMetadata, StoreError> {
        let stored = metadata.clone();
        let mut data = self.data.write().await;
        self.commit(&mut data, move |d| {
            d.pro_metadata.insert(normalize_code(&stored.agent_code), stored);
        })
        .await?;
        Ok(metadata)
    }

    async fn insert_report_snapshot(
        &self,
        kind: &str,
        content: Value,
        report_date: Option<NaiveDate>,
    ) -> Result<ReportSnapshot, StoreError> {
        let kind = kind.to_string();
        let mut data = self.data.write().await;
        self.commit(&mut data, move |d| {
            d.next_snapshot_id += 1;
            let snapshot = ReportSnapshot {
                id: d.next_snapshot_id,
                kind,
                content,
                report_date,
                created_at: Utc::now(),
            };
            d.snapshots.push(snapshot.clone());
            snapshot
        })
        .await
    }

    async fn latest_report_snapshot(&self, kind: &str) -> Result<Option<ReportSnapshot>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .snapshots
            .iter()
            .filter(|s| s.kind == kind)
            .max_by_key(|s| (s.created_at, s.id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContractStatus, Rank};
    use crate::loader::SheetRow;
    use rust_decimal_macros::dec;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sop(code: &str, date: &str) -> SopRecord {
        SopRecord {
            agent_code: code.to_string(),
            upload_date: d(date),
            data: SheetRow::new([("MSDL", code)]),
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("salesdesk-{}-{}.json", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_agent_crud_and_conflicts() {
        let store = JsonFileStore::in_memory();
        store.insert_agent(Agent::new("A1", "Lan", Rank::Fa)).await.unwrap();

        let dup = store.insert_agent(Agent::new("a1", "Dup", Rank::Fa)).await;
        assert!(matches!(dup, Err(StoreError::Conflict { .. })));

        let updated = store
            .update_agent("a1", Agent::new("ignored", "Lan Anh", Rank::Um))
            .await
            .unwrap();
        assert_eq!(updated.agent_code, "A1", "code in the path wins");
        assert_eq!(store.get_agent("A1").await.unwrap().unwrap().rank, Rank::Um);

        store.delete_agent("A1").await.unwrap();
        assert!(matches!(
            store.delete_agent("A1").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_replace_agents_swaps_whole_collection() {
        let store = JsonFileStore::in_memory();
        store
            .upsert_agents(vec![Agent::new("A1", "x", Rank::Fa), Agent::new("A2", "y", Rank::Fa)])
            .await
            .unwrap();
        store.replace_agents(vec![Agent::new("B1", "z", Rank::Um)]).await.unwrap();

        let codes: Vec<String> = store
            .list_agents()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.agent_code)
            .collect();
        assert_eq!(codes, vec!["B1"]);
    }

    #[tokio::test]
    async fn test_contracts_touching_month() {
        let store = JsonFileStore::in_memory();
        let contract = |p: &str, submit: Option<&str>, issue: Option<&str>, status| Contract {
            policy_number: p.into(),
            agent_code: "A1".into(),
            submit_date: submit.map(d),
            issue_date: issue.map(d),
            status,
            ..Default::default()
        };
        store
            .upsert_contracts(vec![
                contract("OLD", Some("2024-01-02"), Some("2024-01-20"), ContractStatus::Issued),
                contract("OLD-PENDING", Some("2023-12-01"), None, ContractStatus::Pending),
                contract("LATE-ISSUE", Some("2024-02-20"), Some("2024-03-02"), ContractStatus::Issued),
                contract("NEW", Some("2024-03-05"), None, ContractStatus::Pending),
            ])
            .await
            .unwrap();

        let month = ReportMonth::parse("2024-03").unwrap();
        let mut touching: Vec<String> = store
            .contracts_touching(&month)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.policy_number)
            .collect();
        touching.sort();
        assert_eq!(touching, vec!["LATE-ISSUE", "NEW", "OLD-PENDING"]);
    }

    #[tokio::test]
    async fn test_upserts_are_idempotent_by_key() {
        let store = JsonFileStore::in_memory();
        let alloc = TeamAllocation {
            month: "2024-03".into(),
            manager_code: "M1".into(),
            fyp_target: dec!(100),
            active_target: 1,
        };
        store.upsert_allocations(vec![alloc.clone()]).await.unwrap();
        store
            .upsert_allocations(vec![TeamAllocation {
                manager_code: " m1 ".into(),
                fyp_target: dec!(200),
                ..alloc
            }])
            .await
            .unwrap();

        let month = ReportMonth::parse("2024-03").unwrap();
        let stored = store.allocations_for_month(&month).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].fyp_target, dec!(200));
    }

    #[tokio::test]
    async fn test_replace_sop_only_touches_its_date() {
        let store = JsonFileStore::in_memory();
        store
            .upsert_sop(vec![sop("A1", "2024-03-01"), sop("A2", "2024-03-01"), sop("A1", "2024-02-01")])
            .await
            .unwrap();
        store
            .replace_sop(d("2024-03-01"), vec![sop("A3", "2024-03-01")])
            .await
            .unwrap();

        let page = store
            .sop_records(&SopFilter::default(), PageRequest::default())
            .await
            .unwrap();
        let keys: Vec<(String, NaiveDate)> = page
            .items
            .iter()
            .map(|r| (r.agent_code.clone(), r.upload_date))
            .collect();
        assert_eq!(
            keys,
            vec![("A3".to_string(), d("2024-03-01")), ("A1".to_string(), d("2024-02-01"))]
        );
        assert_eq!(store.latest_sop_date().await.unwrap(), Some(d("2024-03-01")));
    }

    #[tokio::test]
    async fn test_sop_paging_and_filter() {
        let store = JsonFileStore::in_memory();
        let records: Vec<SopRecord> = (1..=5).map(|i| sop(&format!("AG{}", i), "2024-03-01")).collect();
        store.upsert_sop(records).await.unwrap();

        let page = store
            .sop_records(&SopFilter::default(), PageRequest::for_page(2, 3))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages(), 3);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].agent_code, "AG5");

        let filter = SopFilter {
            agent_code: Some("g3".into()),
            upload_date: Some(d("2024-03-01")),
        };
        let page = store.sop_records(&filter, PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_far_page_number_saturates_to_empty_page() {
        let request = PageRequest::for_page(50, usize::MAX / 2);
        assert_eq!(request.offset, usize::MAX);
        assert_eq!(PageRequest::for_page(50, 0), PageRequest::for_page(50, 1));

        let store = JsonFileStore::in_memory();
        store.upsert_sop(vec![sop("A1", "2024-03-01")]).await.unwrap();
        let page = store.sop_records(&SopFilter::default(), request).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_latest_snapshot_per_kind() {
        let store = JsonFileStore::in_memory();
        store
            .insert_report_snapshot("pending", serde_json::json!({"v": 1}), None)
            .await
            .unwrap();
        store
            .insert_report_snapshot("handover", serde_json::json!({"v": 2}), None)
            .await
            .unwrap();
        store
            .insert_report_snapshot("pending", serde_json::json!({"v": 3}), None)
            .await
            .unwrap();

        let latest = store.latest_report_snapshot("pending").await.unwrap().unwrap();
        assert_eq!(latest.content["v"], 3);
        assert!(store.latest_report_snapshot("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_reloads_what_it_wrote() {
        let path = temp_path("reload");
        let _ = fs::remove_file(&path);
        {
            let store = JsonFileStore::open(&path).unwrap();
            let mut agent = Agent::new("A1", "Lan", Rank::Um);
            agent.group_code = Some("G1".into());
            store.insert_agent(agent).await.unwrap();
            store.upsert_sop(vec![sop("A1", "2024-03-01")]).await.unwrap();
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        let agent = reopened.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(agent.group_code.as_deref(), Some("G1"));
        assert_eq!(reopened.counts().await.unwrap().sop_records, 1);
        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        // A regular file where the data directory should be makes every write fail.
        let blocker = temp_path("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        let store = JsonFileStore::open(blocker.join("data.json")).unwrap();

        let upsert = store.upsert_agents(vec![Agent::new("A1", "Lan", Rank::Fa)]).await;
        assert!(matches!(upsert, Err(StoreError::Io { .. })));
        assert!(store.list_agents().await.unwrap().is_empty());

        assert!(store.insert_agent(Agent::new("A2", "Minh", Rank::Um)).await.is_err());
        assert!(store.get_agent("A2").await.unwrap().is_none());

        assert!(store
            .insert_report_snapshot("pending", serde_json::json!({"v": 1}), None)
            .await
            .is_err());
        assert!(store.latest_report_snapshot("pending").await.unwrap().is_none());
        assert_eq!(store.counts().await.unwrap(), StoreCounts::default());
        let _ = fs::remove_file(&blocker);
    }
}
