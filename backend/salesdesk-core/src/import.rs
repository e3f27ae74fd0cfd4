// src/import.rs
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::Contract;
use crate::hierarchy::normalize_code;
use crate::loader::{LoaderError, Sheet};
use crate::normalize::{
    dedupe_keep_last, find_header_row, normalize_agent_row, normalize_contract_row, normalize_sop_row,
    sop_upload_date, CONTRACT_HEADER_MARKER, SOP_HEADER_MARKER,
};
use crate::store::{Store, StoreError};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Failed to read uploaded sheet: {0}")]
    Loader(#[from] LoaderError),

    #[error("No data found in the uploaded file")]
    Empty,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// `Update` merges into existing data, `Replace` swaps the collection (or,
/// for SOP, the snapshot of the same upload date).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    #[default]
    Update,
    Replace,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    /// Rows without an identifier.
    pub skipped: usize,
    /// Earlier rows overwritten by a later row with the same key.
    pub duplicates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<NaiveDate>,
}

// --- Agents ---

pub async fn import_agents(
    store: &dyn Store,
    sheet: &Sheet,
    mode: ImportMode,
) -> Result<ImportSummary, ImportError> {
    let rows = sheet.keyed_rows(0, "");
    if rows.is_empty() {
        return Err(ImportError::Empty);
    }

    let agents: Vec<_> = rows.iter().filter_map(normalize_agent_row).collect();
    let skipped = rows.len() - agents.len();
    let (agents, duplicates) = dedupe_keep_last(agents, |a| normalize_code(&a.agent_code));
    if duplicates > 0 {
        warn!("Agent import: {} duplicate agent codes, keeping the last row", duplicates);
    }

    let imported = match mode {
        ImportMode::Replace => store.replace_agents(agents).await?,
        ImportMode::Update => store.upsert_agents(agents).await?,
    };
    info!(
        "Agent import ({:?}): {} imported, {} skipped, {} duplicates",
        mode, imported, skipped, duplicates
    );
    Ok(ImportSummary {
        imported,
        skipped,
        duplicates,
        upload_date: None,
    })
}

// --- Contracts ---

pub async fn import_contracts(
    store: &dyn Store,
    sheet: &Sheet,
    mode: ImportMode,
) -> Result<ImportSummary, ImportError> {
    let header_row = find_header_row(sheet.raw_rows(), CONTRACT_HEADER_MARKER);
    let rows = sheet.keyed_rows(header_row, "");
    if rows.is_empty() {
        return Err(ImportError::Empty);
    }

    let patches: Vec<_> = rows.iter().filter_map(normalize_contract_row).collect();
    let skipped = rows.len() - patches.len();
    let (patches, duplicates) = dedupe_keep_last(patches, |p| p.policy_number.trim().to_string());

    let imported = match mode {
        ImportMode::Replace => {
            let contracts: Vec<Contract> = patches.into_iter().map(|p| p.merge_into(None)).collect();
            store.replace_contracts(contracts).await?
        }
        ImportMode::Update => {
            let existing: HashMap<String, Contract> = store
                .list_contracts()
                .await?
                .into_iter()
                .map(|c| (c.policy_number.trim().to_string(), c))
                .collect();
            let contracts: Vec<Contract> = patches
                .into_iter()
                .map(|p| {
                    let current = existing.get(p.policy_number.trim());
                    p.merge_into(current)
                })
                .collect();
            store.upsert_contracts(contracts).await?
        }
    };
    info!(
        "Contract import ({:?}, header row {}): {} imported, {} skipped, {} duplicates",
        mode, header_row, imported, skipped, duplicates
    );
    Ok(ImportSummary {
        imported,
        skipped,
        duplicates,
        upload_date: None,
    })
}

// --- SOP snapshots ---

pub async fn import_sop(
    store: &dyn Store,
    sheet: &Sheet,
    mode: ImportMode,
    explicit_date: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<ImportSummary, ImportError> {
    let header_row = find_header_row(sheet.raw_rows(), SOP_HEADER_MARKER);
    let rows = sheet.keyed_rows(header_row, "");
    if rows.is_empty() {
        return Err(ImportError::Empty);
    }

    let upload_date = sop_upload_date(&rows, explicit_date, today);
    let records: Vec<_> = rows
        .iter()
        .filter_map(|row| normalize_sop_row(row, upload_date))
        .collect();
    let skipped = rows.len() - records.len();
    let (records, duplicates) = dedupe_keep_last(records, |r| normalize_code(&r.agent_code));

    let imported = match mode {
        ImportMode::Replace => store.replace_sop(upload_date, records).await?,
        ImportMode::Update => store.upsert_sop(records).await?,
    };
    info!(
        "SOP import ({:?}) for {}: {} imported, {} skipped, {} duplicates",
        mode, upload_date, imported, skipped, duplicates
    );
    Ok(ImportSummary {
        imported,
        skipped,
        duplicates,
        upload_date: Some(upload_date),
    })
}
