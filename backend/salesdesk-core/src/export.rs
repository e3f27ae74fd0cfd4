// src/export.rs
use chrono::NaiveDate;
use thiserror::Error;
use tracing::info;

use crate::domain::{Agent, Contract, SopRecord};
use crate::hierarchy::AgentIndex;
use crate::period::ReportMonth;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV writing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to flush CSV buffer: {0}")]
    Io(#[from] std::io::Error),

    #[error("No data to export")]
    Empty,
}

const CONTRACT_COLUMNS: [&str; 14] = [
    "STT",
    "Mã ĐL",
    "Tên Đại lý",
    "Cấp bậc",
    "MSQL",
    "Tên Quản lý",
    "Số HĐ",
    "Tên Khách hàng",
    "Sản phẩm",
    "Ngày nộp",
    "Ngày cấp",
    "Phí BH",
    "APE",
    "Trạng thái",
];

fn display_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%d/%m/%Y").to_string()).unwrap_or_default()
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, ExportError> {
    writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))
}

/// Contracts submitted in `month` (all contracts without one), joined with
/// their agent, as a CSV document.
pub fn contracts_csv(
    contracts: &[Contract],
    agents: &[Agent],
    month: Option<&ReportMonth>,
) -> Result<Vec<u8>, ExportError> {
    let selected: Vec<&Contract> = contracts
        .iter()
        .filter(|c| match month {
            Some(month) => c.submit_date.is_some_and(|d| month.contains(d)),
            None => true,
        })
        .collect();
    if selected.is_empty() {
        return Err(ExportError::Empty);
    }

    let index = AgentIndex::new(agents);
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CONTRACT_COLUMNS)?;

    for (i, contract) in selected.iter().enumerate() {
        let agent = index.get(&contract.agent_code);
        writer.write_record([
            (i + 1).to_string(),
            contract.agent_code.clone(),
            agent.map(|a| a.full_name.clone()).unwrap_or_default(),
            agent.map(Agent::display_rank).unwrap_or_default(),
            agent.and_then(|a| a.manager_code.clone()).unwrap_or_default(),
            agent.and_then(|a| a.manager_name.clone()).unwrap_or_default(),
            contract.policy_number.clone(),
            contract.customer_name.clone().unwrap_or_default(),
            contract.product_code.clone().unwrap_or_default(),
            display_date(contract.submit_date),
            display_date(contract.issue_date),
            contract.fyp.to_string(),
            contract.ape.to_string(),
            contract.status.display_label().to_string(),
        ])?;
    }

    info!("Exported {} contracts", selected.len());
    finish(writer)
}

pub fn contracts_file_name(month: Option<&ReportMonth>) -> String {
    format!(
        "Danh_sach_HD_{}.csv",
        month.map_or_else(|| "all".to_string(), |m| m.to_string())
    )
}

/// SOP rows in agent code order. Columns are the union of all row headers
/// in first-seen order; missing cells are left empty.
pub fn sop_csv(records: &[SopRecord]) -> Result<Vec<u8>, ExportError> {
    if records.is_empty() {
        return Err(ExportError::Empty);
    }
    let mut sorted: Vec<&SopRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.agent_code.cmp(&b.agent_code));

    let mut headers: Vec<&str> = Vec::new();
    for record in &sorted {
        for header in record.data.headers() {
            if !headers.contains(&header) {
                headers.push(header);
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&headers)?;
    for record in &sorted {
        let cells = record.data.cells();
        writer.write_record(headers.iter().map(|h| {
            cells
                .iter()
                .find(|(key, _)| key == h)
                .map(|(_, value)| value.as_str())
                .unwrap_or("")
        }))?;
    }

    info!("Exported {} SOP rows", sorted.len());
    finish(writer)
}

pub fn sop_file_name(upload_date: NaiveDate) -> String {
    format!("SOP_Data_{}.csv", upload_date.format("%Y%m%d"))
}
