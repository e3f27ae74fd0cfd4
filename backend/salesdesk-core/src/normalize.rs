// src/normalize.rs
use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::hash::Hash;
use std::str::FromStr;
use tracing::debug;

use crate::domain::{Agent, AgentStatus, ContractPatch, ContractStatus, Rank, SopRecord};
use crate::loader::{normalize_header, SheetRow};

// --- Alias tables ---

/// Accepted column headers for one canonical field, in priority order.
#[derive(Debug, Clone, Copy)]
pub struct FieldAliases {
    pub field: &'static str,
    pub aliases: &'static [&'static str],
}

#[derive(Debug, Clone, Copy)]
pub struct AliasTable(pub &'static [FieldAliases]);

impl AliasTable {
    pub fn aliases(&self, field: &str) -> &'static [&'static str] {
        self.0
            .iter()
            .find(|entry| entry.field == field)
            .map(|entry| entry.aliases)
            .unwrap_or(&[])
    }

    pub fn resolve(&self, row: &SheetRow, field: &str) -> Option<String> {
        resolve(row, self.aliases(field))
    }

    pub fn has_any(&self, row: &SheetRow, field: &str) -> bool {
        self.aliases(field).iter().any(|alias| row.has_header(alias))
    }
}

pub const AGENT_FIELDS: AliasTable = AliasTable(&[
    FieldAliases { field: "agent_code", aliases: &["MS", "Mã số", "Agent Code", "Code", "Mã ĐL"] },
    FieldAliases { field: "full_name", aliases: &["Họ tên", "Tên", "Full Name", "Name", "Họ và tên", "Đại lý"] },
    FieldAliases {
        field: "manager_code",
        aliases: &["Mã quản lý", "Mã QL", "Manager Code", "Mã người quản lý", "User Code", "Mã số Quản lý"],
    },
    FieldAliases { field: "manager_name", aliases: &["Quản lý", "Tên quản lý", "Manager Name", "Manager"] },
    FieldAliases { field: "group_code", aliases: &["Mã tổ", "Group Code", "Group", "Mã team"] },
    FieldAliases { field: "rank", aliases: &["Cấp bậc", "Rank", "Chức danh", "Level"] },
    FieldAliases { field: "status", aliases: &["Trạng thái", "Status"] },
    FieldAliases { field: "dob", aliases: &["Ngày sinh", "DOB", "Birth Date", "Năm sinh"] },
    FieldAliases {
        field: "join_date",
        aliases: &[
            "Ngày gia nhập", "Join Date", "Start Date", "Ngày vào làm", "Ngày cấp code",
            "Ngày bổ nhiệm", "Date of Joining", "Ngay gia nhap", "Ngay vao lam",
        ],
    },
    FieldAliases { field: "phone", aliases: &["Điện thoại", "SĐT", "Phone", "Mobile", "Tel", "Số điện thoại"] },
    FieldAliases { field: "email", aliases: &["Email", "Mail", "Thư điện tử"] },
    FieldAliases { field: "id_card", aliases: &["CMND", "CCCD", "ID Card", "CMT", "Căn cước"] },
    FieldAliases { field: "address", aliases: &["Địa chỉ", "Address", "Nơi ở"] },
    FieldAliases { field: "bank_account", aliases: &["Số tài khoản", "STK", "Bank Account", "Account No"] },
    FieldAliases { field: "bank_name", aliases: &["Ngân hàng", "Bank Name", "Bank", "Tên ngân hàng"] },
    FieldAliases { field: "tax_code", aliases: &["Mã số thuế", "MST", "Tax Code"] },
    FieldAliases { field: "office_code", aliases: &["Văn phòng", "Office", "Mã VP", "VP"] },
    FieldAliases {
        field: "recruiter_code",
        aliases: &[
            "Mã tuyển dụng", "Mã TD", "Recruiter Code", "Mã người tuyển dụng", "Mã giới thiệu",
            "Mã số người tuyển dụng",
        ],
    },
]);

pub const CONTRACT_FIELDS: AliasTable = AliasTable(&[
    FieldAliases { field: "policy_number", aliases: &["Số HĐ", "Policy Number"] },
    FieldAliases { field: "agent_code", aliases: &["MSDL", "Agent Code", "Mã ĐL"] },
    FieldAliases { field: "customer_name", aliases: &["Người được bảo hiểm", "Customer Name", "Bên mua bảo hiểm"] },
    FieldAliases { field: "product_code", aliases: &["Sản phẩm", "Product"] },
    FieldAliases { field: "submit_date", aliases: &["Ngày nộp", "Submit Date"] },
    FieldAliases { field: "issue_date", aliases: &["Cấp hợp đồng", "Ngày cấp", "Issue Date"] },
    FieldAliases { field: "decline_date", aliases: &["Từ chối", "Declined Date", "Ngày hủy"] },
    FieldAliases { field: "fyp", aliases: &["Phí Bảo hiểm", "FYP"] },
    FieldAliases { field: "ape", aliases: &["APE"] },
    FieldAliases { field: "status", aliases: &["Tình trạng hợp đồng", "Status"] },
]);

pub const SOP_FIELDS: AliasTable = AliasTable(&[
    FieldAliases { field: "agent_code", aliases: &["MSDL", "Agent Code", "Mã ĐL", "Mã đại lý"] },
    FieldAliases { field: "upload_date", aliases: &["Ngày chốt dữ liệu", "Ngày chốt", "Date"] },
    FieldAliases { field: "full_name", aliases: &["Tên Đại lý", "Tên đầy đủ Đại lý", "Full Name"] },
    FieldAliases { field: "rank", aliases: &["Chức danh", "Rank", "Cấp bậc"] },
    FieldAliases { field: "agent_group", aliases: &["Nhóm Đại lý", "Nhóm ĐL", "Group"] },
    FieldAliases { field: "mdrt_fyp", aliases: &["MDRT-FYP tới hiện tại", "FYP Issued"] },
    FieldAliases { field: "monthly_fyp", aliases: &["FYP  tháng T", "FYP tháng T"] },
]);

/// First alias whose value is non-empty after trimming.
pub fn resolve(row: &SheetRow, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|alias| {
        row.get(alias)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}

// --- Dates & amounts ---

static SLASH_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("valid slash date regex"));
static ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})(?:[T ].*)?$").expect("valid iso date regex")
});
static DASH_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})-(\d{1,2})-(\d{4})$").expect("valid dash date regex"));

/// Serial day numbers at or below this are treated as plain numbers.
const SERIAL_DATE_THRESHOLD: f64 = 10000.0;

// Day zero of spreadsheet serials. Two days before 1900-01-01 absorbs both
// the 1-based count and the phantom 1900-02-29.
fn serial_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 30)
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

/// Parses the date encodings found in uploaded sheets. Unparseable input,
/// including impossible calendar dates, yields `None`.
pub fn parse_sheet_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if !value.contains('/') && !value.contains('-') {
        let serial: f64 = value.parse().ok()?;
        if !serial.is_finite() || serial <= SERIAL_DATE_THRESHOLD {
            return None;
        }
        return serial_epoch()?.checked_add_signed(Duration::days(serial.floor() as i64));
    }

    if let Some(caps) = SLASH_DATE.captures(value) {
        return ymd(&caps[3], &caps[2], &caps[1]);
    }
    if let Some(caps) = ISO_DATE.captures(value) {
        return ymd(&caps[1], &caps[2], &caps[3]);
    }
    if let Some(caps) = DASH_DATE.captures(value) {
        return ymd(&caps[3], &caps[2], &caps[1]);
    }
    None
}

/// Money cells may carry thousands separators; anything unreadable is zero.
pub fn parse_amount(raw: &str) -> Decimal {
    let cleaned: String = raw.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Decimal::ZERO;
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .unwrap_or(Decimal::ZERO)
}

// --- Status derivation ---

pub fn derive_contract_status(
    raw_status: &str,
    issue_date: Option<NaiveDate>,
    decline_date: Option<NaiveDate>,
) -> ContractStatus {
    let text = raw_status.trim().to_lowercase();

    if decline_date.is_some() {
        ContractStatus::Cancelled
    } else if issue_date.is_some() {
        ContractStatus::Issued
    } else if ["hủy", "cancel", "từ chối", "declined"].iter().any(|k| text.contains(k)) {
        ContractStatus::Cancelled
    } else if ["trả phí", "active", "hiệu lực"].iter().any(|k| text.contains(k)) {
        ContractStatus::Issued
    } else if text.contains("ack") {
        ContractStatus::Ack
    } else {
        ContractStatus::Pending
    }
}

// --- Row normalizers ---

pub fn normalize_agent_row(row: &SheetRow) -> Option<Agent> {
    let field = |name: &str| AGENT_FIELDS.resolve(row, name);
    let date = |name: &str| field(name).as_deref().and_then(parse_sheet_date);

    let Some(agent_code) = field("agent_code") else {
        debug!("Skipping agent row without an agent code");
        return None;
    };
    let raw_rank = field("rank").unwrap_or_else(|| "FA".to_string());
    let raw_status = field("status").unwrap_or_default();

    Some(Agent {
        agent_code,
        full_name: field("full_name").unwrap_or_default(),
        rank: Rank::parse(&raw_rank),
        status: AgentStatus::derive(&raw_rank, &raw_status),
        status_note: None,
        manager_code: field("manager_code"),
        manager_name: field("manager_name"),
        group_code: field("group_code"),
        join_date: date("join_date"),
        dob: date("dob"),
        phone: field("phone"),
        email: field("email"),
        id_card: field("id_card"),
        address: field("address"),
        bank_account: field("bank_account"),
        bank_name: field("bank_name"),
        tax_code: field("tax_code"),
        office_code: field("office_code"),
        recruiter_code: field("recruiter_code"),
    })
}

/// Contract rows are partial updates: only columns present in the sheet are
/// carried, and status is recomputed only when a status column is present.
pub fn normalize_contract_row(row: &SheetRow) -> Option<ContractPatch> {
    let field = |name: &str| CONTRACT_FIELDS.resolve(row, name);
    let present = |name: &str| CONTRACT_FIELDS.has_any(row, name);
    let date = |name: &str| field(name).as_deref().and_then(parse_sheet_date);

    let Some(policy_number) = field("policy_number") else {
        debug!("Skipping contract row without a policy number");
        return None;
    };

    let issue_date = date("issue_date");
    let decline_date = date("decline_date");
    let raw_status = field("status");

    let mut patch = ContractPatch {
        policy_number,
        ..Default::default()
    };

    if present("agent_code") {
        patch.agent_code = Some(field("agent_code").unwrap_or_default());
    }
    if present("customer_name") {
        patch.customer_name = Some(field("customer_name"));
    }
    if present("product_code") {
        patch.product_code = Some(field("product_code"));
    }
    if present("submit_date") {
        patch.submit_date = Some(date("submit_date"));
    }
    if present("issue_date") {
        patch.issue_date = Some(issue_date);
    }
    if present("fyp") {
        patch.fyp = Some(field("fyp").as_deref().map(parse_amount).unwrap_or_default());
    }
    if present("ape") {
        patch.ape = Some(field("ape").as_deref().map(parse_amount).unwrap_or_default());
    }
    if present("status") || present("issue_date") || present("decline_date") {
        let status = derive_contract_status(
            raw_status.as_deref().unwrap_or_default(),
            issue_date,
            decline_date,
        );
        patch.status = Some((status, raw_status));
    }

    Some(patch)
}

pub fn normalize_sop_row(row: &SheetRow, upload_date: NaiveDate) -> Option<SopRecord> {
    let Some(agent_code) = SOP_FIELDS.resolve(row, "agent_code") else {
        debug!("Skipping SOP row without an agent code");
        return None;
    };
    Some(SopRecord {
        agent_code,
        upload_date,
        data: row.clone(),
    })
}

/// Snapshot date of an SOP file: explicit value, else the cut-off column of
/// the first row (or its first cell), else `today`.
pub fn sop_upload_date(rows: &[SheetRow], explicit: Option<NaiveDate>, today: NaiveDate) -> NaiveDate {
    if let Some(date) = explicit {
        return date;
    }
    rows.first()
        .and_then(|first| {
            SOP_FIELDS
                .resolve(first, "upload_date")
                .or_else(|| first.first_value().map(str::to_string))
        })
        .as_deref()
        .and_then(parse_sheet_date)
        .unwrap_or(today)
}

// --- Header sniffing ---

#[derive(Debug, Clone, Copy)]
pub enum HeaderMarker {
    /// A cell equal to one of the markers.
    Exact(&'static [&'static str]),
    /// A cell containing one of the markers.
    Contains(&'static [&'static str]),
}

pub const CONTRACT_HEADER_MARKER: HeaderMarker = HeaderMarker::Exact(&["số hđ", "policy number", "msdl"]);
pub const SOP_HEADER_MARKER: HeaderMarker = HeaderMarker::Contains(&["msdl", "agent code", "mã đl"]);

const HEADER_SCAN_ROWS: usize = 20;

impl HeaderMarker {
    fn matches(&self, cell: &str) -> bool {
        let cell = normalize_header(cell);
        match self {
            HeaderMarker::Exact(markers) => markers.iter().any(|m| cell == *m),
            HeaderMarker::Contains(markers) => markers.iter().any(|m| cell.contains(m)),
        }
    }
}

/// Index of the header row among the first rows; row 0 when none matches.
pub fn find_header_row(rows: &[Vec<String>], marker: HeaderMarker) -> usize {
    rows.iter()
        .take(HEADER_SCAN_ROWS)
        .position(|row| row.iter().any(|cell| marker.matches(cell)))
        .unwrap_or(0)
}

/// Drops earlier duplicates. A kept item stays at the position of the first
/// occurrence of its key but carries the last value. Returns the number of
/// dropped items.
pub fn dedupe_keep_last<T, K, F>(items: Vec<T>, key: F) -> (Vec<T>, usize)
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let total = items.len();
    let mut slots: HashMap<K, usize> = HashMap::new();
    let mut kept: Vec<T> = Vec::with_capacity(total);

    for item in items {
        match slots.get(&key(&item)) {
            Some(&slot) => kept[slot] = item,
            None => {
                slots.insert(key(&item), kept.len());
                kept.push(item);
            }
        }
    }
    let dropped = total - kept.len();
    (kept, dropped)
}
