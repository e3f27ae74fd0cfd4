// src/server.rs
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{Datelike, Local, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::contracts::{list_contracts, ContractFilter};
use crate::dashboard::{overview, DashboardDefaults};
use crate::domain::{Agent, GlobalTarget, ProMetadata, TargetBook, TeamAllocation};
use crate::export::{contracts_csv, contracts_file_name, sop_csv, sop_file_name, ExportError};
use crate::hierarchy::{build_org_tree, normalize_code, ManagerOverrides};
use crate::import::{import_agents, import_contracts, import_sop, ImportError, ImportMode};
use crate::incentives::{mdrt_progress, mdrt_schedule, pro_bonus, sop_group_counts};
use crate::loader::{LoaderError, Sheet};
use crate::period::{PeriodError, ReportMonth};
use crate::reports::{compare_names, manager_summary, team_detail, ManagerSummaryRow};
use crate::store::{PageRequest, SopFilter, Store, StoreError};

/// Display name of the synthetic node above the organization tree.
pub const ORG_ROOT_NAME: &str = "Giám đốc Kinh doanh";

const DEFAULT_SOP_PAGE_SIZE: usize = 50;
const NO_SOP_DATA: &str = "Chưa có dữ liệu SOP";

// --- Errors ---

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Import failed: {0}")]
    Import(#[from] ImportError),

    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    #[error(transparent)]
    Period(#[from] PeriodError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Period(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Store(StoreError::NotFound { .. }) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Store(StoreError::Conflict { .. }) => (StatusCode::CONFLICT, self.to_string()),
            AppError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error (storage). Check logs.".to_string(),
            ),
            AppError::Import(ImportError::Empty) => (StatusCode::BAD_REQUEST, "No data found".to_string()),
            AppError::Import(ImportError::Loader(e)) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Import(ImportError::Store(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Import could not be saved. Check logs.".to_string(),
            ),
            AppError::Export(ExportError::Empty) => (StatusCode::NOT_FOUND, "No data to export".to_string()),
            AppError::Export(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error (export). Check logs.".to_string(),
            ),
        };

        if status_code.is_server_error() {
            error!("Error occurred: {:?}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        (status_code, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { success: true, data })
}

// --- State & routing ---

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub overrides: Arc<ManagerOverrides>,
    pub dashboard_defaults: DashboardDefaults,
}

pub fn router(state: AppState) -> Router {
    let report_routes = Router::new()
        .route("/manager", get(handle_manager_report))
        .route("/team", get(handle_team_report))
        .route(
            "/pending-handover",
            get(handle_get_snapshot).post(handle_post_snapshot),
        );

    let import_routes = Router::new()
        .route("/agents", post(handle_import_agents))
        .route("/contracts", post(handle_import_contracts))
        .route("/sop", post(handle_import_sop));

    let export_routes = Router::new()
        .route("/contracts", get(handle_export_contracts))
        .route("/sop", get(handle_export_sop));

    let api_routes = Router::new()
        .nest("/reports", report_routes)
        .nest("/import", import_routes)
        .nest("/export", export_routes)
        .route("/team-structure", get(handle_team_structure))
        .route(
            "/agents",
            get(handle_list_agents)
                .post(handle_create_agent)
                .delete(handle_delete_all_agents),
        )
        .route(
            "/agents/{code}",
            put(handle_update_agent).delete(handle_delete_agent),
        )
        .route("/contracts", get(handle_list_contracts))
        .route("/targets", get(handle_get_targets).post(handle_post_target))
        .route("/targets/allocations", post(handle_post_allocations))
        .route("/dashboard/overview", get(handle_dashboard))
        .route("/mdrt/progress", get(handle_mdrt_progress))
        .route("/mdrt/agents", get(handle_mdrt_agents))
        .route(
            "/manulife-pro/bonus",
            get(handle_pro_bonus).post(handle_post_pro_metadata),
        )
        .route("/sop", get(handle_list_sop))
        .route("/sop/groups", get(handle_sop_groups));

    Router::new()
        .nest("/api", api_routes)
        .route("/status", get(handle_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Shared helpers ---

#[derive(Debug, Default, Deserialize)]
struct MonthQuery {
    month: Option<String>,
}

impl MonthQuery {
    fn month_or_current(&self) -> Result<ReportMonth, AppError> {
        match self.month.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            Some(raw) => Ok(ReportMonth::parse(raw)?),
            None => Ok(ReportMonth::current()),
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

async fn load_manager_summary(state: &AppState, month: &ReportMonth) -> Result<Vec<ManagerSummaryRow>, AppError> {
    let agents = state.store.list_agents().await?;
    let contracts = state.store.contracts_touching(month).await?;
    let targets = TargetBook::from_allocations(&state.store.allocations_for_month(month).await?);
    Ok(manager_summary(month, &agents, &contracts, &targets, &state.overrides))
}

fn csv_download(bytes: Vec<u8>, file_name: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    )
        .into_response()
}

// --- Status ---

async fn handle_status(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    info!("Handling /status request...");
    let counts = state.store.counts().await?;
    Ok(Json(json!({
        "success": true,
        "status": "ok",
        "serverTime": Local::now().to_rfc3339(),
        "counts": counts,
    })))
}

// --- Reports ---

async fn handle_manager_report(
    State(state): State<AppState>,
    Query(query): Query<MonthQuery>,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling /api/reports/manager request...");
    let month = query.month_or_current()?;
    Ok(ok(load_manager_summary(&state, &month).await?))
}

async fn handle_team_report(
    State(state): State<AppState>,
    Query(query): Query<MonthQuery>,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling /api/reports/team request...");
    let month = query.month_or_current()?;
    let agents = state.store.list_agents().await?;
    let contracts = state.store.contracts_touching(&month).await?;
    Ok(ok(team_detail(&month, &agents, &contracts, &state.overrides)))
}

async fn handle_team_structure(
    State(state): State<AppState>,
    Query(query): Query<MonthQuery>,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling /api/team-structure request...");
    let month = query.month_or_current()?;
    let rows = load_manager_summary(&state, &month).await?;

    let mut direct_counts: HashMap<String, u32> = HashMap::new();
    for row in &rows {
        direct_counts.insert(normalize_code(&row.manager_code), row.stats.total_agents);
        direct_counts.insert(normalize_code(&row.group_code), row.stats.total_agents);
    }

    let agents = state.store.list_agents().await?;
    Ok(ok(build_org_tree(&agents, &direct_counts, Some(ORG_ROOT_NAME))))
}

#[derive(Debug, Deserialize)]
struct SnapshotQuery {
    #[serde(alias = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnapshotBody {
    #[serde(alias = "type", default)]
    kind: String,
    #[serde(default)]
    content: Value,
    report_date: Option<NaiveDate>,
}

async fn handle_get_snapshot(
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling GET /api/reports/pending-handover request...");
    let kind = query
        .kind
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing type parameter".to_string()))?;
    Ok(ok(state.store.latest_report_snapshot(kind.trim()).await?))
}

async fn handle_post_snapshot(
    State(state): State<AppState>,
    Json(body): Json<SnapshotBody>,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling POST /api/reports/pending-handover request...");
    if body.kind.trim().is_empty() || body.content.is_null() {
        return Err(AppError::BadRequest("Missing required fields".to_string()));
    }
    let snapshot = state
        .store
        .insert_report_snapshot(body.kind.trim(), body.content, body.report_date)
        .await?;
    Ok(ok(snapshot))
}

// --- Agents ---

async fn handle_list_agents(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    info!("Handling GET /api/agents request...");
    let mut agents = state.store.list_agents().await?;
    agents.sort_by(|a, b| compare_names(&a.full_name, &b.full_name));
    Ok(ok(agents))
}

fn require_agent_code(agent: &Agent) -> Result<(), AppError> {
    if agent.agent_code.trim().is_empty() {
        return Err(AppError::BadRequest("Missing agent_code".to_string()));
    }
    Ok(())
}

async fn handle_create_agent(
    State(state): State<AppState>,
    Json(agent): Json<Agent>,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling POST /api/agents request...");
    require_agent_code(&agent)?;
    let created = state.store.insert_agent(agent).await?;
    Ok((StatusCode::CREATED, ok(created)))
}

#[derive(Debug, Deserialize)]
struct DeleteAllQuery {
    all: Option<bool>,
}

async fn handle_delete_all_agents(
    State(state): State<AppState>,
    Query(query): Query<DeleteAllQuery>,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling DELETE /api/agents request...");
    if query.all != Some(true) {
        return Err(AppError::BadRequest("Missing 'all' parameter".to_string()));
    }
    let removed = state.store.delete_all_agents().await?;
    warn!("Deleted all {} agents", removed);
    Ok(ok(json!({ "deleted": removed })))
}

async fn handle_update_agent(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(agent): Json<Agent>,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling PUT /api/agents/{} request...", code);
    Ok(ok(state.store.update_agent(&code, agent).await?))
}

async fn handle_delete_agent(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling DELETE /api/agents/{} request...", code);
    state.store.delete_agent(&code).await?;
    Ok(ok(json!({ "deleted": code })))
}

// --- Contracts ---

#[derive(Debug, Deserialize)]
struct ContractQuery {
    month: Option<String>,
    #[serde(default)]
    filter: Option<ContractFilter>,
}

async fn handle_list_contracts(
    State(state): State<AppState>,
    Query(query): Query<ContractQuery>,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling /api/contracts request...");
    let month = query
        .month
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(ReportMonth::parse)
        .transpose()?;
    let contracts = state.store.list_contracts().await?;
    let agents = state.store.list_agents().await?;
    Ok(ok(list_contracts(
        contracts,
        &agents,
        month.as_ref(),
        query.filter.unwrap_or_default(),
    )))
}

// --- Import ---

#[derive(Debug, Deserialize)]
struct ImportQuery {
    mode: Option<ImportMode>,
    upload_date: Option<NaiveDate>,
}

fn parse_upload(body: &Bytes) -> Result<Sheet, AppError> {
    Sheet::from_csv_bytes(body).map_err(|e: LoaderError| AppError::Import(e.into()))
}

async fn handle_import_agents(
    State(state): State<AppState>,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling /api/import/agents request ({} bytes)...", body.len());
    let sheet = parse_upload(&body)?;
    let summary = import_agents(state.store.as_ref(), &sheet, query.mode.unwrap_or_default()).await?;
    Ok(ok(summary))
}

async fn handle_import_contracts(
    State(state): State<AppState>,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling /api/import/contracts request ({} bytes)...", body.len());
    let sheet = parse_upload(&body)?;
    let summary = import_contracts(state.store.as_ref(), &sheet, query.mode.unwrap_or_default()).await?;
    Ok(ok(summary))
}

async fn handle_import_sop(
    State(state): State<AppState>,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling /api/import/sop request ({} bytes)...", body.len());
    let sheet = parse_upload(&body)?;
    let summary = import_sop(
        state.store.as_ref(),
        &sheet,
        query.mode.unwrap_or_default(),
        query.upload_date,
        today(),
    )
    .await?;
    Ok(ok(summary))
}

// --- Export ---

async fn handle_export_contracts(
    State(state): State<AppState>,
    Query(query): Query<MonthQuery>,
) -> Result<Response, AppError> {
    info!("Handling /api/export/contracts request...");
    let month = match query.month.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(raw) => Some(ReportMonth::parse(raw)?),
    };
    let contracts = state.store.list_contracts().await?;
    let agents = state.store.list_agents().await?;
    let bytes = contracts_csv(&contracts, &agents, month.as_ref())?;
    Ok(csv_download(bytes, &contracts_file_name(month.as_ref())))
}

#[derive(Debug, Deserialize)]
struct SopExportQuery {
    #[serde(alias = "uploadDate")]
    upload_date: Option<NaiveDate>,
}

async fn handle_export_sop(
    State(state): State<AppState>,
    Query(query): Query<SopExportQuery>,
) -> Result<Response, AppError> {
    info!("Handling /api/export/sop request...");
    let upload_date = match query.upload_date {
        Some(date) => Some(date),
        None => state.store.latest_sop_date().await?,
    };
    let filter = SopFilter {
        agent_code: None,
        upload_date,
    };
    let page = state.store.sop_records(&filter, PageRequest::unbounded()).await?;
    let bytes = sop_csv(&page.items)?;
    Ok(csv_download(bytes, &sop_file_name(upload_date.unwrap_or_else(today))))
}

// --- Targets ---

#[derive(Debug, Deserialize)]
struct TargetQuery {
    month: Option<String>,
    year: Option<i32>,
}

async fn handle_get_targets(
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
) -> Result<Response, AppError> {
    info!("Handling GET /api/targets request...");
    if let Some(year) = query.year {
        let stored = state.store.global_targets_for_year(year).await?;
        let mut months = Vec::with_capacity(12);
        for m in 1..=12 {
            let key = ReportMonth::new(year, m)?.to_string();
            let target = stored
                .iter()
                .find(|t| t.month.trim() == key)
                .cloned()
                .unwrap_or_else(|| GlobalTarget::empty(key));
            months.push(target);
        }
        return Ok(ok(months).into_response());
    }

    let raw = query
        .month
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Month or Year is required".to_string()))?;
    let month = ReportMonth::parse(&raw)?;
    let global = state
        .store
        .global_target(&month)
        .await?
        .unwrap_or_else(|| GlobalTarget::empty(month.to_string()));
    let allocations = state.store.allocations_for_month(&month).await?;
    Ok(ok(json!({ "global": global, "allocations": allocations })).into_response())
}

async fn handle_post_target(
    State(state): State<AppState>,
    Json(mut target): Json<GlobalTarget>,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling POST /api/targets request...");
    if target.month.trim().is_empty() {
        return Err(AppError::BadRequest("Month is required".to_string()));
    }
    target.month = ReportMonth::parse(&target.month)?.to_string();
    Ok(ok(state.store.upsert_global_target(target).await?))
}

#[derive(Debug, Deserialize)]
struct AllocationInput {
    manager_code: String,
    #[serde(default)]
    fyp_target: Decimal,
    #[serde(default)]
    active_target: u32,
}

#[derive(Debug, Deserialize)]
struct AllocationBody {
    #[serde(default)]
    month: String,
    allocations: Vec<AllocationInput>,
}

async fn handle_post_allocations(
    State(state): State<AppState>,
    Json(body): Json<AllocationBody>,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling POST /api/targets/allocations request...");
    if body.month.trim().is_empty() {
        return Err(AppError::BadRequest("Invalid data".to_string()));
    }
    let month = ReportMonth::parse(&body.month)?.to_string();
    let allocations: Vec<TeamAllocation> = body
        .allocations
        .into_iter()
        .filter(|a| !a.manager_code.trim().is_empty())
        .map(|a| TeamAllocation {
            month: month.clone(),
            manager_code: a.manager_code.trim().to_string(),
            fyp_target: a.fyp_target,
            active_target: a.active_target,
        })
        .collect();
    let saved = state.store.upsert_allocations(allocations.clone()).await?;
    info!("Saved {} allocations for {}", saved, month);
    Ok(ok(allocations))
}

// --- Dashboard ---

async fn handle_dashboard(
    State(state): State<AppState>,
    Query(query): Query<MonthQuery>,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling /api/dashboard/overview request...");
    let month = query.month_or_current()?;
    let contracts = state.store.contracts_touching(&month).await?;
    let agents = state.store.list_agents().await?;
    let target = state.store.global_target(&month).await?;
    Ok(ok(overview(
        &month,
        today(),
        &contracts,
        &agents,
        target.as_ref(),
        state.dashboard_defaults,
    )))
}

// --- Incentives ---

async fn handle_mdrt_progress() -> impl IntoResponse {
    info!("Handling /api/mdrt/progress request...");
    ok(mdrt_schedule(today().year()))
}

#[derive(Debug, Deserialize)]
struct MdrtQuery {
    month: Option<String>,
    limit: Option<usize>,
}

fn no_sop_data() -> Response {
    Json(json!({ "success": true, "data": [], "meta": { "message": NO_SOP_DATA } })).into_response()
}

async fn handle_mdrt_agents(
    State(state): State<AppState>,
    Query(query): Query<MdrtQuery>,
) -> Result<Response, AppError> {
    info!("Handling /api/mdrt/agents request...");
    let month = match query.month.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|m| (1..=12).contains(m))
            .ok_or_else(|| AppError::BadRequest(format!("Invalid month '{}', expected MM", raw)))?,
        None => today().month(),
    };

    let Some(sop_date) = state.store.latest_sop_date().await? else {
        return Ok(no_sop_data());
    };
    let filter = SopFilter {
        agent_code: None,
        upload_date: Some(sop_date),
    };
    let snapshot = state.store.sop_records(&filter, PageRequest::unbounded()).await?;
    let contracts = state.store.list_contracts().await?;
    let agents = state.store.list_agents().await?;

    let report = mdrt_progress(month, query.limit, sop_date, &snapshot.items, &contracts, &agents);
    Ok(Json(json!({ "success": true, "data": report.data, "meta": report.meta })).into_response())
}

async fn handle_pro_bonus(State(state): State<AppState>) -> Result<Response, AppError> {
    info!("Handling GET /api/manulife-pro/bonus request...");
    let Some(sop_date) = state.store.latest_sop_date().await? else {
        return Ok(no_sop_data());
    };
    let filter = SopFilter {
        agent_code: None,
        upload_date: Some(sop_date),
    };
    let snapshot = state.store.sop_records(&filter, PageRequest::unbounded()).await?;
    let contracts = state.store.list_contracts().await?;
    let metadata = state.store.pro_metadata().await?;

    let report = pro_bonus(sop_date, &snapshot.items, &contracts, &metadata);
    Ok(Json(json!({ "success": true, "data": report.data, "meta": report.meta })).into_response())
}

async fn handle_post_pro_metadata(
    State(state): State<AppState>,
    Json(metadata): Json<ProMetadata>,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling POST /api/manulife-pro/bonus request...");
    if metadata.agent_code.trim().is_empty() {
        return Err(AppError::BadRequest("Missing agent_code".to_string()));
    }
    Ok(ok(state.store.upsert_pro_metadata(metadata).await?))
}

// --- SOP ---

#[derive(Debug, Deserialize)]
struct SopQuery {
    agent_code: Option<String>,
    upload_date: Option<NaiveDate>,
    page: Option<usize>,
    #[serde(alias = "pageSize")]
    page_size: Option<usize>,
}

async fn handle_list_sop(
    State(state): State<AppState>,
    Query(query): Query<SopQuery>,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling /api/sop request...");
    let request = PageRequest::for_page(
        query.page_size.filter(|s| *s > 0).unwrap_or(DEFAULT_SOP_PAGE_SIZE),
        query.page.unwrap_or(1),
    );
    let filter = SopFilter {
        agent_code: query.agent_code,
        upload_date: query.upload_date,
    };
    let page = state.store.sop_records(&filter, request).await?;
    Ok(Json(json!({
        "success": true,
        "data": page.items,
        "total": page.total,
        "page": request.page_number(),
        "pageSize": request.limit,
        "totalPages": page.total_pages(),
    })))
}

#[derive(Debug, Deserialize)]
struct SopGroupQuery {
    #[serde(alias = "uploadDate")]
    upload_date: Option<NaiveDate>,
}

async fn handle_sop_groups(
    State(state): State<AppState>,
    Query(query): Query<SopGroupQuery>,
) -> Result<impl IntoResponse, AppError> {
    info!("Handling /api/sop/groups request...");
    let upload_date = match query.upload_date {
        Some(date) => Some(date),
        None => state.store.latest_sop_date().await?,
    };
    let records = match upload_date {
        Some(date) => {
            let filter = SopFilter {
                agent_code: None,
                upload_date: Some(date),
            };
            state.store.sop_records(&filter, PageRequest::unbounded()).await?.items
        }
        None => Vec::new(),
    };
    let counts = sop_group_counts(&records);
    Ok(Json(json!({
        "success": true,
        "groups": counts.groups,
        "saCount": counts.sa_count,
    })))
}
