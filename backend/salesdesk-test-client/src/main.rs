// src/main.rs

use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::{json, Value};
use std::error::Error;

// Response types
#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    counts: Counts,
}

#[derive(Debug, Deserialize)]
struct Counts {
    agents: usize,
    contracts: usize,
    sop_records: usize,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

const SAMPLE_AGENTS: &str = "MS,Họ tên,Cấp bậc,Mã QL,Mã tổ\n\
SMOKE-UM,Nguyễn Văn An,UM,,SMOKE\n\
SMOKE-FA,Trần Thị Bình,FA,SMOKE-UM,SMOKE\n";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let base_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:3000".to_string());
    let client = Client::new();

    // Test 1: Status
    println!("\n🔍 Testing status endpoint...");
    let status = client
        .get(format!("{}/status", base_url))
        .send()
        .await?
        .json::<StatusResponse>()
        .await?;
    println!(
        "Status: {} ({} agents, {} contracts, {} SOP rows)",
        status.status, status.counts.agents, status.counts.contracts, status.counts.sop_records
    );

    // Test 2: Agent import (update mode keeps existing data)
    println!("\n🔍 Importing sample agents...");
    let import = client
        .post(format!("{}/api/import/agents?mode=update", base_url))
        .header(header::CONTENT_TYPE, "text/csv")
        .body(SAMPLE_AGENTS)
        .send()
        .await?
        .json::<Envelope>()
        .await?;
    println!("Import response: success={} data={}", import.success, import.data);

    // Test 3: Monthly reports
    for path in ["/api/reports/manager", "/api/reports/team", "/api/dashboard/overview"] {
        println!("\n🔍 Testing {}...", path);
        let response = client.get(format!("{}{}", base_url, path)).send().await?;
        let code = response.status();
        let body = response.json::<Envelope>().await?;
        match body.error {
            Some(error) => println!("{} failed ({}): {}", path, code, error),
            None => println!(
                "{} ok ({}), {} top-level entries",
                path,
                code,
                body.data.as_array().map_or(1, Vec::len)
            ),
        }
    }

    // Test 4: Validation errors come back as JSON
    println!("\n🔍 Testing targets without month or year...");
    let response = client.get(format!("{}/api/targets", base_url)).send().await?;
    println!("Expected 400, got {}: {}", response.status(), response.text().await?);

    // Test 5: Report snapshot round trip
    println!("\n🔍 Saving a pending report snapshot...");
    let saved = client
        .post(format!("{}/api/reports/pending-handover", base_url))
        .json(&json!({ "type": "smoke", "content": { "checked": true } }))
        .send()
        .await?
        .json::<Envelope>()
        .await?;
    println!("Snapshot saved: {}", saved.success);

    let latest = client
        .get(format!("{}/api/reports/pending-handover?type=smoke", base_url))
        .send()
        .await?
        .json::<Envelope>()
        .await?;
    println!("Latest snapshot content: {}", latest.data["content"]);

    // Cleanup
    for code in ["SMOKE-FA", "SMOKE-UM"] {
        let response = client
            .delete(format!("{}/api/agents/{}", base_url, code))
            .send()
            .await?;
        println!("Deleted {}: {}", code, response.status());
    }

    println!("\n✅ Smoke run finished");
    Ok(())
}
