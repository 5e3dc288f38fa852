use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use decision_core_rs::audit::DecisionLog;
use decision_core_rs::config::Settings;
use decision_core_rs::replay::{ReplayEngine, ReplayMode, ReplayReport, ReplayStatus, RiskMode};
use decision_core_rs::snapshot::SnapshotStore;

fn usage() -> ! {
    eprintln!(
        "usage: replay_cli [data_dir] [--mode non-strict|strict-core|strict-full] \
         [--risk fact|computed] [--out report.json]"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    let args: Vec<String> = env::args().collect();
    // Positional data_dir wins; otherwise the layered config decides.
    let data_dir = match args.get(1).filter(|a| !a.starts_with("--")) {
        Some(dir) => PathBuf::from(dir),
        None => Settings::new()?.store.data_dir,
    };
    let mut mode = ReplayMode::StrictCore;
    let mut risk_mode = RiskMode::Computed;
    let mut out_path: Option<PathBuf> = None;

    let mut i = if args.get(1).map(|a| a.starts_with("--")).unwrap_or(true) {
        1
    } else {
        2
    };
    while i < args.len() {
        match args[i].as_str() {
            "--mode" => {
                i += 1;
                mode = match args.get(i).map(String::as_str) {
                    Some("non-strict") => ReplayMode::NonStrict,
                    Some("strict-core") => ReplayMode::StrictCore,
                    Some("strict-full") => ReplayMode::StrictFull,
                    _ => usage(),
                };
            }
            "--risk" => {
                i += 1;
                risk_mode = match args.get(i).map(String::as_str) {
                    Some("fact") => RiskMode::Fact,
                    Some("computed") => RiskMode::Computed,
                    _ => usage(),
                };
            }
            "--out" => {
                i += 1;
                out_path = Some(PathBuf::from(args.get(i).map(String::as_str).unwrap_or_else(|| usage())));
            }
            _ => usage(),
        }
        i += 1;
    }

    info!(data_dir = %data_dir.display(), ?mode, ?risk_mode, "🔧 replaying decision log");

    let log = DecisionLog::open(data_dir.join("decision_records.jsonl"))?;
    let snapshots = Arc::new(SnapshotStore::new(data_dir.join("snapshots"))?);
    let records = log.read_all()?;
    info!(records = records.len(), "📖 decision log loaded and verified");

    // Records are independent; fan them out across blocking workers and
    // stitch the reports back into append order.
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(records.len().max(1));
    let chunk_size = records.len().div_ceil(workers);
    let mut handles = Vec::new();
    for (chunk_idx, chunk) in records.chunks(chunk_size.max(1)).enumerate() {
        let chunk: Vec<_> = chunk.to_vec();
        let snapshots = snapshots.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let engine = ReplayEngine::new(&snapshots, mode, risk_mode);
            let reports: Vec<ReplayReport> =
                chunk.iter().map(|r| engine.replay_record(r)).collect();
            (chunk_idx, reports)
        }));
    }

    let mut chunks: Vec<(usize, Vec<ReplayReport>)> = Vec::new();
    for handle in handles {
        chunks.push(handle.await?);
    }
    chunks.sort_by_key(|(idx, _)| *idx);
    let reports: Vec<ReplayReport> = chunks.into_iter().flat_map(|(_, r)| r).collect();

    let ok = reports
        .iter()
        .filter(|r| r.status == ReplayStatus::ReplayOk)
        .count();
    let mismatched = reports
        .iter()
        .filter(|r| r.status == ReplayStatus::ReplayMismatch)
        .count();
    let errored = reports
        .iter()
        .filter(|r| r.status == ReplayStatus::ReplayError)
        .count();

    let report_json = serde_json::to_string_pretty(&reports)?;
    if let Some(path) = out_path {
        let mut file = File::create(&path)?;
        file.write_all(report_json.as_bytes())?;
        info!(path = %path.display(), "📊 report written");
    } else {
        println!("{}", report_json);
    }

    info!(total = reports.len(), ok, mismatched, errored, "replay finished");
    if errored > 0 {
        error!("❌ {} record(s) could not be replayed", errored);
        std::process::exit(2);
    }
    if mismatched > 0 {
        error!("❌ {} record(s) diverged", mismatched);
        std::process::exit(1);
    }
    info!("✅ all records replayed clean");
    Ok(())
}
