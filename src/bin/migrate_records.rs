use std::env;
use std::path::PathBuf;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use decision_core_rs::audit::migrate::migrate_file;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("usage: migrate_records <legacy.jsonl> <out_dir>");
        std::process::exit(2);
    }
    let input = PathBuf::from(&args[1]);
    let out_dir = PathBuf::from(&args[2]);

    info!(input = %input.display(), out_dir = %out_dir.display(), "🔧 migrating legacy decision records");
    match migrate_file(&input, &out_dir) {
        Ok(summary) => {
            info!(
                migrated = summary.migrated,
                passed_through = summary.passed_through,
                "✅ migration complete"
            );
        }
        Err(e) => {
            // Fail closed: the first unmappable record aborts the run and
            // nothing is partially committed as authoritative.
            error!(code = e.code(), "❌ migration aborted: {}", e);
            std::process::exit(1);
        }
    }
}
