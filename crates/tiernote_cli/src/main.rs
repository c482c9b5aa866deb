//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `tiernote_core` linkage and
//!   configuration loading.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `tiernote_cli [config.json] [user_id tier]`. The config path may
//! also come from `TIERNOTE_CONFIG`.

use std::process::ExitCode;
use std::sync::Arc;
use tiernote_core::{CoreConfig, QuotaGuard, SqliteCounterStore, WorkspaceService};

fn main() -> ExitCode {
    println!("tiernote_core ping={}", tiernote_core::ping());
    println!("tiernote_core version={}", tiernote_core::core_version());

    match run(std::env::args().skip(1).collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Vec<String>) -> Result<(), String> {
    let config_path = args
        .first()
        .cloned()
        .or_else(|| std::env::var("TIERNOTE_CONFIG").ok())
        .filter(|path| !path.trim().is_empty());
    let config = match config_path {
        Some(path) => CoreConfig::load(path.trim()).map_err(|err| err.to_string())?,
        None => CoreConfig::default(),
    };
    tiernote_core::init_logging_from_config(&config.logging)?;

    let policy = config.tier_policy().map_err(|err| err.to_string())?;
    println!("most_restrictive_tier={}", policy.most_restrictive().name);
    for tier in policy.tiers() {
        let features: Vec<&str> = tier.features.iter().map(String::as_str).collect();
        println!(
            "tier={} max_modules={} max_notes_per_module={} max_tags={} max_storage_bytes={} features={}",
            tier.name,
            tier.max_modules,
            tier.max_notes_per_module,
            tier.max_tags,
            tier.max_storage_bytes,
            features.join(",")
        );
    }

    let (Some(user_id), Some(tier)) = (args.get(1), args.get(2)) else {
        return Ok(());
    };
    let store = match &config.database_path {
        Some(path) => SqliteCounterStore::open(path, config.retry.clone()),
        None => SqliteCounterStore::open_in_memory(config.retry.clone()),
    }
    .map_err(|err| err.to_string())?;
    let service = WorkspaceService::new(
        &store,
        QuotaGuard::new(Arc::new(policy), config.quota),
        config.ordering,
    );
    let user = service
        .provision_user(user_id, tier)
        .map_err(|err| err.to_string())?;
    let status = service
        .quota()
        .check_module_creation(&user.user_id)
        .map_err(|err| err.to_string())?;
    println!(
        "user={} tier={} modules={} notes={} tags={} storage_used_bytes={} can_create_module={} module_limit={}",
        user.user_id,
        user.tier,
        user.module_count,
        user.note_count,
        user.tag_count,
        user.storage_used_bytes,
        status.allowed,
        status.limit
    );
    Ok(())
}
