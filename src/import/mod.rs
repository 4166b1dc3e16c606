// schemarestore/src/import/mod.rs
pub mod executor;
pub mod report;

use anyhow::Result;

use crate::config::{load_import_config_from_json, AppConfig};
use crate::engine::mssql::MssqlEngine;
use crate::engine::policy::RetryPolicy;
use crate::plan::build_execution_plan;
use crate::secrets::binding::bind_secrets;
use crate::secrets::{print_requirement_report, resolve_requirements};

use executor::{execute_plan, ExecutorOptions};
use report::persist_error_log;

/// The `import` operation end to end: plan the export tree, resolve and bind
/// encryption secrets, run every script to a terminal state, persist the
/// error artifact when anything failed. Returns whether the run succeeded.
pub async fn run_import_flow(app_config: &AppConfig) -> Result<bool> {
    let config = load_import_config_from_json(&app_config.raw_json_config)?;
    println!("🚀 Starting schema import");
    println!("   Export root: {}", config.export_root.display());

    let execution_plan = build_execution_plan(&config.export_root, &config.exclude_stages)?;
    let stage_ranges = execution_plan.stage_ranges();
    println!(
        "📋 Execution plan: {} script(s) across {} stage(s)",
        execution_plan.len(),
        stage_ranges.len()
    );
    for (stage, range) in &stage_ranges {
        println!("   {}: {} script(s)", stage, range.len());
    }
    if !execution_plan.excluded.is_empty() {
        println!(
            "ℹ️ {} script(s) excluded by configuration.",
            execution_plan.excluded.len()
        );
    }

    let resolved = resolve_requirements(&execution_plan, &config.export_root)?;
    let bindings = bind_secrets(&resolved.catalog, &config.secrets);
    print_requirement_report(&resolved.catalog, &bindings);

    let policy = RetryPolicy::from_config(config.retryable_error_numbers.as_deref());
    let options = ExecutorOptions {
        max_retry_passes: config.max_retry_passes,
        script_timeout: config.script_timeout,
        fail_fast: config.fail_fast,
    };

    let mut engine = MssqlEngine::connect(&config.target_db_url).await?;
    let mut run_report = execute_plan(
        &mut engine,
        &execution_plan,
        &resolved,
        &bindings,
        &policy,
        &options,
    )
    .await;

    // The artifact only exists when there is something to diagnose.
    if !run_report.errors.is_empty() {
        let path = persist_error_log(&run_report.errors, &config.error_log_dir)?;
        run_report.error_log_path = Some(path);
    }
    run_report.print_summary();

    if run_report.overall_success() {
        println!(
            "✅ Import completed: {} script(s) applied.",
            run_report.succeeded
        );
    } else {
        eprintln!(
            "❌ Import completed with {} failed and {} skipped script(s).",
            run_report.failed, run_report.skipped
        );
    }
    Ok(run_report.overall_success())
}
