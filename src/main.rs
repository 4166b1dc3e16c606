//! SQL Server schema import tool
//!
//! Replays a captured schema export tree against a target database:
//! stage-ordered execution with dependency retries, encryption secret
//! resolution, and a machine-readable error artifact for failed runs.

// schemarestore/src/main.rs
mod config;
mod engine;
mod errors;
mod import;
mod plan;
mod secrets;
mod utils;

use anyhow::Context;
use config::AppConfig;
use errors::{AppError, Result};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(true) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            eprintln!("❌ Operation finished with failures.");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<bool> {
    // Expects config.json next to the executable, or in the project root
    // when running with `cargo run`.
    let config_path = PathBuf::from("config.json");
    let app_config = AppConfig::load_from_json(&config_path).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            config_path.display()
        )
    })?;

    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        prompt_choice()?
    };

    match choice.as_str() {
        "1" | "import" => {
            let ok = import::run_import_flow(&app_config)
                .await
                .context("Import process failed")?;
            Ok(ok)
        }
        "2" | "secrets" => {
            let emit_json = args
                .iter()
                .skip(2)
                .any(|arg| arg == "json" || arg == "--json");
            secrets::run_secrets_flow(&app_config, emit_json)?;
            Ok(true)
        }
        "3" | "plan" => plan::run_plan_flow(&app_config),
        other => {
            println!("❌ Invalid choice. Please enter '1' (import), '2' (secrets), or '3' (plan).");
            Err(AppError::Config(format!("Unknown operation '{}'", other)))
        }
    }
}

/// Prompts for the operation when none was given on the command line.
fn prompt_choice() -> Result<String> {
    use std::io::{stdin, stdout, Write};

    println!("Select an operation:");
    println!("1. Import schema export (or type 'import')");
    println!("2. Report encryption secret requirements (or type 'secrets')");
    println!("3. Show the execution plan without connecting (or type 'plan')");
    print!("Enter your choice: ");
    stdout().flush()?;

    let mut input = String::new();
    stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
