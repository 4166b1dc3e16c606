// schemarestore/src/secrets/mod.rs
pub mod binding;
pub mod catalog;
pub(crate) mod metadata;
pub(crate) mod rules;
pub(crate) mod strip;

use anyhow::Result;
use std::path::Path;

use crate::config::AppConfig;
use crate::plan::stages::Stage;
use crate::plan::{self, ExecutionPlan};

use binding::SecretBindings;
use catalog::{RequirementCatalog, RequirementKey, RequirementSource};

/// Stages whose scripts are scanned for encryption requirements.
/// `Programmability` is included so single-file and non-standard exports
/// are still covered.
const SCAN_STAGES: [Stage; 4] = [
    Stage::SecurityPrincipals,
    Stage::Tables,
    Stage::EncryptionObjects,
    Stage::Programmability,
];

/// Resolver output: the merged catalog plus, per plan script (by index),
/// the requirement keys whose rules matched that script.
#[derive(Debug, Default)]
pub struct ResolvedRequirements {
    pub catalog: RequirementCatalog,
    pub script_tags: Vec<Vec<RequirementKey>>,
}

/// Scans the plan's in-scope scripts and merges the export manifest's
/// declared requirements into one catalog.
pub fn resolve_requirements(
    execution_plan: &ExecutionPlan,
    export_root: &Path,
) -> Result<ResolvedRequirements> {
    let rules = rules::RuleSet::standard()?;
    let mut catalog = RequirementCatalog::default();
    let mut script_tags: Vec<Vec<RequirementKey>> = vec![Vec::new(); execution_plan.len()];

    for (index, script) in execution_plan.scripts().iter().enumerate() {
        if !SCAN_STAGES.contains(&script.stage) {
            continue;
        }
        let stripped = strip::strip_sql_comments(&script.sql);
        let mut tags = Vec::new();
        for requirement in rules.scan(&stripped) {
            let key = requirement.key();
            if !tags.contains(&key) {
                tags.push(key);
            }
            catalog.insert(requirement);
        }
        script_tags[index] = tags;
    }

    // Merged after scanning so Declared entries replace Inferred duplicates.
    // Declared-only requirements tag no scripts; the rules above are the
    // only thing that locates placeholders.
    for declared in metadata::load_declared_requirements(export_root) {
        catalog.insert(declared);
    }

    Ok(ResolvedRequirements {
        catalog,
        script_tags,
    })
}

/// Public entry point for the discovery-only report. Never fails once the
/// configuration is readable: an unusable export tree reports an empty
/// catalog with a warning.
pub fn run_secrets_flow(app_config: &AppConfig, emit_json: bool) -> Result<()> {
    let config = crate::config::load_discovery_config_from_json(&app_config.raw_json_config)?;

    println!(
        "🔐 Discovering encryption requirements under {}",
        config.export_root.display()
    );

    let resolved = match plan::build_execution_plan(&config.export_root, &config.exclude_stages) {
        Ok(execution_plan) => resolve_requirements(&execution_plan, &config.export_root)?,
        Err(e) => {
            println!("⚠️ Could not scan export tree: {}. Reporting an empty catalog.", e);
            ResolvedRequirements::default()
        }
    };

    let bindings = binding::bind_secrets(&resolved.catalog, &config.secrets);
    print_requirement_report(&resolved.catalog, &bindings);

    if emit_json {
        let doc = requirement_report_json(&config.export_root, &resolved.catalog, &bindings);
        println!("{}", serde_json::to_string_pretty(&doc)?);
    }
    Ok(())
}

pub(crate) fn print_requirement_report(catalog: &RequirementCatalog, bindings: &SecretBindings) {
    if catalog.is_empty() {
        println!("✓ No encryption requirements found.");
        return;
    }

    println!("Found {} encryption requirement(s):", catalog.len());
    let mut bound = 0usize;
    let mut missing = 0usize;
    let mut informational = 0usize;
    for requirement in catalog.iter() {
        let key = requirement.key();
        let source = describe_source(requirement.source, requirement.inference_reason.as_deref());
        if bindings.value_for(&key).is_some() {
            bound += 1;
            println!("  ✅ {} (secret configured; {})", requirement.describe(), source);
        } else if bindings.unresolved.contains(&key) {
            missing += 1;
            println!("  ❌ {} (no secret configured; {})", requirement.describe(), source);
        } else {
            informational += 1;
            println!("  ℹ️ {} (informational, no secret needed; {})", requirement.describe(), source);
        }
    }
    println!(
        "✓ {} bound, {} missing, {} informational.",
        bound, missing, informational
    );
}

fn describe_source(source: RequirementSource, reason: Option<&str>) -> String {
    match source {
        RequirementSource::Declared => "declared by export metadata".to_string(),
        RequirementSource::Inferred => match reason {
            Some(reason) => format!("inferred: {}", reason),
            None => "inferred from script text".to_string(),
        },
    }
}

fn requirement_report_json(
    export_root: &Path,
    catalog: &RequirementCatalog,
    bindings: &SecretBindings,
) -> serde_json::Value {
    let requirements: Vec<serde_json::Value> = catalog
        .iter()
        .map(|requirement| {
            let key = requirement.key();
            let binding_state = if bindings.value_for(&key).is_some() {
                "bound"
            } else if bindings.unresolved.contains(&key) {
                "missing"
            } else {
                "informational"
            };
            serde_json::json!({
                "kind": requirement.kind.display_name(),
                "name": requirement.name,
                "source": match requirement.source {
                    RequirementSource::Declared => "declared",
                    RequirementSource::Inferred => "inferred",
                },
                "reason": requirement.inference_reason,
                "binding": binding_state,
            })
        })
        .collect();

    serde_json::json!({
        "export_root": export_root.display().to_string(),
        "requirements": requirements,
    })
}
