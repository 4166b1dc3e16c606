// schemarestore/src/plan/mod.rs
pub mod stages;

use anyhow::Context;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{load_discovery_config_from_json, AppConfig};
use crate::errors::{AppError, Result};
use stages::Stage;

/// One discovered `.sql` file, immutable once discovery finishes.
#[derive(Debug, Clone)]
pub struct ExportedScript {
    /// Schema-qualified object name derived from the file stem
    /// (`dbo.Orders.sql` → `dbo.Orders`).
    pub object_name: String,
    pub path: PathBuf,
    pub stage: Stage,
    pub sql: String,
    /// Global discovery position, the intra-stage tie-break.
    pub discovery_index: usize,
}

/// A script dropped by `exclude_stages`. Reported, never silently ignored.
#[derive(Debug, Clone)]
pub struct ExcludedScript {
    pub object_name: String,
    pub path: PathBuf,
    pub stage: Stage,
}

#[derive(Debug)]
pub struct ExecutionPlan {
    /// Sorted by (stage, discovery_index).
    scripts: Vec<ExportedScript>,
    pub excluded: Vec<ExcludedScript>,
}

impl ExecutionPlan {
    pub fn scripts(&self) -> &[ExportedScript] {
        &self.scripts
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Contiguous index ranges of `scripts()`, one per populated stage, in
    /// stage order.
    pub fn stage_ranges(&self) -> Vec<(Stage, Range<usize>)> {
        let mut ranges = Vec::new();
        let mut start = 0usize;
        while start < self.scripts.len() {
            let stage = self.scripts[start].stage;
            let mut end = start + 1;
            while end < self.scripts.len() && self.scripts[end].stage == stage {
                end += 1;
            }
            ranges.push((stage, start..end));
            start = end;
        }
        ranges
    }
}

/// Walks the export tree and builds the ordered execution plan.
///
/// Immediate children of the root are object-type folders (`01_FileGroups`,
/// `05_Tables`, …), visited in name order; `.sql` files inside each folder
/// are collected recursively in name order. Loose `.sql` files at the root
/// itself are treated as `Programmability` so single-file exports still
/// import. Fails only when the root is missing or no scripts exist at all;
/// an unrecognized folder is classified, never rejected.
pub fn build_execution_plan(export_root: &Path, exclude_stages: &[Stage]) -> Result<ExecutionPlan> {
    if !export_root.is_dir() {
        return Err(AppError::Planning(format!(
            "Export root does not exist or is not a directory: {}",
            export_root.display()
        )));
    }

    let mut children: Vec<_> = fs::read_dir(export_root)
        .with_context(|| format!("Failed to read export root {}", export_root.display()))?
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("Failed to read export root {}", export_root.display()))?;
    children.sort_by_key(|entry| entry.file_name());

    let mut scripts = Vec::new();
    let mut excluded = Vec::new();
    let mut discovered_total = 0usize;

    for child in children {
        let path = child.path();
        if path.is_dir() {
            let folder_name = child.file_name().to_string_lossy().into_owned();
            let stage = Stage::classify_folder(&folder_name);
            collect_folder_scripts(
                &path,
                stage,
                exclude_stages,
                &mut scripts,
                &mut excluded,
                &mut discovered_total,
            )?;
        } else if is_sql_file(&path) {
            discovered_total += 1;
            push_script(
                &path,
                Stage::Programmability,
                exclude_stages,
                &mut scripts,
                &mut excluded,
            )?;
        }
    }

    if discovered_total == 0 {
        return Err(AppError::Planning(format!(
            "No .sql scripts found under export root {}",
            export_root.display()
        )));
    }

    // Discovery visited folders in name order; execution wants stage order.
    // The sort is stable via the explicit discovery_index tie-break.
    scripts.sort_by_key(|s| (s.stage, s.discovery_index));

    Ok(ExecutionPlan { scripts, excluded })
}

/// The `plan` operation: discover and classify without touching a server.
pub fn run_plan_flow(app_config: &AppConfig) -> Result<bool> {
    let config = load_discovery_config_from_json(&app_config.raw_json_config)?;
    println!("🚀 Planning import from {}", config.export_root.display());

    let execution_plan = build_execution_plan(&config.export_root, &config.exclude_stages)?;
    for (stage, range) in execution_plan.stage_ranges() {
        println!("📋 {} ({} script(s))", stage, range.len());
        for script in &execution_plan.scripts()[range] {
            println!("   {}  [{}]", script.object_name, script.path.display());
        }
    }
    if !execution_plan.excluded.is_empty() {
        println!("ℹ️ Excluded by configuration:");
        for script in &execution_plan.excluded {
            println!(
                "   {} ({})  [{}]",
                script.object_name,
                script.stage,
                script.path.display()
            );
        }
    }
    if execution_plan.is_empty() {
        println!("⚠️ Every discovered script is excluded; nothing would run.");
    }
    println!(
        "📊 {} script(s) would run across {} stage(s).",
        execution_plan.len(),
        execution_plan.stage_ranges().len()
    );
    Ok(true)
}

fn collect_folder_scripts(
    folder: &Path,
    stage: Stage,
    exclude_stages: &[Stage],
    scripts: &mut Vec<ExportedScript>,
    excluded: &mut Vec<ExcludedScript>,
    discovered_total: &mut usize,
) -> Result<()> {
    for entry in WalkDir::new(folder).sort_by_file_name() {
        let entry = entry
            .with_context(|| format!("Failed to walk export folder: {}", folder.display()))?;
        if !entry.file_type().is_file() || !is_sql_file(entry.path()) {
            continue;
        }
        *discovered_total += 1;
        push_script(entry.path(), stage, exclude_stages, scripts, excluded)?;
    }
    Ok(())
}

fn push_script(
    path: &Path,
    stage: Stage,
    exclude_stages: &[Stage],
    scripts: &mut Vec<ExportedScript>,
    excluded: &mut Vec<ExcludedScript>,
) -> Result<()> {
    let object_name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    if exclude_stages.contains(&stage) {
        excluded.push(ExcludedScript {
            object_name,
            path: path.to_path_buf(),
            stage,
        });
        return Ok(());
    }

    let bytes = fs::read(path)
        .with_context(|| format!("Failed to read script file {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    // Exports written on Windows usually lead with a UTF-8 BOM.
    let sql = text.strip_prefix('\u{feff}').unwrap_or(&text).to_string();

    scripts.push(ExportedScript {
        object_name,
        path: path.to_path_buf(),
        stage,
        sql,
        discovery_index: scripts.len(),
    });
    Ok(())
}

fn is_sql_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("sql"))
        .unwrap_or(false)
}
