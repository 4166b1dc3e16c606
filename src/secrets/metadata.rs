// schemarestore/src/secrets/metadata.rs
//! Declared encryption requirements from the export's manifest.
//!
//! The manifest is best-effort input: a missing, old or malformed
//! `export.meta.json` downgrades resolution to script scanning alone with a
//! console note, never an error.

use serde::Deserialize;
use std::path::Path;

use crate::config::coerce;

use super::catalog::{EncryptionRequirement, RequirementKind};

pub const METADATA_FILE_NAME: &str = "export.meta.json";
/// Exports older than this predate the encryption block and may carry a
/// stale or absent one; their manifests are ignored.
pub const MIN_FORMAT_VERSION: u32 = 2;

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    format_version: Option<serde_json::Value>,
    encryption: Option<RawEncryptionMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEncryptionMetadata {
    has_master_key: Option<serde_json::Value>,
    symmetric_keys: Option<Vec<String>>,
    certificates: Option<Vec<String>>,
    application_roles: Option<Vec<String>>,
    column_master_keys: Option<Vec<String>>,
    column_encryption_keys: Option<Vec<String>>,
}

/// Reads `export.meta.json` at the export root and returns the declared
/// requirements, or an empty list when the manifest is unusable.
pub fn load_declared_requirements(export_root: &Path) -> Vec<EncryptionRequirement> {
    let path = export_root.join(METADATA_FILE_NAME);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(_) => {
            println!(
                "ℹ️ No {} at export root; relying on script scanning alone.",
                METADATA_FILE_NAME
            );
            return Vec::new();
        }
    };

    let raw: RawMetadata = match serde_json::from_str(&content) {
        Ok(raw) => raw,
        Err(e) => {
            println!(
                "⚠️ Ignoring malformed {}: {}. Relying on script scanning alone.",
                METADATA_FILE_NAME, e
            );
            return Vec::new();
        }
    };

    let version = raw
        .format_version
        .as_ref()
        .and_then(|value| coerce::coerce_u32("format_version", value).ok());
    match version {
        Some(v) if v >= MIN_FORMAT_VERSION => {}
        Some(v) => {
            println!(
                "⚠️ {} has format_version {} (need >= {}); relying on script scanning alone.",
                METADATA_FILE_NAME, v, MIN_FORMAT_VERSION
            );
            return Vec::new();
        }
        None => {
            println!(
                "⚠️ {} has no usable format_version; relying on script scanning alone.",
                METADATA_FILE_NAME
            );
            return Vec::new();
        }
    }

    // A v2+ manifest without an encryption block simply declares nothing.
    let Some(encryption) = raw.encryption else {
        return Vec::new();
    };

    let mut declared = Vec::new();

    let has_master_key = match &encryption.has_master_key {
        Some(value) => match coerce::coerce_bool("has_master_key", value) {
            Ok(flag) => flag,
            Err(e) => {
                println!("⚠️ Ignoring unreadable has_master_key in {}: {}", METADATA_FILE_NAME, e);
                false
            }
        },
        None => false,
    };
    if has_master_key {
        declared.push(EncryptionRequirement::declared(
            RequirementKind::DatabaseMasterKey,
            None,
        ));
    }

    push_named(&mut declared, RequirementKind::SymmetricKey, &encryption.symmetric_keys);
    push_named(&mut declared, RequirementKind::Certificate, &encryption.certificates);
    push_named(&mut declared, RequirementKind::ApplicationRole, &encryption.application_roles);
    push_named(&mut declared, RequirementKind::ColumnMasterKey, &encryption.column_master_keys);
    push_named(&mut declared, RequirementKind::ColumnEncryptionKey, &encryption.column_encryption_keys);

    declared
}

fn push_named(
    declared: &mut Vec<EncryptionRequirement>,
    kind: RequirementKind,
    names: &Option<Vec<String>>,
) {
    if let Some(names) = names {
        for name in names {
            let trimmed = name.trim();
            if !trimmed.is_empty() {
                declared.push(EncryptionRequirement::declared(kind, Some(trimmed.to_string())));
            }
        }
    }
}
