// schemarestore/src/secrets/catalog.rs
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequirementKind {
    DatabaseMasterKey,
    SymmetricKey,
    Certificate,
    AsymmetricKey,
    ApplicationRole,
    ColumnMasterKey,
    ColumnEncryptionKey,
}

impl RequirementKind {
    pub fn display_name(self) -> &'static str {
        match self {
            RequirementKind::DatabaseMasterKey => "DatabaseMasterKey",
            RequirementKind::SymmetricKey => "SymmetricKey",
            RequirementKind::Certificate => "Certificate",
            RequirementKind::AsymmetricKey => "AsymmetricKey",
            RequirementKind::ApplicationRole => "ApplicationRole",
            RequirementKind::ColumnMasterKey => "ColumnMasterKey",
            RequirementKind::ColumnEncryptionKey => "ColumnEncryptionKey",
        }
    }

    /// Kinds whose secret material the import run can actually supply.
    /// The rest (asymmetric keys, Always Encrypted key metadata) cannot be
    /// scripted with their secrets; they surface as operator warnings only.
    pub fn needs_value(self) -> bool {
        matches!(
            self,
            RequirementKind::DatabaseMasterKey
                | RequirementKind::SymmetricKey
                | RequirementKind::Certificate
                | RequirementKind::ApplicationRole
        )
    }
}

impl std::fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementSource {
    /// Listed in the export's metadata manifest.
    Declared,
    /// Found by scanning comment-stripped script text.
    Inferred,
}

/// Catalog key: kind plus lowercased name. The name is `None` for the
/// database master key and for the placeholder column master key inferred
/// from CEK usage.
pub type RequirementKey = (RequirementKind, Option<String>);

#[derive(Debug, Clone)]
pub struct EncryptionRequirement {
    pub kind: RequirementKind,
    /// Name in its original casing, for display.
    pub name: Option<String>,
    pub source: RequirementSource,
    /// Populated only for `Inferred` entries.
    pub inference_reason: Option<String>,
}

impl EncryptionRequirement {
    pub fn declared(kind: RequirementKind, name: Option<String>) -> Self {
        EncryptionRequirement {
            kind,
            name,
            source: RequirementSource::Declared,
            inference_reason: None,
        }
    }

    pub fn inferred(kind: RequirementKind, name: Option<String>, reason: &str) -> Self {
        EncryptionRequirement {
            kind,
            name,
            source: RequirementSource::Inferred,
            inference_reason: Some(reason.to_string()),
        }
    }

    pub fn key(&self) -> RequirementKey {
        (self.kind, self.name.as_ref().map(|n| n.to_lowercase()))
    }

    pub fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("{} '{}'", self.kind, name),
            None => self.kind.to_string(),
        }
    }
}

/// Merged requirement set, keyed by (kind, lowercased name) so the same
/// object reported by metadata and found by scanning collapses into one
/// entry. Iteration order is deterministic.
#[derive(Debug, Default)]
pub struct RequirementCatalog {
    entries: BTreeMap<RequirementKey, EncryptionRequirement>,
}

impl RequirementCatalog {
    /// Declared replaces Inferred for the same key; Inferred never replaces
    /// Declared; within the same source the first entry stays.
    pub fn insert(&mut self, requirement: EncryptionRequirement) {
        match self.entries.entry(requirement.key()) {
            Entry::Vacant(slot) => {
                slot.insert(requirement);
            }
            Entry::Occupied(mut slot) => {
                if slot.get().source == RequirementSource::Inferred
                    && requirement.source == RequirementSource::Declared
                {
                    slot.insert(requirement);
                }
            }
        }
    }

    pub fn get(&self, key: &RequirementKey) -> Option<&EncryptionRequirement> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EncryptionRequirement> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
