// schemarestore/src/secrets/binding.rs
//! Matches the requirement catalog against operator-supplied secret values
//! and substitutes them into sqlcmd-style `$(VAR)` scripting variables.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::SecretsConfig;

use super::catalog::{RequirementCatalog, RequirementKey, RequirementKind};

/// Built once per run, read-only afterward.
#[derive(Debug, Default)]
pub struct SecretBindings {
    bound: BTreeMap<RequirementKey, String>,
    /// Value-bearing requirements with no configured value. Scripts tagged
    /// with any of these are failed up front instead of reaching the engine.
    pub unresolved: BTreeSet<RequirementKey>,
    /// Requirements whose secret material cannot be supplied at import time
    /// (asymmetric keys, Always Encrypted key metadata). Warnings only.
    pub informational: BTreeSet<RequirementKey>,
}

impl SecretBindings {
    pub fn value_for(&self, key: &RequirementKey) -> Option<&str> {
        self.bound.get(key).map(String::as_str)
    }

    /// The tags of `tags` that are unresolved, in tag order.
    pub fn unresolved_among<'a>(&self, tags: &'a [RequirementKey]) -> Vec<&'a RequirementKey> {
        tags.iter().filter(|key| self.unresolved.contains(*key)).collect()
    }
}

pub fn bind_secrets(catalog: &RequirementCatalog, secrets: &SecretsConfig) -> SecretBindings {
    let mut bindings = SecretBindings::default();
    for requirement in catalog.iter() {
        let key = requirement.key();
        if !requirement.kind.needs_value() {
            bindings.informational.insert(key);
            continue;
        }
        // Config maps are keyed by lowercased name, as is the key itself.
        let value = match (requirement.kind, &key.1) {
            (RequirementKind::DatabaseMasterKey, _) => secrets.master_key_password.clone(),
            (RequirementKind::SymmetricKey, Some(name)) => secrets.symmetric_keys.get(name).cloned(),
            (RequirementKind::Certificate, Some(name)) => secrets.certificates.get(name).cloned(),
            (RequirementKind::ApplicationRole, Some(name)) => {
                secrets.application_roles.get(name).cloned()
            }
            _ => None,
        };
        match value {
            Some(value) => {
                bindings.bound.insert(key, value);
            }
            None => {
                bindings.unresolved.insert(key);
            }
        }
    }
    bindings
}

/// The sqlcmd scripting-variable name a bound requirement substitutes:
/// `$(DMK_PASSWORD)`, `$(SYMMETRIC_KEY_PASSWORD_<NAME>)`,
/// `$(CERTIFICATE_PASSWORD_<NAME>)`, `$(APPLICATION_ROLE_PASSWORD_<NAME>)`,
/// with `<NAME>` uppercased and non-alphanumerics folded to `_`.
pub fn placeholder_name(kind: RequirementKind, name: Option<&str>) -> Option<String> {
    match kind {
        RequirementKind::DatabaseMasterKey => Some("DMK_PASSWORD".to_string()),
        RequirementKind::SymmetricKey => {
            name.map(|n| format!("SYMMETRIC_KEY_PASSWORD_{}", sanitize(n)))
        }
        RequirementKind::Certificate => {
            name.map(|n| format!("CERTIFICATE_PASSWORD_{}", sanitize(n)))
        }
        RequirementKind::ApplicationRole => {
            name.map(|n| format!("APPLICATION_ROLE_PASSWORD_{}", sanitize(n)))
        }
        _ => None,
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Replaces the placeholders of every bound tag with its value. Scripts
/// without placeholders come back unchanged; placeholders of unbound or
/// untagged variables are left alone so the server error stays diagnosable.
pub fn apply_bindings(sql: &str, tags: &[RequirementKey], bindings: &SecretBindings) -> String {
    let mut out = sql.to_string();
    for key in tags {
        let Some(value) = bindings.value_for(key) else {
            continue;
        };
        let Some(var) = placeholder_name(key.0, key.1.as_deref()) else {
            continue;
        };
        let token = format!("$({})", var);
        if out.contains(&token) {
            out = out.replace(&token, value);
        }
    }
    out
}
