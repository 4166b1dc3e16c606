// schemarestore/src/secrets/rules.rs
//! Declarative scan rules for inferring encryption requirements from
//! comment-stripped script text.
//!
//! Each rule is a compiled pattern plus an emit action; adding a rule means
//! adding a table entry, not control flow. All scanning happens on text that
//! already went through [`super::strip::strip_sql_comments`], so commented-out
//! statements never match.

use anyhow::{Context, Result};
use regex::{Captures, Regex};

use super::catalog::{EncryptionRequirement, RequirementKind};
use super::strip;

/// Matches `[bracketed]`, `"quoted"` or bare T-SQL identifiers.
const NAME_PATTERN: &str =
    r#"(?:\[(?P<br>[^\]]+)\]|"(?P<dq>[^"]+)"|(?P<bare>[A-Za-z_#@][A-Za-z0-9_#@$]*))"#;

#[derive(Debug)]
enum EmitKind {
    /// Capture a name, emit one requirement of `kind`.
    Named {
        kind: RequirementKind,
        reason: &'static str,
    },
    /// Bare master-key reference with no name to capture.
    MasterKey { reason: &'static str },
    /// `CREATE SYMMETRIC KEY`: the named key, plus the master key when the
    /// statement carries an `ENCRYPTION BY MASTER KEY` clause.
    SymmetricKeyCreate,
    /// `CREATE|ALTER CERTIFICATE`: the named certificate, plus the master
    /// key when a `WITH PRIVATE KEY (…)` block names no decryption password
    /// (an imported private key without one is protected by the DMK).
    Certificate,
    /// Column definition `ENCRYPTED WITH (… COLUMN_ENCRYPTION_KEY = name …)`:
    /// the named CEK plus a placeholder column master key.
    EncryptedWith,
}

#[derive(Debug)]
struct ScanRule {
    regex: Regex,
    emit: EmitKind,
}

#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<ScanRule>,
    go_line: Regex,
    encryption_by_master_key: Regex,
    with_private_key: Regex,
    decryption_by_password: Regex,
    cek_assignment: Regex,
}

impl RuleSet {
    pub fn standard() -> Result<RuleSet> {
        let named = |pattern: &str| format!(r"(?i)\b{}\s+{}", pattern, NAME_PATTERN);
        let rule = |id: &'static str, pattern: String, emit: EmitKind| -> Result<ScanRule> {
            Ok(ScanRule {
                regex: Regex::new(&pattern)
                    .with_context(|| format!("Failed to compile scan rule '{}'", id))?,
                emit,
            })
        };

        let rules = vec![
            rule(
                "create-symmetric-key",
                named(r"CREATE\s+SYMMETRIC\s+KEY"),
                EmitKind::SymmetricKeyCreate,
            )?,
            rule(
                "open-symmetric-key",
                named(r"OPEN\s+SYMMETRIC\s+KEY"),
                EmitKind::Named {
                    kind: RequirementKind::SymmetricKey,
                    reason: "OPEN SYMMETRIC KEY statement",
                },
            )?,
            rule(
                "certificate",
                named(r"(?:CREATE|ALTER)\s+CERTIFICATE"),
                EmitKind::Certificate,
            )?,
            rule(
                "create-asymmetric-key",
                named(r"CREATE\s+ASYMMETRIC\s+KEY"),
                EmitKind::Named {
                    kind: RequirementKind::AsymmetricKey,
                    reason: "CREATE ASYMMETRIC KEY statement",
                },
            )?,
            // The role name inside a dynamic-SQL literal is preceded by the
            // literal's quote noise ('' around the embedded name), hence the
            // optional quotes before the name.
            rule(
                "create-application-role",
                format!(
                    r"(?i)\bCREATE\s+APPLICATION\s+ROLE\s+'{{0,2}}{}",
                    NAME_PATTERN
                ),
                EmitKind::Named {
                    kind: RequirementKind::ApplicationRole,
                    reason: "CREATE APPLICATION ROLE statement",
                },
            )?,
            rule(
                "create-master-key",
                r"(?i)\bCREATE\s+MASTER\s+KEY\b".to_string(),
                EmitKind::MasterKey {
                    reason: "CREATE MASTER KEY statement",
                },
            )?,
            rule(
                "open-master-key",
                r"(?i)\bOPEN\s+MASTER\s+KEY\b".to_string(),
                EmitKind::MasterKey {
                    reason: "OPEN MASTER KEY statement",
                },
            )?,
            rule(
                "create-column-master-key",
                named(r"CREATE\s+COLUMN\s+MASTER\s+KEY"),
                EmitKind::Named {
                    kind: RequirementKind::ColumnMasterKey,
                    reason: "CREATE COLUMN MASTER KEY statement",
                },
            )?,
            rule(
                "create-column-encryption-key",
                named(r"CREATE\s+COLUMN\s+ENCRYPTION\s+KEY"),
                EmitKind::Named {
                    kind: RequirementKind::ColumnEncryptionKey,
                    reason: "CREATE COLUMN ENCRYPTION KEY statement",
                },
            )?,
            rule(
                "encrypted-with-clause",
                r"(?i)\bENCRYPTED\s+WITH\s*\(".to_string(),
                EmitKind::EncryptedWith,
            )?,
        ];

        Ok(RuleSet {
            rules,
            go_line: Regex::new(r"(?im)^[ \t]*GO(?:[ \t]+\d+)?[ \t]*\r?$")
                .context("Failed to compile GO separator pattern")?,
            encryption_by_master_key: Regex::new(r"(?i)\bENCRYPTION\s+BY\s+MASTER\s+KEY\b")
                .context("Failed to compile ENCRYPTION BY MASTER KEY pattern")?,
            with_private_key: Regex::new(r"(?i)\bWITH\s+PRIVATE\s+KEY\s*\(")
                .context("Failed to compile WITH PRIVATE KEY pattern")?,
            decryption_by_password: Regex::new(
                r"(?i)(?:\bDECRYPTION\s+BY\s+PASSWORD\b|\bDECRYPTION_BY_PASSWORD\b)",
            )
            .context("Failed to compile DECRYPTION BY PASSWORD pattern")?,
            cek_assignment: Regex::new(&format!(
                r"(?i)\bCOLUMN_ENCRYPTION_KEY\s*=\s*{}",
                NAME_PATTERN
            ))
            .context("Failed to compile COLUMN_ENCRYPTION_KEY pattern")?,
        })
    }

    /// Applies every rule to `stripped` (text that has already been
    /// comment-stripped) and returns the requirements found, in match order.
    pub fn scan(&self, stripped: &str) -> Vec<EncryptionRequirement> {
        let mut found = Vec::new();
        for rule in &self.rules {
            for caps in rule.regex.captures_iter(stripped) {
                self.apply(rule, &caps, stripped, &mut found);
            }
        }
        found
    }

    fn apply(
        &self,
        rule: &ScanRule,
        caps: &Captures<'_>,
        stripped: &str,
        found: &mut Vec<EncryptionRequirement>,
    ) {
        let Some(whole) = caps.get(0) else {
            return;
        };
        match &rule.emit {
            EmitKind::Named { kind, reason } => {
                if let Some(name) = captured_name(caps) {
                    found.push(EncryptionRequirement::inferred(*kind, Some(name), reason));
                }
            }
            EmitKind::MasterKey { reason } => {
                found.push(EncryptionRequirement::inferred(
                    RequirementKind::DatabaseMasterKey,
                    None,
                    reason,
                ));
            }
            EmitKind::SymmetricKeyCreate => {
                if let Some(name) = captured_name(caps) {
                    found.push(EncryptionRequirement::inferred(
                        RequirementKind::SymmetricKey,
                        Some(name),
                        "CREATE SYMMETRIC KEY statement",
                    ));
                }
                let end = self.statement_end(stripped, whole.end());
                if self
                    .encryption_by_master_key
                    .is_match(&stripped[whole.end()..end])
                {
                    found.push(EncryptionRequirement::inferred(
                        RequirementKind::DatabaseMasterKey,
                        None,
                        "referenced MASTER KEY",
                    ));
                }
            }
            EmitKind::Certificate => {
                if let Some(name) = captured_name(caps) {
                    found.push(EncryptionRequirement::inferred(
                        RequirementKind::Certificate,
                        Some(name),
                        "CREATE/ALTER CERTIFICATE statement",
                    ));
                }
                let end = self.statement_end(stripped, whole.end());
                let window = &stripped[whole.end()..end];
                if let Some(pk) = self.with_private_key.find(window) {
                    let open_abs = whole.end() + pk.end() - 1;
                    if let Some(block) = strip::paren_block(stripped, open_abs) {
                        if !self.decryption_by_password.is_match(block) {
                            found.push(EncryptionRequirement::inferred(
                                RequirementKind::DatabaseMasterKey,
                                None,
                                "certificate with DMK-encrypted private key",
                            ));
                        }
                    }
                }
            }
            EmitKind::EncryptedWith => {
                let open_abs = whole.end() - 1;
                let Some(block) = strip::paren_block(stripped, open_abs) else {
                    return;
                };
                let mut any_cek = false;
                for cek in self.cek_assignment.captures_iter(block) {
                    if let Some(name) = captured_name(&cek) {
                        found.push(EncryptionRequirement::inferred(
                            RequirementKind::ColumnEncryptionKey,
                            Some(name),
                            "inferred from ENCRYPTED WITH",
                        ));
                        any_cek = true;
                    }
                }
                if any_cek {
                    found.push(EncryptionRequirement::inferred(
                        RequirementKind::ColumnMasterKey,
                        None,
                        "required, inferred from CEK usage",
                    ));
                }
            }
        }
    }

    /// End (exclusive) of the statement continuing at `from`: the next
    /// unquoted `;`, the next GO separator line, or end of text.
    fn statement_end(&self, stripped: &str, from: usize) -> usize {
        let semi = strip::find_unquoted(stripped, from, b';').unwrap_or(stripped.len());
        let go = self
            .go_line
            .find_at(stripped, from)
            .map(|m| m.start())
            .unwrap_or(stripped.len());
        semi.min(go)
    }
}

fn captured_name(caps: &Captures<'_>) -> Option<String> {
    for group in ["br", "dq", "bare"] {
        if let Some(m) = caps.name(group) {
            let name = m.as_str().trim();
            if name.is_empty() {
                continue;
            }
            // A bracketed capture holding quote or concat characters is
            // dynamic-SQL splice noise ('… [' + @name + '] …'), not a name.
            if group == "br" && (name.contains('\'') || name.contains('+')) {
                return None;
            }
            return Some(name.to_string());
        }
    }
    None
}
