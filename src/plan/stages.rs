// schemarestore/src/plan/stages.rs

/// Execution tiers, declared in the order stages run.
///
/// `Programmability` runs last and doubles as the tier for anything the
/// folder classifier does not recognize: unknown object kinds get every
/// earlier tier applied first, plus the retry passes, before their own
/// scripts are attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    FileGroups,
    SecurityPrincipals,
    SchemaContainers,
    Types,
    Tables,
    KeysAndIndexes,
    Views,
    Functions,
    Procedures,
    Triggers,
    Synonyms,
    EncryptionObjects,
    Programmability,
}

impl Stage {
    pub const ALL: [Stage; 13] = [
        Stage::FileGroups,
        Stage::SecurityPrincipals,
        Stage::SchemaContainers,
        Stage::Types,
        Stage::Tables,
        Stage::KeysAndIndexes,
        Stage::Views,
        Stage::Functions,
        Stage::Procedures,
        Stage::Triggers,
        Stage::Synonyms,
        Stage::EncryptionObjects,
        Stage::Programmability,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            Stage::FileGroups => "FileGroups",
            Stage::SecurityPrincipals => "SecurityPrincipals",
            Stage::SchemaContainers => "SchemaContainers",
            Stage::Types => "Types",
            Stage::Tables => "Tables",
            Stage::KeysAndIndexes => "KeysAndIndexes",
            Stage::Views => "Views",
            Stage::Functions => "Functions",
            Stage::Procedures => "Procedures",
            Stage::Triggers => "Triggers",
            Stage::Synonyms => "Synonyms",
            Stage::EncryptionObjects => "EncryptionObjects",
            Stage::Programmability => "Programmability",
        }
    }

    /// Resolves a config-supplied stage name. Case and `_`/`-`/space
    /// separators are ignored, so `"keys_and_indexes"` matches
    /// `KeysAndIndexes`.
    pub fn from_config_name(name: &str) -> Option<Stage> {
        let folded = fold(name);
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| fold(stage.display_name()) == folded)
    }

    /// Classifies an export folder name into its stage.
    ///
    /// The sortable prefix (`09_StoredProcedures`) is dropped, the rest is
    /// folded to lowercase alphanumerics, and the first matching token wins.
    /// Token order is load-bearing: encryption tokens run before "key" so
    /// `SymmetricKeys` does not land in `KeysAndIndexes`, and "type" /
    /// "function" run before "user" so `UserDefinedTypes` and
    /// `UserDefinedFunctions` do not land in `SecurityPrincipals`.
    /// Anything unmatched is `Programmability`.
    pub fn classify_folder(folder_name: &str) -> Stage {
        let stripped = folder_name
            .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '_' | '-' | '.' | ' '));
        let folded = fold(stripped);

        let rules: &[(&[&str], Stage)] = &[
            (&["filegroup"], Stage::FileGroups),
            (
                &["masterkey", "symmetric", "certificat", "encrypt", "crypto"],
                Stage::EncryptionObjects,
            ),
            (&["schema"], Stage::SchemaContainers),
            (&["type"], Stage::Types),
            (&["function"], Stage::Functions),
            (&["proc"], Stage::Procedures),
            (&["trigger"], Stage::Triggers),
            (&["view"], Stage::Views),
            (&["synonym"], Stage::Synonyms),
            (&["index", "constraint", "key"], Stage::KeysAndIndexes),
            (
                &["security", "login", "user", "role", "principal"],
                Stage::SecurityPrincipals,
            ),
            (&["table"], Stage::Tables),
        ];

        for &(tokens, stage) in rules {
            if tokens.iter().any(|token| folded.contains(token)) {
                return stage;
            }
        }
        Stage::Programmability
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

fn fold(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
