// schemarestore/src/import/executor.rs
use std::collections::VecDeque;
use std::time::Duration;

use crate::engine::policy::RetryPolicy;
use crate::engine::{split_batches, EngineError, ScriptEngine};
use crate::plan::ExecutionPlan;
use crate::secrets::binding::{apply_bindings, SecretBindings};
use crate::secrets::catalog::RequirementKey;
use crate::secrets::ResolvedRequirements;
use crate::utils::first_line;

use super::report::{ErrorSink, FailureKind, RunReport};

/// Lifecycle of one script across the run. Deferred scripts go back to
/// Executing on the next retry pass; Succeeded is never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptState {
    Pending,
    Executing,
    Succeeded,
    DeferredDependency,
    FailedTerminal,
}

struct RetryQueueEntry {
    script_index: usize,
    /// First batch still to apply; earlier batches of the script already
    /// ran and must not run again.
    resume_batch: usize,
    last_error: String,
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub max_retry_passes: u32,
    pub script_timeout: Option<Duration>,
    pub fail_fast: bool,
}

enum AttemptOutcome {
    Succeeded,
    /// Hit a retryable server error; a queue entry has been pushed.
    Deferred,
    FailedTerminal,
    /// The session is gone. Nothing further can run.
    FatalConnection(String),
}

/// Runs every script of the plan to a terminal state: an initial pass in
/// stage order, then retry passes over the deferred queue until it empties,
/// a full pass makes no progress, or the pass limit is reached. Never
/// returns an error; connection loss is reported as an aborted run with the
/// unattempted remainder counted as skipped.
pub async fn execute_plan(
    engine: &mut dyn ScriptEngine,
    execution_plan: &ExecutionPlan,
    resolved: &ResolvedRequirements,
    bindings: &SecretBindings,
    policy: &RetryPolicy,
    options: &ExecutorOptions,
) -> RunReport {
    let mut run = ImportRun::new(execution_plan, resolved, bindings, policy, options);
    run.initial_pass(engine).await;
    if run.aborted.is_none() {
        run.retry_passes(engine).await;
    }
    run.into_report()
}

struct ImportRun<'a> {
    plan: &'a ExecutionPlan,
    resolved: &'a ResolvedRequirements,
    bindings: &'a SecretBindings,
    policy: &'a RetryPolicy,
    options: &'a ExecutorOptions,
    states: Vec<ScriptState>,
    attempts: Vec<u32>,
    retry_queue: VecDeque<RetryQueueEntry>,
    sink: ErrorSink,
    retry_passes_completed: u32,
    aborted: Option<String>,
}

impl<'a> ImportRun<'a> {
    fn new(
        plan: &'a ExecutionPlan,
        resolved: &'a ResolvedRequirements,
        bindings: &'a SecretBindings,
        policy: &'a RetryPolicy,
        options: &'a ExecutorOptions,
    ) -> ImportRun<'a> {
        ImportRun {
            plan,
            resolved,
            bindings,
            policy,
            options,
            states: vec![ScriptState::Pending; plan.len()],
            attempts: vec![0; plan.len()],
            retry_queue: VecDeque::new(),
            sink: ErrorSink::default(),
            retry_passes_completed: 0,
            aborted: None,
        }
    }

    async fn initial_pass(&mut self, engine: &mut dyn ScriptEngine) {
        let plan = self.plan;
        for (stage, range) in plan.stage_ranges() {
            println!("🚀 Stage {} ({} script(s))", stage, range.len());
            let mut stage_failures = 0usize;
            for index in range {
                let resolved = self.resolved;
                let tags = resolved
                    .script_tags
                    .get(index)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let missing = self.bindings.unresolved_among(tags);
                if !missing.is_empty() {
                    self.fail_missing_secrets(index, &missing);
                    stage_failures += 1;
                    continue;
                }

                self.states[index] = ScriptState::Executing;
                self.attempts[index] = 1;
                match self.attempt_script(engine, index, 0).await {
                    AttemptOutcome::Succeeded => self.states[index] = ScriptState::Succeeded,
                    AttemptOutcome::Deferred => {
                        self.states[index] = ScriptState::DeferredDependency
                    }
                    AttemptOutcome::FailedTerminal => {
                        self.states[index] = ScriptState::FailedTerminal;
                        stage_failures += 1;
                    }
                    AttemptOutcome::FatalConnection(message) => {
                        self.abort_connection(index, &message);
                        return;
                    }
                }
            }
            // Fail-fast lets the failing stage finish so its error report is
            // complete, then stops dispatching.
            if self.options.fail_fast && stage_failures > 0 {
                self.aborted = Some(format!(
                    "fail-fast: {} script(s) failed terminally in stage {}",
                    stage_failures, stage
                ));
                self.promote_queue("run aborted before retry passes");
                return;
            }
        }
    }

    async fn retry_passes(&mut self, engine: &mut dyn ScriptEngine) {
        while !self.retry_queue.is_empty() {
            if self.retry_passes_completed >= self.options.max_retry_passes {
                self.promote_queue("retry pass limit reached");
                return;
            }
            self.retry_passes_completed += 1;
            let pass_size = self.retry_queue.len();
            println!(
                "🔄 Retry pass {} ({} deferred script(s))",
                self.retry_passes_completed, pass_size
            );

            let mut recovered = 0usize;
            for _ in 0..pass_size {
                let Some(entry) = self.retry_queue.pop_front() else {
                    break;
                };
                let index = entry.script_index;
                self.states[index] = ScriptState::Executing;
                self.attempts[index] += 1;
                match self.attempt_script(engine, index, entry.resume_batch).await {
                    AttemptOutcome::Succeeded => {
                        self.states[index] = ScriptState::Succeeded;
                        recovered += 1;
                    }
                    AttemptOutcome::Deferred => {
                        self.states[index] = ScriptState::DeferredDependency
                    }
                    AttemptOutcome::FailedTerminal => {
                        self.states[index] = ScriptState::FailedTerminal
                    }
                    AttemptOutcome::FatalConnection(message) => {
                        self.abort_connection(index, &message);
                        return;
                    }
                }
            }

            // Fixpoint: a whole pass without a single recovery means the
            // remaining dependencies are not in this export.
            if recovered == 0 && !self.retry_queue.is_empty() {
                self.promote_queue("no progress in a full retry pass");
                return;
            }
        }
    }

    async fn attempt_script(
        &mut self,
        engine: &mut dyn ScriptEngine,
        index: usize,
        resume_from: usize,
    ) -> AttemptOutcome {
        let plan = self.plan;
        let resolved = self.resolved;
        let script = &plan.scripts()[index];
        let tags = resolved
            .script_tags
            .get(index)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let sql = apply_bindings(&script.sql, tags, self.bindings);
        let batches = split_batches(&sql);
        let attempt = self.attempts[index];

        let run = run_batches(engine, &batches, resume_from);
        let result = match self.options.script_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    self.sink.record(
                        &script.object_name,
                        &script.path,
                        script.stage.display_name(),
                        FailureKind::Timeout,
                        attempt,
                        format!("script exceeded the {:?} timeout", limit),
                    );
                    return AttemptOutcome::FailedTerminal;
                }
            },
            None => run.await,
        };

        match result {
            Ok(()) => {
                if attempt > 1 {
                    println!("✓ {} (attempt {})", script.object_name, attempt);
                } else {
                    println!("✓ {}", script.object_name);
                }
                AttemptOutcome::Succeeded
            }
            Err((batch_index, EngineError::Server { number, message }))
                if self.policy.is_retryable(number) =>
            {
                println!(
                    "🔄 {} deferred (server error {}: {})",
                    script.object_name,
                    number,
                    first_line(&message)
                );
                self.retry_queue.push_back(RetryQueueEntry {
                    script_index: index,
                    resume_batch: batch_index,
                    last_error: format!("server error {}: {}", number, message),
                });
                AttemptOutcome::Deferred
            }
            Err((_, EngineError::Server { number, message })) => {
                self.sink.record(
                    &script.object_name,
                    &script.path,
                    script.stage.display_name(),
                    FailureKind::ExecutionFatal,
                    attempt,
                    format!("server error {}: {}", number, message),
                );
                AttemptOutcome::FailedTerminal
            }
            Err((_, EngineError::ConnectionLost(message))) => {
                AttemptOutcome::FatalConnection(message)
            }
            Err((_, EngineError::Io(error))) => AttemptOutcome::FatalConnection(error.to_string()),
        }
    }

    fn fail_missing_secrets(&mut self, index: usize, missing: &[&RequirementKey]) {
        let plan = self.plan;
        let script = &plan.scripts()[index];
        let described: Vec<String> = missing.iter().map(|key| self.describe_key(key)).collect();
        self.states[index] = ScriptState::FailedTerminal;
        self.sink.record(
            &script.object_name,
            &script.path,
            script.stage.display_name(),
            FailureKind::MissingSecret,
            0,
            format!("missing secret(s): {}", described.join(", ")),
        );
    }

    fn describe_key(&self, key: &RequirementKey) -> String {
        match self.resolved.catalog.get(key) {
            Some(requirement) => requirement.describe(),
            None => match &key.1 {
                Some(name) => format!("{} '{}'", key.0, name),
                None => key.0.to_string(),
            },
        }
    }

    /// Drains the queue into FailedTerminal records. Used when retries can
    /// no longer help: pass limit, fixpoint, or fail-fast.
    fn promote_queue(&mut self, reason: &str) {
        let plan = self.plan;
        while let Some(entry) = self.retry_queue.pop_front() {
            let index = entry.script_index;
            let script = &plan.scripts()[index];
            self.states[index] = ScriptState::FailedTerminal;
            self.sink.record(
                &script.object_name,
                &script.path,
                script.stage.display_name(),
                FailureKind::DependencyUnresolved,
                self.attempts[index],
                format!("{} ({})", entry.last_error, reason),
            );
        }
    }

    /// Connection loss is a run-level abort, not a script failure: no error
    /// record is written, the in-flight script and everything still queued
    /// or pending count as skipped.
    fn abort_connection(&mut self, index: usize, message: &str) {
        let plan = self.plan;
        let script = &plan.scripts()[index];
        eprintln!(
            "❌ Connection lost while executing {}: {}",
            script.object_name,
            first_line(message)
        );
        self.aborted = Some(format!(
            "connection lost while executing {}: {}",
            script.object_name,
            first_line(message)
        ));
    }

    fn into_report(self) -> RunReport {
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        let mut skipped = 0usize;
        for state in &self.states {
            match state {
                ScriptState::Succeeded => succeeded += 1,
                ScriptState::FailedTerminal => failed += 1,
                ScriptState::Pending
                | ScriptState::Executing
                | ScriptState::DeferredDependency => skipped += 1,
            }
        }
        RunReport {
            total_scripts: self.states.len(),
            succeeded,
            failed,
            skipped,
            excluded: self.plan.excluded.len(),
            retry_passes_completed: self.retry_passes_completed,
            error_log_path: None,
            aborted: self.aborted,
            errors: self.sink.into_records(),
        }
    }
}

async fn run_batches(
    engine: &mut dyn ScriptEngine,
    batches: &[String],
    resume_from: usize,
) -> Result<(), (usize, EngineError)> {
    for (batch_index, batch) in batches.iter().enumerate().skip(resume_from) {
        if let Err(error) = engine.run_batch(batch).await {
            return Err((batch_index, error));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretsConfig;
    use crate::plan::build_execution_plan;
    use crate::secrets::binding::bind_secrets;
    use crate::secrets::resolve_requirements;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use tempfile::TempDir;

    /// Engine fake: each rule pairs a substring with a queue of scripted
    /// results. The first matching rule with results left answers; anything
    /// else succeeds. Every batch that arrives is logged verbatim.
    struct ScriptedEngine {
        responses: Vec<(String, VecDeque<Result<(), EngineError>>)>,
        log: Vec<String>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl ScriptEngine for ScriptedEngine {
        async fn run_batch(&mut self, sql: &str) -> Result<(), EngineError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.log.push(sql.to_string());
            for (needle, queue) in self.responses.iter_mut() {
                if sql.contains(needle.as_str()) {
                    if let Some(result) = queue.pop_front() {
                        return result;
                    }
                }
            }
            Ok(())
        }
    }

    fn engine_with(rules: Vec<(&str, Vec<Result<(), EngineError>>)>) -> ScriptedEngine {
        ScriptedEngine {
            responses: rules
                .into_iter()
                .map(|(needle, results)| (needle.to_string(), results.into_iter().collect()))
                .collect(),
            log: Vec::new(),
            delay: None,
        }
    }

    fn server_error(number: u32, message: &str) -> Result<(), EngineError> {
        Err(EngineError::Server {
            number,
            message: message.to_string(),
        })
    }

    fn write_script(root: &Path, rel: &str, sql: &str) -> anyhow::Result<()> {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, sql)?;
        Ok(())
    }

    fn options(max_retry_passes: u32, fail_fast: bool) -> ExecutorOptions {
        ExecutorOptions {
            max_retry_passes,
            script_timeout: None,
            fail_fast,
        }
    }

    fn no_requirements() -> (ResolvedRequirements, SecretBindings) {
        let resolved = ResolvedRequirements::default();
        let bindings = bind_secrets(&resolved.catalog, &SecretsConfig::default());
        (resolved, bindings)
    }

    #[tokio::test]
    async fn test_all_scripts_run_in_stage_order() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        write_script(
            dir.path(),
            "FileGroups/fg_secondary.sql",
            "ALTER DATABASE CURRENT ADD FILEGROUP SecondaryFG;",
        )?;
        write_script(
            dir.path(),
            "Tables/dbo.Customers.sql",
            "CREATE TABLE dbo.Customers (Id INT);",
        )?;
        write_script(
            dir.path(),
            "Tables/dbo.Orders.sql",
            "CREATE TABLE dbo.Orders (Id INT);",
        )?;
        write_script(
            dir.path(),
            "Views/dbo.OrderSummary.sql",
            "CREATE VIEW dbo.OrderSummary AS SELECT Id FROM dbo.Orders;",
        )?;

        let plan = build_execution_plan(dir.path(), &[])?;
        let (resolved, bindings) = no_requirements();
        let mut engine = engine_with(vec![]);
        let report = execute_plan(
            &mut engine,
            &plan,
            &resolved,
            &bindings,
            &RetryPolicy::standard(),
            &options(10, false),
        )
        .await;

        assert_eq!(report.total_scripts, 4);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed, 0);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.retry_passes_completed, 0);
        assert!(report.errors.is_empty());
        assert!(report.overall_success());
        assert!(engine.log[0].contains("FILEGROUP"));
        assert!(engine.log[1].contains("dbo.Customers"));
        assert!(engine.log[2].contains("dbo.Orders"));
        assert!(engine.log[3].contains("CREATE VIEW"));
        Ok(())
    }

    #[tokio::test]
    async fn test_forward_reference_recovers_on_retry_pass() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        write_script(
            dir.path(),
            "Views/dbo.OrderTotals.sql",
            "CREATE VIEW dbo.OrderTotals AS SELECT dbo.GetTotal(Id) AS Total FROM dbo.Orders;",
        )?;
        write_script(
            dir.path(),
            "Programmability/dbo.GetTotal.sql",
            "CREATE FUNCTION dbo.GetTotal (@id INT) RETURNS INT AS BEGIN RETURN @id END;",
        )?;

        let plan = build_execution_plan(dir.path(), &[])?;
        let (resolved, bindings) = no_requirements();
        let mut engine = engine_with(vec![(
            "OrderTotals",
            vec![server_error(
                4121,
                "Cannot find either column \"dbo\" or the user-defined function \"dbo.GetTotal\".",
            )],
        )]);
        let report = execute_plan(
            &mut engine,
            &plan,
            &resolved,
            &bindings,
            &RetryPolicy::standard(),
            &options(10, false),
        )
        .await;

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.retry_passes_completed, 1);
        assert!(report.overall_success());
        // The view ran, deferred, and ran again after the function landed.
        assert_eq!(engine.log.len(), 3);
        assert!(engine.log[0].contains("CREATE VIEW"));
        assert!(engine.log[1].contains("CREATE FUNCTION"));
        assert!(engine.log[2].contains("CREATE VIEW"));
        Ok(())
    }

    #[tokio::test]
    async fn test_view_recovers_once_late_stage_table_lands() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        write_script(
            dir.path(),
            "Tables/dbo.Orders.sql",
            "CREATE TABLE dbo.Orders (Id INT);",
        )?;
        write_script(
            dir.path(),
            "Views/dbo.ArchiveSummary.sql",
            "CREATE VIEW dbo.ArchiveSummary AS SELECT Id FROM dbo.ArchiveLog;",
        )?;
        // A mislabeled folder: the table lands in the catch-all stage, after
        // the view that reads from it.
        write_script(
            dir.path(),
            "ZZ_Extras/dbo.ArchiveLog.sql",
            "CREATE TABLE dbo.ArchiveLog (Id INT);",
        )?;

        let plan = build_execution_plan(dir.path(), &[])?;
        let (resolved, bindings) = no_requirements();
        let mut engine = engine_with(vec![(
            "ArchiveSummary",
            vec![server_error(208, "Invalid object name 'dbo.ArchiveLog'.")],
        )]);
        let report = execute_plan(
            &mut engine,
            &plan,
            &resolved,
            &bindings,
            &RetryPolicy::standard(),
            &options(10, false),
        )
        .await;

        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(report.retry_passes_completed, 1);
        assert!(report.errors.is_empty());
        assert!(report.overall_success());
        assert_eq!(engine.log.len(), 4);
        assert!(engine.log[1].contains("ArchiveSummary"));
        assert!(engine.log[2].contains("CREATE TABLE dbo.ArchiveLog"));
        assert!(engine.log[3].contains("ArchiveSummary"));
        Ok(())
    }

    #[tokio::test]
    async fn test_unresolvable_dependencies_promote_at_fixpoint() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        write_script(
            dir.path(),
            "Views/dbo.A.sql",
            "CREATE VIEW dbo.A AS SELECT X FROM dbo.MissingOne;",
        )?;
        write_script(
            dir.path(),
            "Views/dbo.B.sql",
            "CREATE VIEW dbo.B AS SELECT X FROM dbo.MissingTwo;",
        )?;

        let plan = build_execution_plan(dir.path(), &[])?;
        let (resolved, bindings) = no_requirements();
        let mut engine = engine_with(vec![
            (
                "dbo.A",
                vec![
                    server_error(208, "Invalid object name 'dbo.MissingOne'."),
                    server_error(208, "Invalid object name 'dbo.MissingOne'."),
                ],
            ),
            (
                "dbo.B",
                vec![
                    server_error(208, "Invalid object name 'dbo.MissingTwo'."),
                    server_error(208, "Invalid object name 'dbo.MissingTwo'."),
                ],
            ),
        ]);
        let report = execute_plan(
            &mut engine,
            &plan,
            &resolved,
            &bindings,
            &RetryPolicy::standard(),
            &options(10, false),
        )
        .await;

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed, 2);
        assert_eq!(report.retry_passes_completed, 1);
        assert_eq!(report.errors.len(), 2);
        for record in &report.errors {
            assert_eq!(record.kind, FailureKind::DependencyUnresolved);
            assert_eq!(record.attempts, 2);
            assert!(record.error.contains("server error 208"));
            assert!(record.error.contains("no progress in a full retry pass"));
        }
        assert!(!report.overall_success());
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_retry_passes_promotes_immediately() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        write_script(
            dir.path(),
            "Views/dbo.A.sql",
            "CREATE VIEW dbo.A AS SELECT X FROM dbo.Missing;",
        )?;

        let plan = build_execution_plan(dir.path(), &[])?;
        let (resolved, bindings) = no_requirements();
        let mut engine = engine_with(vec![(
            "dbo.A",
            vec![server_error(208, "Invalid object name 'dbo.Missing'.")],
        )]);
        let report = execute_plan(
            &mut engine,
            &plan,
            &resolved,
            &bindings,
            &RetryPolicy::standard(),
            &options(0, false),
        )
        .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.retry_passes_completed, 0);
        assert_eq!(report.errors[0].kind, FailureKind::DependencyUnresolved);
        assert_eq!(report.errors[0].attempts, 1);
        assert!(report.errors[0].error.contains("retry pass limit reached"));
        Ok(())
    }

    #[tokio::test]
    async fn test_promoted_record_keeps_full_error_text() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        write_script(
            dir.path(),
            "Views/dbo.A.sql",
            "CREATE VIEW dbo.A AS SELECT X FROM dbo.Missing;",
        )?;

        let plan = build_execution_plan(dir.path(), &[])?;
        let (resolved, bindings) = no_requirements();
        let mut engine = engine_with(vec![(
            "dbo.A",
            vec![server_error(
                208,
                "Invalid object name 'dbo.Missing'.\nThe statement has been terminated.",
            )],
        )]);
        let report = execute_plan(
            &mut engine,
            &plan,
            &resolved,
            &bindings,
            &RetryPolicy::standard(),
            &options(0, false),
        )
        .await;

        // The persisted record carries the whole multi-line engine message,
        // not just the first line shown on the console.
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0]
            .error
            .contains("The statement has been terminated."));
        Ok(())
    }

    #[tokio::test]
    async fn test_unbound_application_role_never_reaches_the_engine() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        write_script(
            dir.path(),
            "SecurityPrincipals/SalesApp.sql",
            "CREATE APPLICATION ROLE SalesApp WITH PASSWORD = '$(APPLICATION_ROLE_PASSWORD_SALESAPP)';",
        )?;

        let plan = build_execution_plan(dir.path(), &[])?;
        let resolved = resolve_requirements(&plan, dir.path())?;
        let bindings = bind_secrets(&resolved.catalog, &SecretsConfig::default());
        let mut engine = engine_with(vec![]);
        let report = execute_plan(
            &mut engine,
            &plan,
            &resolved,
            &bindings,
            &RetryPolicy::standard(),
            &options(10, false),
        )
        .await;

        assert!(engine.log.is_empty());
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, FailureKind::MissingSecret);
        assert_eq!(report.errors[0].attempts, 0);
        assert!(report.errors[0].error.contains("SalesApp"));
        Ok(())
    }

    #[tokio::test]
    async fn test_bound_application_role_password_is_substituted() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        write_script(
            dir.path(),
            "SecurityPrincipals/SalesApp.sql",
            "CREATE APPLICATION ROLE SalesApp WITH PASSWORD = '$(APPLICATION_ROLE_PASSWORD_SALESAPP)';",
        )?;

        let plan = build_execution_plan(dir.path(), &[])?;
        let resolved = resolve_requirements(&plan, dir.path())?;
        let secrets = SecretsConfig {
            application_roles: HashMap::from([("salesapp".to_string(), "Riddle7!".to_string())]),
            ..SecretsConfig::default()
        };
        let bindings = bind_secrets(&resolved.catalog, &secrets);
        let mut engine = engine_with(vec![]);
        let report = execute_plan(
            &mut engine,
            &plan,
            &resolved,
            &bindings,
            &RetryPolicy::standard(),
            &options(10, false),
        )
        .await;

        assert!(report.overall_success());
        assert_eq!(engine.log.len(), 1);
        assert!(engine.log[0].contains("Riddle7!"));
        assert!(!engine.log[0].contains("$(APPLICATION_ROLE_PASSWORD_SALESAPP)"));
        Ok(())
    }

    #[tokio::test]
    async fn test_terminal_failure_does_not_halt_peers() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        write_script(dir.path(), "Tables/dbo.A.sql", "CREATE TABLE dbo.A (Id INT);")?;
        write_script(dir.path(), "Tables/dbo.B.sql", "CREATE TABLE dbo.B (Id INT);")?;

        let plan = build_execution_plan(dir.path(), &[])?;
        let (resolved, bindings) = no_requirements();
        let mut engine = engine_with(vec![(
            "dbo.A",
            vec![server_error(
                2714,
                "There is already an object named 'A' in the database.",
            )],
        )]);
        let report = execute_plan(
            &mut engine,
            &plan,
            &resolved,
            &bindings,
            &RetryPolicy::standard(),
            &options(10, false),
        )
        .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert!(report.aborted.is_none());
        assert_eq!(report.errors[0].kind, FailureKind::ExecutionFatal);
        assert_eq!(report.errors[0].attempts, 1);
        assert_eq!(report.errors[0].stage, "Tables");
        assert_eq!(engine.log.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_fail_fast_finishes_the_stage_then_stops() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        write_script(
            dir.path(),
            "FileGroups/fg_archive.sql",
            "ALTER DATABASE CURRENT ADD FILEGROUP ArchiveFG;",
        )?;
        write_script(dir.path(), "Tables/dbo.A.sql", "CREATE TABLE dbo.A (Id INT);")?;
        write_script(dir.path(), "Tables/dbo.B.sql", "CREATE TABLE dbo.B (Id INT);")?;
        write_script(
            dir.path(),
            "Views/dbo.Later.sql",
            "CREATE VIEW dbo.Later AS SELECT 1 AS One;",
        )?;

        let plan = build_execution_plan(dir.path(), &[])?;
        let (resolved, bindings) = no_requirements();
        let mut engine = engine_with(vec![
            ("ArchiveFG", vec![server_error(208, "Invalid object name 'sys.fg'.")]),
            ("dbo.A", vec![server_error(102, "Incorrect syntax near 'TABEL'.")]),
        ]);
        let report = execute_plan(
            &mut engine,
            &plan,
            &resolved,
            &bindings,
            &RetryPolicy::standard(),
            &options(10, true),
        )
        .await;

        // dbo.B shares the failing stage and still ran; the Views stage never
        // started; the deferred filegroup script was promoted.
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.skipped, 1);
        let aborted = report.aborted.as_deref().unwrap_or_default();
        assert!(aborted.contains("fail-fast"));
        assert!(aborted.contains("Tables"));
        assert!(!engine.log.iter().any(|sql| sql.contains("dbo.Later")));
        let promoted: Vec<_> = report
            .errors
            .iter()
            .filter(|r| r.kind == FailureKind::DependencyUnresolved)
            .collect();
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].object_name, "fg_archive");
        assert!(promoted[0].error.contains("run aborted before retry passes"));
        Ok(())
    }

    #[tokio::test]
    async fn test_connection_loss_aborts_without_error_records() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        write_script(dir.path(), "Tables/dbo.A.sql", "CREATE TABLE dbo.A (Id INT);")?;
        write_script(dir.path(), "Tables/dbo.B.sql", "CREATE TABLE dbo.B (Id INT);")?;
        write_script(dir.path(), "Tables/dbo.C.sql", "CREATE TABLE dbo.C (Id INT);")?;
        write_script(
            dir.path(),
            "Views/dbo.V.sql",
            "CREATE VIEW dbo.V AS SELECT Id FROM dbo.A;",
        )?;

        let plan = build_execution_plan(dir.path(), &[])?;
        let (resolved, bindings) = no_requirements();
        let mut engine = engine_with(vec![(
            "dbo.B",
            vec![Err(EngineError::ConnectionLost(
                "connection reset by peer".to_string(),
            ))],
        )]);
        let report = execute_plan(
            &mut engine,
            &plan,
            &resolved,
            &bindings,
            &RetryPolicy::standard(),
            &options(10, false),
        )
        .await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.skipped, 3);
        assert!(report.errors.is_empty());
        let aborted = report.aborted.as_deref().unwrap_or_default();
        assert!(aborted.contains("connection lost while executing dbo.B"));
        assert!(!report.overall_success());
        assert!(!engine.log.iter().any(|sql| sql.contains("dbo.C")));
        Ok(())
    }

    #[tokio::test]
    async fn test_script_timeout_is_terminal() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        write_script(dir.path(), "Procedures/dbo.Slow.sql", "EXEC dbo.WarmCaches;")?;

        let plan = build_execution_plan(dir.path(), &[])?;
        let (resolved, bindings) = no_requirements();
        let mut engine = engine_with(vec![]);
        engine.delay = Some(Duration::from_millis(200));
        let opts = ExecutorOptions {
            max_retry_passes: 10,
            script_timeout: Some(Duration::from_millis(50)),
            fail_fast: false,
        };
        let report = execute_plan(
            &mut engine,
            &plan,
            &resolved,
            &bindings,
            &RetryPolicy::standard(),
            &opts,
        )
        .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.retry_passes_completed, 0);
        assert_eq!(report.errors[0].kind, FailureKind::Timeout);
        assert_eq!(report.errors[0].attempts, 1);
        assert!(report.errors[0].error.contains("timeout"));
        Ok(())
    }

    #[tokio::test]
    async fn test_retry_resumes_after_the_last_applied_batch() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        write_script(
            dir.path(),
            "Tables/dbo.T.sql",
            "CREATE TABLE dbo.T (Id INT);\nGO\nALTER TABLE dbo.T ADD CONSTRAINT FK_T_U FOREIGN KEY (Id) REFERENCES dbo.U (Id);\nGO\nCREATE INDEX IX_T_Id ON dbo.T (Id);\n",
        )?;
        write_script(
            dir.path(),
            "Tables/dbo.U.sql",
            "CREATE TABLE dbo.U (Id INT PRIMARY KEY);",
        )?;

        let plan = build_execution_plan(dir.path(), &[])?;
        let (resolved, bindings) = no_requirements();
        let mut engine = engine_with(vec![(
            "FOREIGN KEY",
            vec![server_error(
                1767,
                "Foreign key 'FK_T_U' references invalid table 'dbo.U'.",
            )],
        )]);
        let report = execute_plan(
            &mut engine,
            &plan,
            &resolved,
            &bindings,
            &RetryPolicy::standard(),
            &options(10, false),
        )
        .await;

        assert!(report.overall_success());
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.retry_passes_completed, 1);
        let count =
            |needle: &str| engine.log.iter().filter(|sql| sql.contains(needle)).count();
        // The CREATE TABLE batch ran once; only the failed constraint batch
        // and everything after it re-ran.
        assert_eq!(count("CREATE TABLE dbo.T"), 1);
        assert_eq!(count("FOREIGN KEY"), 2);
        assert_eq!(count("CREATE INDEX IX_T_Id"), 1);
        assert_eq!(count("CREATE TABLE dbo.U"), 1);
        Ok(())
    }
}
