//! Execution engine
//!
//! Runs the selected sections and folds their outcomes into the report.
//!
//! Per section the engine:
//! 1. Evaluates the section skip predicate with cheap dependencies only.
//! 2. Evaluates each check's skip predicate the same way.
//! 3. Resolves the dependencies of the checks that still apply. Expensive
//!    dependencies are therefore never constructed for skipped work.
//! 4. Invokes the checks concurrently, bounded by a run-wide limit. Checks
//!    sharing an exclusive tag never overlap.
//!
//! Every failure is contained at the narrowest scope: a check that errors,
//! panics or exceeds its timeout yields a major problem for that check only.
//! A dependency failure fails the checks needing it, or the section when
//! every check needs it. Only a foundational dependency (the cluster client)
//! aborts the run, and even then the sections finished so far are reported.
//!
//! A run can also be interrupted through [`Engine::cancellation_token`].
//! Running checks are aborted and every object they spawned is deleted
//! before [`Engine::run`] returns.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::CheckerConfig;
use crate::deps::{DependencyKey, ResolvedDeps, Resolver};
use crate::registry::{Check, Registry, SectionPlan};
use crate::report::{aggregate, CheckOutcome, CheckRecord, Report, SectionOutcome};
use compliance_common::Error;

/// Default run-wide bound on concurrently executing checks
pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 4;

/// Default per-check timeout
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(600);

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Run-wide bound on concurrently executing checks
    pub max_concurrent_checks: usize,
    /// Timeout applied to checks that do not declare their own
    pub check_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_checks: DEFAULT_MAX_CONCURRENT_CHECKS,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }
}

impl From<&CheckerConfig> for EngineConfig {
    fn from(config: &CheckerConfig) -> Self {
        Self {
            max_concurrent_checks: config.max_concurrent_checks,
            check_timeout: config.check_timeout,
        }
    }
}

/// The run could not continue. Carries what was finished before the abort.
#[derive(Debug, thiserror::Error)]
#[error("run aborted: {cause}")]
pub struct RunAborted {
    /// Report covering the sections that finished
    pub partial: Report,
    /// The foundational failure, or the interruption
    #[source]
    pub cause: Error,
}

/// Runs a registry against a resolver
pub struct Engine {
    registry: Registry,
    resolver: Arc<Resolver>,
    config: EngineConfig,
    cancel: CancellationToken,
}

struct RunState {
    resolver: Arc<Resolver>,
    limiter: Arc<Semaphore>,
    exclusive: DashMap<&'static str, Arc<Mutex<()>>>,
    aborted: CancellationToken,
    interrupted: CancellationToken,
    check_timeout: Duration,
}

impl Engine {
    /// Create an engine for one run
    pub fn new(registry: Registry, resolver: Resolver, config: EngineConfig) -> Self {
        Self {
            registry,
            resolver: Arc::new(resolver),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token interrupting the run when cancelled.
    ///
    /// Checks still waiting are not started, running checks are aborted, and
    /// [`Engine::run`] returns [`RunAborted`] once their objects are deleted.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every section and aggregate the report.
    ///
    /// All spawned cluster objects are released before this returns,
    /// whether the run completed, aborted or was interrupted. Dropping the
    /// returned future aborts running checks and leaves their cleanup to
    /// background tasks.
    pub async fn run(self) -> Result<Report, RunAborted> {
        let plans = self.registry.instantiate();
        info!(
            sections = plans.len(),
            checks = self.registry.check_count(),
            max_concurrent = self.config.max_concurrent_checks,
            "Starting compliance run"
        );

        let run = Arc::new(RunState {
            resolver: self.resolver.clone(),
            limiter: Arc::new(Semaphore::new(self.config.max_concurrent_checks.max(1))),
            exclusive: DashMap::new(),
            aborted: CancellationToken::new(),
            interrupted: self.cancel.clone(),
            check_timeout: self.config.check_timeout,
        });

        let outcomes = join_all(plans.into_iter().map(|plan| {
            let span = info_span!("section", section = %plan.name);
            run_section(run.clone(), plan).instrument(span)
        }))
        .await;

        self.resolver.shutdown().await;

        let report = aggregate(outcomes.into_iter().flatten());
        let (passed, failed) = report.counts();
        match self.resolver.foundational_failure() {
            Some(cause) => {
                error!(error = %cause, passed, failed, "Run aborted");
                Err(RunAborted {
                    partial: report,
                    cause,
                })
            }
            None if self.cancel.is_cancelled() => {
                warn!(passed, failed, "Run interrupted, spawned objects released");
                Err(RunAborted {
                    partial: report,
                    cause: Error::interrupted("run cancelled before every check finished"),
                })
            }
            None => {
                info!(result = report.result, passed, failed, "Run finished");
                Ok(report)
            }
        }
    }
}

impl RunState {
    fn exclusive_lock(&self, tag: &'static str) -> Arc<Mutex<()>> {
        self.exclusive.entry(tag).or_default().clone()
    }

    /// Resolves once the run is aborted or interrupted
    async fn halted(&self) {
        tokio::select! {
            _ = self.aborted.cancelled() => {}
            _ = self.interrupted.cancelled() => {}
        }
    }

    fn not_run(&self) -> CheckOutcome {
        let cause = match self.resolver.foundational_failure() {
            Some(e) => e.to_string(),
            None if self.interrupted.is_cancelled() => "run interrupted".to_string(),
            None => "run aborted".to_string(),
        };
        CheckOutcome::major_problem(format!("Check not run: {}", cause))
    }
}

async fn run_section(run: Arc<RunState>, plan: SectionPlan) -> Option<SectionOutcome> {
    if let Some(skip) = plan.skip {
        let decision = match run.resolver.resolve_cheap(plan.skip_dependencies).await {
            Ok(deps) => skip(&deps),
            Err(e) => Err(e),
        };
        match decision {
            Ok(true) => {
                debug!("SKIPPED");
                return None;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "Section skip condition failed");
                return Some(failed_section(
                    &plan,
                    format!("Failed to evaluate skip condition of section {}: {}", plan.name, e),
                ));
            }
        }
    }

    let mut slots: Vec<(Arc<dyn Check>, Option<CheckOutcome>)> = Vec::with_capacity(plan.checks.len());
    for check in &plan.checks {
        let decided = match evaluate_check_skip(&run.resolver, check.as_ref()).await {
            Ok(true) => {
                debug!(check = check.name(), "SKIPPED");
                Some(CheckOutcome::Skipped)
            }
            Ok(false) => None,
            Err(e) => {
                warn!(check = check.name(), error = %e, "Check skip condition failed");
                Some(CheckOutcome::major_problem(format!(
                    "Failed to evaluate skip condition: {}",
                    e
                )))
            }
        };
        slots.push((check.clone(), decided));
    }

    if slots
        .iter()
        .all(|(_, decided)| matches!(decided, Some(CheckOutcome::Skipped)))
    {
        debug!("SKIPPED, no check applies");
        return None;
    }

    let keys: BTreeSet<DependencyKey> = plan
        .skip_dependencies
        .iter()
        .chain(
            slots
                .iter()
                .filter(|(_, decided)| decided.is_none())
                .flat_map(|(check, _)| check.dependencies().iter().chain(check.skip_dependencies())),
        )
        .copied()
        .collect();
    // A dropped resolution hands half-built workloads to background cleanup
    let (resolved, failures) = tokio::select! {
        biased;
        _ = run.interrupted.cancelled() => {
            return Some(failed_section(
                &plan,
                format!("Section {} interrupted before its checks ran", plan.name),
            ));
        }
        resolved = run.resolver.resolve_all(&keys) => resolved,
    };

    if !failures.is_empty() {
        let foundational = failures
            .iter()
            .find(|(_, e)| e.is_foundational())
            .map(|(_, e)| e.to_string())
            .or_else(|| run.resolver.foundational_failure().map(|e| e.to_string()));
        if let Some(cause) = foundational {
            if !run.aborted.is_cancelled() {
                error!(error = %cause, "Foundational dependency failed, aborting run");
                run.aborted.cancel();
            }
            return Some(provisioning_failure(&plan, &cause));
        }

        let pending: Vec<&Arc<dyn Check>> = slots
            .iter()
            .filter(|(_, decided)| decided.is_none())
            .map(|(check, _)| check)
            .collect();
        let shared = failures
            .iter()
            .find(|(key, _)| pending.iter().all(|c| c.dependencies().contains(key)));
        if let Some((_, e)) = shared {
            return Some(provisioning_failure(&plan, &e.to_string()));
        }

        for (check, decided) in slots.iter_mut().filter(|(_, d)| d.is_none()) {
            if let Some((_, e)) = failures
                .iter()
                .find(|(key, _)| check.dependencies().contains(key))
            {
                *decided = Some(CheckOutcome::major_problem(format!(
                    "Failed to provision resources: {}",
                    e
                )));
            }
        }
    }

    let resolved = Arc::new(resolved);
    let records = join_all(slots.into_iter().map(|(check, decided)| {
        let run = run.clone();
        let resolved = resolved.clone();
        async move {
            let outcome = match decided {
                Some(outcome) => outcome,
                None => invoke(&run, &check, &resolved).await,
            };
            CheckRecord {
                name: check.name().to_string(),
                description: check.description().to_string(),
                outcome,
            }
        }
    }))
    .await;

    Some(SectionOutcome::Completed {
        name: plan.name,
        description: plan.description,
        checks: records,
    })
}

async fn evaluate_check_skip(resolver: &Resolver, check: &dyn Check) -> compliance_common::Result<bool> {
    if check.skip_dependencies().is_empty() {
        return check.should_skip(&ResolvedDeps::default());
    }
    let deps = resolver.resolve_cheap(check.skip_dependencies()).await?;
    check.should_skip(&deps)
}

async fn invoke(run: &RunState, check: &Arc<dyn Check>, resolved: &ResolvedDeps) -> CheckOutcome {
    let name = check.name().to_string();

    let _exclusive: Option<OwnedMutexGuard<()>> = match check.exclusive_tag() {
        Some(tag) => {
            let lock = run.exclusive_lock(tag);
            tokio::select! {
                biased;
                _ = run.halted() => return run.not_run(),
                guard = lock.lock_owned() => Some(guard),
            }
        }
        None => None,
    };
    let _permit = tokio::select! {
        biased;
        _ = run.halted() => return run.not_run(),
        permit = run.limiter.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return run.not_run(),
        },
    };

    let deps = resolved.subset(check.dependencies().iter().chain(check.skip_dependencies()));
    let timeout = check.timeout().unwrap_or(run.check_timeout);
    let started = Instant::now();
    // Aborted on drop, so a dropped run stops its checks too
    let mut task = {
        let check = check.clone();
        let span = info_span!("check", check = %name);
        AbortOnDropHandle::new(tokio::spawn(
            async move { check.perform(&deps).await }.instrument(span),
        ))
    };

    let finished = tokio::select! {
        finished = tokio::time::timeout(timeout, &mut task) => Some(finished),
        _ = run.interrupted.cancelled() => None,
    };
    let outcome = match finished {
        Some(Ok(Ok(Ok(outcome)))) => outcome,
        Some(Ok(Ok(Err(e)))) => contain_error(&name, e),
        Some(Ok(Err(join_error))) => {
            error!(check = %name, error = %join_error, "Check panicked");
            CheckOutcome::major_problem(unexpected_error(&name))
        }
        Some(Err(_)) => {
            stop(task).await;
            warn!(check = %name, timeout = ?timeout, "Check timed out");
            CheckOutcome::major_problem(format!("Check {} timed out after {:?}", name, timeout))
        }
        None => {
            stop(task).await;
            warn!(check = %name, "Check interrupted");
            CheckOutcome::major_problem(format!("Check {} interrupted before it finished", name))
        }
    };

    log_outcome(&name, &outcome, started.elapsed());
    outcome
}

/// Abort a check and wait for it, so its dropped scopes have handed their
/// objects to background cleanup before the run shuts down.
async fn stop<T>(task: AbortOnDropHandle<T>) {
    task.abort();
    let _ = task.await;
}

/// Errors a check is expected to surface become its diagnostic. Anything
/// else is a fault: logged in full, reported generically.
fn contain_error(check: &str, error: Error) -> CheckOutcome {
    match error {
        e @ (Error::Acquisition { .. }
        | Error::DependencyResolution { .. }
        | Error::Timeout { .. }) => {
            warn!(check, error = %e, "Check hit a major problem");
            CheckOutcome::major_problem(e.to_string())
        }
        e => {
            error!(check, error = %e, "Check failed with an unexpected error");
            CheckOutcome::major_problem(unexpected_error(check))
        }
    }
}

fn unexpected_error(check: &str) -> String {
    format!("Check {} failed with an unexpected error", check)
}

fn log_outcome(check: &str, outcome: &CheckOutcome, elapsed: Duration) {
    match outcome {
        CheckOutcome::Completed {
            result,
            measured,
            expected,
        } => info!(
            check,
            measured = %measured,
            expected = %expected,
            elapsed = ?elapsed,
            "{}",
            if *result { "PASSED" } else { "FAILED" }
        ),
        CheckOutcome::Skipped => debug!(check, "SKIPPED"),
        CheckOutcome::MajorProblem { message } => {
            info!(check, major_problem = %message, elapsed = ?elapsed, "FAILED")
        }
    }
}

fn failed_section(plan: &SectionPlan, major_problem: String) -> SectionOutcome {
    SectionOutcome::Failed {
        name: plan.name.clone(),
        description: plan.description.clone(),
        major_problem,
    }
}

fn provisioning_failure(plan: &SectionPlan, cause: &str) -> SectionOutcome {
    warn!(error = %cause, "Section could not be provisioned");
    failed_section(
        plan,
        format!("Failed to provision resources for section {}: {}", plan.name, cause),
    )
}
