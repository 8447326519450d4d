use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::utils::write_json;
use crate::audit::{Actor, AuditEvent, AuditRecorder};
use crate::binder::{BindOutcome, DeferredEntry, DeferredQueue, ParameterBinder, Requeue};
use crate::config::WardenConfig;
use crate::container::{ContainerRuntime, ExecutorSettings, InflightRegistry, SandboxExecutor};
use crate::errors::{RetryConfig, WardenError};
use crate::extractor::FindingExtractor;
use crate::gate::{ApprovalQueue, Policy, RestraintGate};
use crate::models::{ExecutionResult, ExitStatus, Finding, GateOutcome, Invocation, Recommendation};
use crate::planner::{FailureNote, PlanRequest, Planner};
use crate::registry::ToolRegistry;
use super::events::RunEvent;
use super::ledger::FindingLedger;
use super::metrics::{compute_report, OutcomeCounts, RunReport};
use super::phase::PhaseDefinition;
use super::state::{PhaseRecord, Run, RunStatus};

/// Collaborators the controller drives. Tests swap in fakes.
pub struct EngineComponents {
    pub registry: Arc<ToolRegistry>,
    pub planner: Arc<dyn Planner>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub audit: Arc<AuditRecorder>,
    pub approvals: Arc<ApprovalQueue>,
}

enum Disposition {
    /// Blocked by the gate. Never reached the executor.
    Denied { reason: String },
    Executed { result: ExecutionResult, parse_failure: bool },
}

struct InvocationOutcome {
    invocation: Invocation,
    disposition: Disposition,
    findings: Vec<Finding>,
}

impl InvocationOutcome {
    fn failure_note(&self) -> Option<FailureNote> {
        let (status, reason) = match &self.disposition {
            Disposition::Denied { reason } => ("denied".to_string(), reason.clone()),
            Disposition::Executed { result, .. } if result.succeeded() => return None,
            Disposition::Executed { result, .. } => {
                let reason = result
                    .error
                    .clone()
                    .or_else(|| result.exit_code.map(|c| format!("exit code {}", c)))
                    .unwrap_or_default();
                (result.status.as_str().to_string(), reason)
            }
        };
        Some(FailureNote {
            invocation_id: self.invocation.id.clone(),
            tool: self.invocation.tool.clone(),
            status,
            reason,
        })
    }

    /// Tool error or timeout: the outcomes that trigger a fallback.
    fn failed_in_tool(&self) -> bool {
        matches!(
            &self.disposition,
            Disposition::Executed { result, .. }
                if matches!(result.status, ExitStatus::ToolError | ExitStatus::Timeout)
        )
    }
}

/// Gate, execute and extract one invocation. Runs inside a spawned task and
/// only returns results; the ledger stays with the controller.
struct Dispatcher {
    gate: Arc<RestraintGate>,
    executor: Arc<SandboxExecutor>,
    extractor: Arc<FindingExtractor>,
    audit: Arc<AuditRecorder>,
    event_tx: Option<mpsc::UnboundedSender<RunEvent>>,
    run: Arc<RwLock<Run>>,
    awaiting: AtomicUsize,
    target: String,
}

impl Dispatcher {
    fn emit(&self, event: RunEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn denied(&self, invocation: Invocation, reason: String) -> InvocationOutcome {
        info!(invocation = %invocation.id, tool = %invocation.tool, reason = %reason, "Invocation denied");
        self.emit(RunEvent::InvocationDenied {
            invocation_id: invocation.id.clone(),
            tool: invocation.tool.clone(),
            reason: reason.clone(),
        });
        InvocationOutcome { invocation, disposition: Disposition::Denied { reason }, findings: Vec::new() }
    }

    async fn set_awaiting(&self, entering: bool) {
        let now_waiting = if entering {
            self.awaiting.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.awaiting.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
        };
        let mut run = self.run.write().await;
        if run.status.is_terminal() {
            return;
        }
        run.status = if now_waiting > 0 { RunStatus::AwaitingApproval } else { RunStatus::Running };
    }

    async fn process(self: Arc<Self>, phase: String, invocation: Invocation, cancel: CancellationToken) -> InvocationOutcome {
        let phase = Some(phase.as_str());

        let decision = self.gate.evaluate(&invocation);
        self.audit.system(phase, AuditEvent::GateEvaluated { decision: decision.clone() }).await;

        match decision.outcome {
            GateOutcome::Allow => {}
            GateOutcome::Deny => return self.denied(invocation, decision.reason),
            GateOutcome::PendingApproval => {
                let (request, ticket) = match self.gate.request_approval(&invocation, &decision).await {
                    Ok(parked) => parked,
                    Err(e) => {
                        warn!(invocation = %invocation.id, error = %e, "Failed to park invocation for approval");
                        return self.denied(invocation, e.to_string());
                    }
                };
                self.audit.system(phase, AuditEvent::ApprovalRequested { request: request.clone() }).await;
                self.emit(RunEvent::ApprovalRequested { request });

                self.set_awaiting(true).await;
                let resolution = self.gate.wait_for_decision(ticket, &cancel).await;
                self.set_awaiting(false).await;

                let actor = resolution.actor().map(Actor::human).unwrap_or(Actor::System);
                self.audit.record(phase, actor, AuditEvent::ApprovalResolved {
                    invocation_id: invocation.id.clone(),
                    approved: resolution.is_approved(),
                    reason: resolution.reason().to_string(),
                }).await;
                self.emit(RunEvent::ApprovalResolved {
                    invocation_id: invocation.id.clone(),
                    approved: resolution.is_approved(),
                    reason: resolution.reason().to_string(),
                });

                let settled = self.gate.settle(&invocation, &resolution);
                self.audit.system(phase, AuditEvent::GateEvaluated { decision: settled.clone() }).await;
                if !settled.is_allowed() {
                    return self.denied(invocation, settled.reason);
                }
            }
        }

        let subject = invocation.subject_or(&self.target);
        self.audit.system(phase, AuditEvent::InvocationStarted {
            invocation_id: invocation.id.clone(),
            tool: invocation.tool.clone(),
        }).await;
        self.emit(RunEvent::InvocationStarted {
            invocation_id: invocation.id.clone(),
            tool: invocation.tool.clone(),
            subject,
        });

        let result = self.executor.execute(&invocation, &cancel).await;
        self.audit.system(phase, AuditEvent::InvocationCompleted { result: result.clone() }).await;

        let extraction = self.extractor.extract(&invocation, &result, &self.target);
        if let Some(reason) = &extraction.parse_failure {
            warn!(invocation = %invocation.id, tool = %invocation.tool, reason = %reason, "Parse failure");
            self.audit.system(phase, AuditEvent::ParseFailure {
                invocation_id: invocation.id.clone(),
                tool: invocation.tool.clone(),
                reason: reason.clone(),
            }).await;
        }
        if result.status.has_parseable_output() {
            self.audit.system(phase, AuditEvent::FindingsExtracted {
                invocation_id: invocation.id.clone(),
                count: extraction.findings.len(),
                skipped: extraction.skipped,
            }).await;
        }

        self.emit(RunEvent::InvocationCompleted {
            invocation_id: invocation.id.clone(),
            tool: invocation.tool.clone(),
            status: result.status,
            duration_ms: result.duration_ms,
            findings: extraction.findings.len(),
        });

        InvocationOutcome {
            invocation,
            disposition: Disposition::Executed { result, parse_failure: extraction.parse_failure.is_some() },
            findings: extraction.findings,
        }
    }
}

enum Pending {
    Fresh(Recommendation),
    Retry(DeferredEntry),
}

impl Pending {
    fn recommendation(&self) -> &Recommendation {
        match self {
            Pending::Fresh(rec) => rec,
            Pending::Retry(entry) => &entry.recommendation,
        }
    }
}

/// Carried across the rounds of one phase.
struct PhaseState {
    deferred: DeferredQueue,
    failures: Vec<FailureNote>,
    fallbacks: Vec<Recommendation>,
}

#[derive(Default)]
struct Round {
    invocations: Vec<Invocation>,
    /// Fallback per recommendation id bound this round.
    fallback_of: HashMap<String, Recommendation>,
}

enum PhaseEnd {
    Closed,
    Cancelled,
    PlannerFailed(WardenError),
}

/// Drives a run through its phases:
/// planner -> binder -> gate -> executor -> extractor -> exit predicate.
pub struct PhaseController {
    run: Arc<RwLock<Run>>,
    phases: Vec<PhaseDefinition>,
    planner: Arc<dyn Planner>,
    binder: ParameterBinder,
    gate: Arc<RestraintGate>,
    executor: Arc<SandboxExecutor>,
    extractor: Arc<FindingExtractor>,
    audit: Arc<AuditRecorder>,
    ledger: FindingLedger,
    outcomes: OutcomeCounts,
    cancel_token: CancellationToken,
    event_tx: Option<mpsc::UnboundedSender<RunEvent>>,
    max_defer_ticks: u32,
    /// Recommendation ids taken so far; invocation ids derive from them.
    recommendation_ids: HashSet<String>,
}

impl PhaseController {
    pub fn new(config: &WardenConfig, run: Run, components: EngineComponents) -> Self {
        let EngineComponents { registry, planner, runtime, audit, approvals } = components;
        let engine = &config.engine;

        let policy = Policy::new(config.policy.clone(), &run.target);
        let gate = Arc::new(RestraintGate::new(policy, Arc::clone(&registry), approvals));
        let settings = ExecutorSettings {
            max_concurrent: engine.max_concurrent_containers,
            output_cap: engine.output_cap_bytes,
            termination_grace: Duration::from_secs(engine.termination_grace_secs),
            retry: RetryConfig {
                max_retries: engine.infrastructure_retries,
                base_delay: Duration::from_millis(engine.retry_base_delay_ms),
                ..Default::default()
            },
            run_id: run.id.clone(),
        };
        let executor = Arc::new(SandboxExecutor::new(runtime, Arc::clone(&registry), settings));
        let extractor = Arc::new(FindingExtractor::new(Arc::clone(&registry)));

        Self {
            run: Arc::new(RwLock::new(run)),
            phases: config.phases.clone(),
            planner,
            binder: ParameterBinder::new(registry, engine.max_fanout),
            gate,
            executor,
            extractor,
            audit,
            ledger: FindingLedger::new(),
            outcomes: OutcomeCounts::default(),
            cancel_token: CancellationToken::new(),
            event_tx: None,
            max_defer_ticks: engine.max_defer_ticks,
            recommendation_ids: HashSet::new(),
        }
    }

    /// Replace the controller's cancel token with an external one (e.g. from a Ctrl-C handler).
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Attach an event channel for streaming run progress.
    pub fn with_event_channel(mut self, tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn state(&self) -> Arc<RwLock<Run>> {
        Arc::clone(&self.run)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// In-flight containers, for addressed termination of a single invocation.
    pub fn inflight(&self) -> Arc<InflightRegistry> {
        Arc::clone(self.executor.inflight())
    }

    fn emit(&self, event: RunEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// Run every phase to completion, failure or cancellation. Only failing
    /// to persist the final artifacts is an error; run outcomes are reported
    /// through [`RunReport::status`].
    pub async fn run(mut self) -> Result<RunReport, WardenError> {
        let (run_id, target, intent) = {
            let run = self.run.read().await;
            (run.id.clone(), run.target.clone(), run.intent.clone())
        };
        info!(run_id = %run_id, target = %target, phases = self.phases.len(), "Run started");

        self.audit.system(None, AuditEvent::RunStarted {
            target: target.clone(),
            intent: intent.clone(),
            phases: self.phases.iter().map(|p| p.name.clone()).collect(),
            policy_version: self.gate.policy().version().to_string(),
        }).await;
        self.emit(RunEvent::RunStarted { run_id: run_id.clone(), target: target.clone() });

        let dispatcher = Arc::new(Dispatcher {
            gate: Arc::clone(&self.gate),
            executor: Arc::clone(&self.executor),
            extractor: Arc::clone(&self.extractor),
            audit: Arc::clone(&self.audit),
            event_tx: self.event_tx.clone(),
            run: Arc::clone(&self.run),
            awaiting: AtomicUsize::new(0),
            target: target.clone(),
        });

        let mut status = RunStatus::Completed;
        let mut failure: Option<WardenError> = None;
        let phases = self.phases.clone();
        for phase in &phases {
            if self.cancel_token.is_cancelled() {
                status = RunStatus::Cancelled;
                break;
            }
            match self.run_phase(phase, &dispatcher, &run_id, &target, &intent).await {
                PhaseEnd::Closed => {}
                PhaseEnd::Cancelled => {
                    status = RunStatus::Cancelled;
                    break;
                }
                PhaseEnd::PlannerFailed(e) => {
                    status = RunStatus::Failed;
                    failure = Some(e);
                    break;
                }
            }
        }

        // a cancel that lands after the last phase closed still interrupted work
        if status == RunStatus::Completed && self.cancel_token.is_cancelled() {
            status = RunStatus::Cancelled;
        }

        {
            let mut run = self.run.write().await;
            if let Some(e) = &failure {
                run.error = Some(e.to_string());
                run.error_type = Some(e.classify().error_type.to_string());
            } else if status == RunStatus::Cancelled {
                run.error = Some("Run cancelled".to_string());
            }
            run.finish(status);
        }

        match status {
            RunStatus::Completed => info!(run_id = %run_id, findings = self.ledger.len(), "Run completed"),
            RunStatus::Cancelled => info!(run_id = %run_id, "Run cancelled"),
            _ => error!(run_id = %run_id, "Run failed"),
        }
        self.audit.system(None, AuditEvent::RunFinished {
            status: status.as_str().to_string(),
            findings: self.ledger.len(),
        }).await;
        self.emit(RunEvent::RunFinished { status, findings: self.ledger.len() });

        let report = {
            let run = self.run.read().await;
            compute_report(&run, &self.ledger, &self.outcomes)
        };
        self.write_artifacts(&report).await?;
        Ok(report)
    }

    async fn write_artifacts(&self, report: &RunReport) -> Result<(), WardenError> {
        let Some(dir) = self.audit.base_dir() else {
            return Ok(());
        };
        let findings_path = dir.join("findings.json");
        write_json(&findings_path, self.ledger.as_slice()).await?;
        info!(path = %findings_path.display(), count = self.ledger.len(), "Wrote findings.json");

        let report_path = dir.join("report.json");
        write_json(&report_path, report).await?;
        info!(path = %report_path.display(), assessment = ?report.assessment, "Wrote report.json");
        Ok(())
    }

    async fn run_phase(
        &mut self,
        phase: &PhaseDefinition,
        dispatcher: &Arc<Dispatcher>,
        run_id: &str,
        target: &str,
        intent: &str,
    ) -> PhaseEnd {
        let name = phase.name.as_str();
        let mut record = PhaseRecord::open(name);
        self.run.write().await.current_phase = Some(name.to_string());

        info!(phase = name, budget = phase.budget, "Phase started");
        self.audit.system(Some(name), AuditEvent::PhaseEntered { budget: phase.budget }).await;
        self.emit(RunEvent::PhaseStarted {
            phase: name.to_string(),
            display_name: phase.display_name().to_string(),
        });

        let mut state = PhaseState {
            deferred: DeferredQueue::new(self.max_defer_ticks),
            failures: Vec::new(),
            fallbacks: Vec::new(),
        };
        let mut end = PhaseEnd::Closed;

        while record.iterations < phase.budget {
            if self.cancel_token.is_cancelled() {
                end = PhaseEnd::Cancelled;
                break;
            }

            let request = PlanRequest {
                run_id: run_id.to_string(),
                phase: name.to_string(),
                target: target.to_string(),
                intent: intent.to_string(),
                iteration: record.iterations,
                findings: self.ledger.as_slice().to_vec(),
                failures: std::mem::take(&mut state.failures),
            };
            self.audit.system(Some(name), AuditEvent::PlannerRequested {
                iteration: request.iteration,
                findings: request.findings.len(),
                failures: request.failures.len(),
            }).await;

            let proposed = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    end = PhaseEnd::Cancelled;
                    break;
                }
                proposed = self.planner.propose(&request) => proposed,
            };
            record.iterations += 1;

            let recommendations = match proposed {
                Ok(recs) => recs,
                Err(e) => {
                    let e = match e {
                        WardenError::PlannerUnavailable(_) => e,
                        other => WardenError::PlannerUnavailable(other.to_string()),
                    };
                    error!(phase = name, planner = self.planner.name(), error = %e, "Planner unavailable");
                    self.audit.record(Some(name), Actor::Planner, AuditEvent::PlannerFailed {
                        error: e.to_string(),
                    }).await;
                    end = PhaseEnd::PlannerFailed(e);
                    break;
                }
            };
            let planner_had_nothing = recommendations.is_empty();
            let mut received = Vec::with_capacity(recommendations.len());
            for rec in recommendations {
                received.push(self.claim_id(name, rec).await);
            }
            let recommendations = received;
            for rec in &recommendations {
                record.recommendations.push(rec.id.clone());
                self.audit.record(Some(name), Actor::Planner, AuditEvent::RecommendationReceived {
                    recommendation: rec.clone(),
                }).await;
            }

            // deferred recommendations get first pick of the new findings
            let snapshot = self.ledger.snapshot();
            let mut round = Round::default();
            for entry in state.deferred.take() {
                self.bind_pending(name, Pending::Retry(entry), &snapshot, &mut state, &mut round).await;
            }
            let mut fallbacks = Vec::with_capacity(state.fallbacks.len());
            for fallback in std::mem::take(&mut state.fallbacks) {
                let fallback = self.claim_id(name, fallback).await;
                record.recommendations.push(fallback.id.clone());
                fallbacks.push(fallback);
            }
            for rec in recommendations.into_iter().chain(fallbacks) {
                self.bind_pending(name, Pending::Fresh(rec), &snapshot, &mut state, &mut round).await;
            }

            // stable: planner order is kept within a priority
            round.invocations.sort_by_key(|inv| inv.priority.rank());
            record.invocations.extend(round.invocations.iter().map(|inv| inv.id.clone()));
            let dispatched = round.invocations.len();
            debug!(phase = name, iteration = record.iterations, invocations = dispatched, "Dispatching round");

            let outcomes = self.dispatch(dispatcher, name, round.invocations, &mut record).await;
            self.schedule_fallbacks(name, &outcomes, round.fallback_of, &mut state).await;
            state.failures = outcomes.iter().filter_map(InvocationOutcome::failure_note).collect();

            if self.cancel_token.is_cancelled() {
                end = PhaseEnd::Cancelled;
                break;
            }
            if phase.exit.evaluate(self.ledger.as_slice()) {
                break;
            }
            if planner_had_nothing && dispatched == 0 && state.deferred.is_empty() && state.fallbacks.is_empty() {
                info!(phase = name, iteration = record.iterations, "Planner has nothing further for this phase");
                break;
            }
        }

        // last chance for deferred entries against findings from the final round
        if matches!(end, PhaseEnd::Closed) && !state.deferred.is_empty() {
            let snapshot = self.ledger.snapshot();
            let mut round = Round::default();
            for entry in state.deferred.take() {
                self.bind_pending(name, Pending::Retry(entry), &snapshot, &mut state, &mut round).await;
            }
            if !round.invocations.is_empty() {
                round.invocations.sort_by_key(|inv| inv.priority.rank());
                record.invocations.extend(round.invocations.iter().map(|inv| inv.id.clone()));
                debug!(phase = name, invocations = round.invocations.len(), "Dispatching deferred invocations before close");
                // fallbacks of this round are dropped with the phase
                self.dispatch(dispatcher, name, round.invocations, &mut record).await;
                if self.cancel_token.is_cancelled() {
                    end = PhaseEnd::Cancelled;
                }
            }
        }

        for entry in state.deferred.take() {
            self.outcomes.unresolvable += 1;
            self.audit.system(Some(name), AuditEvent::ReferenceUnresolvable {
                recommendation_id: entry.recommendation.id.clone(),
                missing: entry.missing.iter().map(ToString::to_string).collect(),
                ticks: entry.ticks,
            }).await;
        }

        let exit_satisfied = phase.exit.evaluate(self.ledger.as_slice());
        record.close(exit_satisfied);
        if record.incomplete {
            warn!(phase = name, iterations = record.iterations, "Phase closed without meeting its exit condition");
        } else {
            info!(phase = name, iterations = record.iterations, "Phase complete");
        }
        self.audit.system(Some(name), AuditEvent::PhaseClosed {
            iterations: record.iterations,
            exit_satisfied,
            incomplete: record.incomplete,
        }).await;
        self.emit(RunEvent::PhaseCompleted {
            phase: name.to_string(),
            display_name: phase.display_name().to_string(),
            incomplete: record.incomplete,
        });
        self.run.write().await.phases.push(record);

        end
    }

    /// Keep recommendation ids unique across the run so invocation ids,
    /// approvals and audit entries never alias. A reused id gets a suffix.
    async fn claim_id(&mut self, phase: &str, mut rec: Recommendation) -> Recommendation {
        if self.recommendation_ids.insert(rec.id.clone()) {
            return rec;
        }
        let original = rec.id.clone();
        let mut n = 2;
        let assigned = loop {
            let candidate = format!("{}-{}", original, n);
            if self.recommendation_ids.insert(candidate.clone()) {
                break candidate;
            }
            n += 1;
        };
        warn!(recommendation = %original, assigned = %assigned, "Duplicate recommendation id");
        self.audit.system(Some(phase), AuditEvent::RecommendationRenamed {
            original_id: original,
            assigned_id: assigned.clone(),
        }).await;
        rec.id = assigned;
        rec
    }

    async fn bind_pending(
        &mut self,
        phase: &str,
        pending: Pending,
        snapshot: &[Finding],
        state: &mut PhaseState,
        round: &mut Round,
    ) {
        let outcome = self.binder.bind(pending.recommendation(), snapshot);
        let rec_id = pending.recommendation().id.clone();

        match outcome {
            BindOutcome::Bound { invocations, truncated } => {
                if truncated > 0 {
                    warn!(recommendation = %rec_id, emitted = invocations.len(), dropped = truncated, "Fan-out truncated");
                    self.audit.system(Some(phase), AuditEvent::FanOutTruncated {
                        recommendation_id: rec_id.clone(),
                        emitted: invocations.len(),
                        dropped: truncated,
                    }).await;
                }
                for invocation in &invocations {
                    self.audit.system(Some(phase), AuditEvent::InvocationBound { invocation: invocation.clone() }).await;
                }
                if let Some(fallback) = &pending.recommendation().fallback {
                    round.fallback_of.insert(rec_id, (**fallback).clone());
                }
                round.invocations.extend(invocations);
            }
            BindOutcome::Deferred { missing } => {
                let missing_text: Vec<String> = missing.iter().map(ToString::to_string).collect();
                match pending {
                    Pending::Fresh(rec) => {
                        debug!(recommendation = %rec_id, missing = ?missing_text, "Binding deferred");
                        state.deferred.defer(rec, missing);
                        self.audit.system(Some(phase), AuditEvent::BindingDeferred {
                            recommendation_id: rec_id,
                            missing: missing_text,
                            ticks: 0,
                        }).await;
                    }
                    Pending::Retry(entry) => {
                        let ticks = entry.ticks + 1;
                        match state.deferred.requeue(entry, missing) {
                            Requeue::Waiting => {
                                self.audit.system(Some(phase), AuditEvent::BindingDeferred {
                                    recommendation_id: rec_id,
                                    missing: missing_text,
                                    ticks,
                                }).await;
                            }
                            Requeue::Unresolvable(entry) => {
                                warn!(recommendation = %rec_id, missing = ?missing_text, "Reference unresolvable");
                                self.outcomes.unresolvable += 1;
                                self.audit.system(Some(phase), AuditEvent::ReferenceUnresolvable {
                                    recommendation_id: rec_id,
                                    missing: missing_text,
                                    ticks: entry.ticks,
                                }).await;
                            }
                        }
                    }
                }
            }
            BindOutcome::Rejected(e) => {
                let classification = e.classify();
                warn!(recommendation = %rec_id, error_type = classification.error_type, error = %e, "Recommendation rejected");
                self.outcomes.rejected += 1;
                self.audit.system(Some(phase), AuditEvent::RecommendationRejected {
                    recommendation_id: rec_id,
                    tool: pending.recommendation().tool.clone(),
                    error_type: classification.error_type.to_string(),
                    reason: e.to_string(),
                }).await;
            }
        }
    }

    /// Run one round concurrently, absorbing each outcome as it lands.
    async fn dispatch(
        &mut self,
        dispatcher: &Arc<Dispatcher>,
        phase: &str,
        invocations: Vec<Invocation>,
        record: &mut PhaseRecord,
    ) -> Vec<InvocationOutcome> {
        let mut tasks = JoinSet::new();
        for invocation in invocations {
            let dispatcher = Arc::clone(dispatcher);
            let cancel = self.cancel_token.clone();
            tasks.spawn(dispatcher.process(phase.to_string(), invocation, cancel));
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    self.absorb(phase, &outcome, record).await;
                    outcomes.push(outcome);
                }
                Err(e) => {
                    error!(phase, error = %e, "Invocation task failed");
                    self.audit.system(Some(phase), AuditEvent::Warning {
                        message: format!("Invocation task failed: {}", e),
                    }).await;
                }
            }
        }
        outcomes
    }

    async fn absorb(&mut self, phase: &str, outcome: &InvocationOutcome, record: &mut PhaseRecord) {
        match &outcome.disposition {
            Disposition::Denied { .. } => self.outcomes.denied += 1,
            Disposition::Executed { result, parse_failure } => {
                self.outcomes.record_status(result.status);
                if *parse_failure {
                    self.outcomes.parse_failures += 1;
                }
            }
        }

        let fresh = self.ledger.admit_all(outcome.findings.clone());
        record.findings_added += fresh.len();
        for finding in fresh {
            debug!(tool = %finding.tool, subject = %finding.subject, kind = %finding.finding_type, "Finding recorded");
            self.audit.system(Some(phase), AuditEvent::FindingRecorded { finding: finding.clone() }).await;
            self.emit(RunEvent::FindingDiscovered { finding });
        }
    }

    /// A fallback is bound next round when every invocation of its
    /// recommendation ended in a tool error or timeout.
    async fn schedule_fallbacks(
        &self,
        phase: &str,
        outcomes: &[InvocationOutcome],
        fallback_of: HashMap<String, Recommendation>,
        state: &mut PhaseState,
    ) {
        for (rec_id, fallback) in fallback_of {
            let failed: Vec<bool> = outcomes.iter()
                .filter(|o| o.invocation.recommendation_id == rec_id)
                .map(InvocationOutcome::failed_in_tool)
                .collect();
            if !failed.is_empty() && failed.iter().all(|f| *f) {
                info!(recommendation = %rec_id, fallback = %fallback.id, tool = %fallback.tool, "Scheduling fallback");
                self.audit.system(Some(phase), AuditEvent::FallbackScheduled {
                    recommendation_id: rec_id,
                    fallback_id: fallback.id.clone(),
                }).await;
                state.fallbacks.push(fallback);
            }
        }
    }
}
