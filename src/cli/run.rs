use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit::AuditRecorder;
use crate::cli::approvals::prompt_loop;
use crate::cli::commands::{ApprovalMode, RunArgs};
use crate::config::WardenConfig;
use crate::container::DockerRuntime;
use crate::errors::WardenError;
use crate::gate::{ApprovalQueue, ApprovalRequest};
use crate::pipeline::{new_run_id, EngineComponents, PhaseController, Run, RunEvent, RunReport};
use crate::planner::{HttpPlanner, Planner, ScriptedPlanner};

pub async fn handle_run(args: RunArgs) -> Result<RunReport, WardenError> {
    let config = super::load_config(args.config.as_deref()).await?;

    let target = args.target.clone()
        .or_else(|| config.run.target.clone())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| WardenError::Config("No target given: pass --target or set run.target".into()))?;
    let intent = args.intent.clone().or_else(|| config.run.intent.clone()).unwrap_or_default();
    let output_dir = args.output.as_ref().map(PathBuf::from).unwrap_or_else(|| config.output.directory.clone());
    let run_id = args.run_id.clone().unwrap_or_else(new_run_id);

    info!(run_id = %run_id, target = %target, "Starting run");

    let registry = Arc::new(super::build_registry(&config, args.tools_dir.as_deref())?);
    let planner = build_planner(&args, &config).await?;
    info!(planner = planner.name(), tools = registry.len(), "Engine configured");

    let docker = DockerRuntime::connect()?;
    docker.ping().await?;

    let audit = Arc::new(AuditRecorder::initialize(&output_dir, &run_id).await?);
    let run_dir = output_dir.join(&run_id);
    let approvals = Arc::new(ApprovalQueue::with_snapshot(run_dir.join("approvals.json")));

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling run; waiting for running containers to stop...");
                cancel.cancel();
            }
        })
    };

    let (approval_tx, approval_rx) = mpsc::unbounded_channel::<ApprovalRequest>();
    let prompt = match args.approvals {
        ApprovalMode::Prompt => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            Some(tokio::spawn(prompt_loop(approval_rx, Arc::clone(&approvals), args.actor.clone(), stdin)))
        }
        ApprovalMode::None => None,
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<RunEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let RunEvent::ApprovalRequested { request } = &event {
                let _ = approval_tx.send(request.clone());
            }
            if let Some(line) = render_event(&event) {
                println!("{}", line);
            }
        }
    });

    let components = EngineComponents {
        registry,
        planner,
        runtime: Arc::new(docker),
        audit,
        approvals,
    };
    let controller = PhaseController::new(&config, Run::new(&run_id, &target, &intent), components)
        .with_cancel_token(cancel)
        .with_event_channel(event_tx);

    let result = controller.run().await;

    if let Err(e) = printer.await {
        warn!(error = %e, "Event printer task failed");
    }
    if let Some(prompt) = prompt {
        prompt.abort();
    }
    ctrl_c.abort();

    let report = result?;
    println!("{}", render_summary(&report, &run_dir));
    Ok(report)
}

async fn build_planner(args: &RunArgs, config: &WardenConfig) -> Result<Arc<dyn Planner>, WardenError> {
    if let Some(plan) = &args.plan {
        return Ok(Arc::new(ScriptedPlanner::from_file(&PathBuf::from(plan)).await?));
    }
    if let Some(url) = &args.planner_url {
        return Ok(Arc::new(HttpPlanner::new(url, &config.planner)?));
    }
    if let Some(plan) = &config.planner.plan_file {
        return Ok(Arc::new(ScriptedPlanner::from_file(plan).await?));
    }
    if let Some(url) = &config.planner.endpoint {
        return Ok(Arc::new(HttpPlanner::new(url, &config.planner)?));
    }
    Err(WardenError::Config(
        "No planner configured: pass --plan or --planner-url, or set planner.plan_file / planner.endpoint".into(),
    ))
}

pub fn render_event(event: &RunEvent) -> Option<String> {
    let line = match event {
        RunEvent::RunStarted { run_id, target } => format!("\n> Run {} against {}", run_id, target),
        RunEvent::PhaseStarted { display_name, .. } => format!("\n--- {} ---", display_name),
        RunEvent::PhaseCompleted { display_name, incomplete, .. } => {
            if *incomplete {
                format!("  ! {} closed without meeting its exit condition", display_name)
            } else {
                format!("  + {} complete", display_name)
            }
        }
        RunEvent::InvocationStarted { tool, subject, .. } => format!("  ~ {} {}", tool, subject),
        RunEvent::InvocationCompleted { tool, status, duration_ms, findings, .. } => format!(
            "  {} {} [{}] {} finding(s) in {:.1}s",
            if status.has_parseable_output() { "+" } else { "x" },
            tool,
            status,
            findings,
            *duration_ms as f64 / 1000.0,
        ),
        RunEvent::InvocationDenied { tool, reason, .. } => format!("  x {} denied ({})", tool, reason),
        RunEvent::FindingDiscovered { finding } => format!(
            "    [{}] {} {}",
            finding.severity.as_str().to_uppercase(),
            finding.finding_type,
            finding.subject,
        ),
        // prompting is handled separately
        RunEvent::ApprovalRequested { .. } => return None,
        RunEvent::ApprovalResolved { approved, reason, .. } => {
            format!("  {} approval {}", if *approved { "+" } else { "x" }, reason)
        }
        RunEvent::RunFinished { status, findings } => format!("\n> Run {} with {} finding(s)", status, findings),
    };
    Some(line)
}

pub fn render_summary(report: &RunReport, run_dir: &std::path::Path) -> String {
    let mut out = String::new();
    out.push_str(&format!("\nStatus:     {}\n", report.status));
    if let Some(error) = &report.error {
        out.push_str(&format!("Error:      {}\n", error));
    }
    out.push_str(&format!("Assessment: {}\n", report.assessment.as_str()));
    out.push_str(&format!("Findings:   {}", report.total_findings));
    if !report.findings_by_severity.is_empty() {
        let parts: Vec<String> = report.findings_by_severity.iter().map(|(s, n)| format!("{} {}", n, s)).collect();
        out.push_str(&format!(" ({})", parts.join(", ")));
    }
    out.push('\n');
    let outcomes = &report.outcomes;
    out.push_str(&format!(
        "Executed:   {} ({} ok, {} tool error, {} timeout, {} infrastructure, {} cancelled), {} denied\n",
        outcomes.executed(),
        outcomes.success,
        outcomes.tool_error,
        outcomes.timeout,
        outcomes.infrastructure_error,
        outcomes.cancelled,
        outcomes.denied,
    ));
    let incomplete = report.incomplete_phases();
    if !incomplete.is_empty() {
        out.push_str(&format!("Incomplete: {}\n", incomplete.join(", ")));
    }
    out.push_str(&format!("Artifacts:  {}", run_dir.display()));
    out
}
