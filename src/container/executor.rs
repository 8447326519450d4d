//! Sandbox executor: one invocation, one isolated container, one result.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{with_retry, RetryConfig};
use crate::models::{ExecutionResult, ExitStatus, Invocation};
use crate::registry::{ToolRegistry, ToolSpec};
use super::inflight::InflightRegistry;
use super::output::BoundedBuffer;
use super::runtime::{ContainerRuntime, ContainerSpec};

/// Time allowed to drain buffered logs after the container exits.
const LOG_DRAIN: Duration = Duration::from_secs(2);
const TERMINATION_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub max_concurrent: usize,
    pub output_cap: usize,
    pub termination_grace: Duration,
    pub retry: RetryConfig,
    /// Added as a label on every container.
    pub run_id: String,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            output_cap: 256 * 1024,
            termination_grace: Duration::from_secs(10),
            retry: RetryConfig::default(),
            run_id: String::new(),
        }
    }
}

enum Ended {
    Exited(Result<i64, crate::errors::WardenError>),
    TimedOut,
    Cancelled,
}

/// Holds a scratch lock; drops the map entry once nobody else wants it.
struct ScratchGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct SandboxExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<ToolRegistry>,
    slots: Arc<Semaphore>,
    scratch_locks: DashMap<String, Arc<Mutex<()>>>,
    inflight: Arc<InflightRegistry>,
    settings: ExecutorSettings,
}

impl SandboxExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, registry: Arc<ToolRegistry>, settings: ExecutorSettings) -> Self {
        Self {
            runtime,
            registry,
            slots: Arc::new(Semaphore::new(settings.max_concurrent.max(1))),
            scratch_locks: DashMap::new(),
            inflight: Arc::new(InflightRegistry::new()),
            settings,
        }
    }

    pub fn inflight(&self) -> &Arc<InflightRegistry> {
        &self.inflight
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Run one invocation to completion. Never fails: every outcome is
    /// reported through the returned [`ExecutionResult`].
    pub async fn execute(&self, invocation: &Invocation, cancel: &CancellationToken) -> ExecutionResult {
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;

        let spec = match self.registry.lookup(&invocation.tool) {
            Ok(spec) => spec,
            Err(e) => return ExecutionResult::infrastructure_error(&invocation.id, e.to_string(), 0, elapsed()),
        };
        let cmd = match spec.render_command(&invocation.arguments) {
            Ok(cmd) => cmd,
            Err(e) => {
                return ExecutionResult {
                    status: ExitStatus::ToolError,
                    ..ExecutionResult::infrastructure_error(&invocation.id, e.to_string(), 0, elapsed())
                };
            }
        };

        // scratch lock before a slot so waiting invocations do not hold capacity
        let _scratch = if spec.scratch_volume {
            let key = scratch_key(spec, invocation);
            let lock = self.scratch_lock(&key);
            tokio::select! {
                guard = lock.lock_owned() => Some(ScratchGuard { guard: Some(guard), key, locks: &self.scratch_locks }),
                _ = cancel.cancelled() => return ExecutionResult::cancelled(&invocation.id, elapsed()),
            }
        } else {
            None
        };

        let _permit = tokio::select! {
            permit = self.slots.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => return ExecutionResult::infrastructure_error(
                    &invocation.id, "Container pool closed".to_string(), 0, elapsed(),
                ),
            },
            _ = cancel.cancelled() => return ExecutionResult::cancelled(&invocation.id, elapsed()),
        };

        let token = self.inflight.register(&invocation.id, &spec.name, cancel);
        let container = self.container_spec(spec, invocation, cmd);

        // one wall clock for the invocation, across relaunches
        let deadline = tokio::time::sleep(Duration::from_secs(invocation.timeout_secs));
        tokio::pin!(deadline);

        // launch failures and lost waits share one attempt budget
        let retry = &self.settings.retry;
        let max_attempts = retry.max_retries + 1;
        let mut attempts = 0;
        let (container_id, ended, buffer) = loop {
            let launch_retry = RetryConfig { max_retries: max_attempts - attempts - 1, ..retry.clone() };
            let launch = with_retry("container launch", &launch_retry, || self.runtime.launch(&container));
            let (launched, tries) = tokio::select! {
                outcome = launch => outcome,
                _ = token.cancelled() => {
                    self.inflight.reap(&invocation.id);
                    return ExecutionResult::cancelled(&invocation.id, elapsed());
                }
            };
            attempts += tries;
            let container_id = match launched {
                Ok(id) => id,
                Err(e) => {
                    self.inflight.reap(&invocation.id);
                    warn!(invocation = %invocation.id, tool = %spec.name, attempts, error = %e, "Container launch failed");
                    return ExecutionResult::infrastructure_error(&invocation.id, e.to_string(), attempts, elapsed());
                }
            };
            self.inflight.attach(&invocation.id, &container_id);
            debug!(invocation = %invocation.id, container = %container_id, attempt = attempts, "Invocation running");

            let (ended, buffer) = self.monitor(invocation, &container_id, &token, deadline.as_mut()).await;
            match ended {
                Ended::Exited(Err(e)) if attempts < max_attempts && e.classify().retryable => {
                    let delay = retry.retry_delay(attempts - 1);
                    warn!(
                        invocation = %invocation.id,
                        container = %container_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Lost track of container, relaunching"
                    );
                    if let Err(e) = self.runtime.remove(&container_id).await {
                        warn!(container = %container_id, error = %e, "Failed to remove container");
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => {
                            self.inflight.reap(&invocation.id);
                            return ExecutionResult::cancelled(&invocation.id, elapsed());
                        }
                    }
                }
                ended => break (container_id, ended, buffer),
            }
        };

        let mut termination_confirmed = None;
        let (status, exit_code, error) = match ended {
            Ended::Exited(Ok(code)) => {
                let status = if code == 0 { ExitStatus::Success } else { ExitStatus::ToolError };
                (status, Some(code), None)
            }
            Ended::Exited(Err(e)) => (ExitStatus::InfrastructureError, None, Some(e.to_string())),
            Ended::TimedOut => {
                termination_confirmed = Some(self.terminate(&invocation.id, &container_id).await);
                let msg = format!("Timed out after {}s", invocation.timeout_secs);
                (ExitStatus::Timeout, None, Some(msg))
            }
            Ended::Cancelled => {
                termination_confirmed = Some(self.terminate(&invocation.id, &container_id).await);
                (ExitStatus::Cancelled, None, Some("Cancelled while running".to_string()))
            }
        };

        if let Err(e) = self.runtime.remove(&container_id).await {
            warn!(container = %container_id, error = %e, "Failed to remove container");
        }
        self.inflight.reap(&invocation.id);

        let (output, truncated_bytes) = buffer.finish();
        let result = ExecutionResult {
            invocation_id: invocation.id.clone(),
            status,
            exit_code,
            output,
            truncated_bytes,
            duration_ms: elapsed(),
            attempts,
            termination_confirmed,
            error,
        };
        info!(
            invocation = %invocation.id,
            tool = %spec.name,
            status = %result.status,
            duration_ms = result.duration_ms,
            "Invocation finished"
        );
        result
    }

    /// Stream output until the container exits, the deadline passes or the
    /// invocation is cancelled.
    async fn monitor(
        &self,
        invocation: &Invocation,
        container_id: &str,
        token: &CancellationToken,
        mut deadline: Pin<&mut Sleep>,
    ) -> (Ended, BoundedBuffer) {
        let mut buffer = BoundedBuffer::new(self.settings.output_cap);
        let mut logs = self.runtime.logs(container_id);
        let mut logs_open = true;

        let ended = {
            let exit = self.runtime.wait(container_id);
            tokio::pin!(exit);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break Ended::Cancelled,
                    _ = &mut deadline => break Ended::TimedOut,
                    chunk = logs.next(), if logs_open => match chunk {
                        Some(Ok(bytes)) => buffer.push(&bytes),
                        Some(Err(e)) => {
                            warn!(invocation = %invocation.id, error = %e, "Log stream failed");
                            logs_open = false;
                        }
                        None => logs_open = false,
                    },
                    code = &mut exit => break Ended::Exited(code),
                }
            }
        };

        if logs_open && matches!(ended, Ended::Exited(Ok(_))) {
            self.drain_logs(&mut logs, &mut buffer).await;
        }
        (ended, buffer)
    }

    /// Kill, then poll until the runtime confirms the container stopped or
    /// the grace period runs out.
    async fn terminate(&self, invocation_id: &str, container_id: &str) -> bool {
        self.inflight.mark_terminating(invocation_id);
        if let Err(e) = self.runtime.kill(container_id).await {
            warn!(container = %container_id, error = %e, "Failed to kill container");
        }

        let confirm = async {
            loop {
                match self.runtime.is_running(container_id).await {
                    Ok(false) => return true,
                    Ok(true) => {}
                    Err(e) => debug!(container = %container_id, error = %e, "Inspect during termination failed"),
                }
                tokio::time::sleep(TERMINATION_POLL).await;
            }
        };
        let confirmed = tokio::time::timeout(self.settings.termination_grace, confirm).await.unwrap_or(false);
        if !confirmed {
            warn!(container = %container_id, "Container still running after termination grace period");
        }
        confirmed
    }

    async fn drain_logs(
        &self,
        logs: &mut futures::stream::BoxStream<'static, Result<Vec<u8>, crate::errors::WardenError>>,
        buffer: &mut BoundedBuffer,
    ) {
        let drain = async {
            while let Some(Ok(bytes)) = logs.next().await {
                buffer.push(&bytes);
            }
        };
        let _ = tokio::time::timeout(LOG_DRAIN, drain).await;
    }

    fn scratch_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.scratch_locks.entry(key.to_string()).or_default().clone()
    }

    fn container_spec(&self, spec: &ToolSpec, invocation: &Invocation, cmd: Vec<String>) -> ContainerSpec {
        let mut labels = HashMap::new();
        labels.insert("warden.run".to_string(), self.settings.run_id.clone());
        labels.insert("warden.invocation".to_string(), invocation.id.clone());
        labels.insert("warden.tool".to_string(), spec.name.clone());

        let scratch_volume = spec.scratch_volume.then(|| {
            let mut hasher = DefaultHasher::new();
            scratch_key(spec, invocation).hash(&mut hasher);
            format!("warden-scratch-{}-{:016x}", sanitize(&spec.name), hasher.finish())
        });

        ContainerSpec {
            name: format!(
                "warden-{}-{}",
                sanitize(&invocation.id),
                &uuid::Uuid::new_v4().simple().to_string()[..8]
            ),
            image: spec.image.clone(),
            cmd,
            limits: invocation.limits,
            network: spec.network,
            scratch_volume,
            labels,
        }
    }
}

/// Scratch volumes are exclusive per (tool, subject).
fn scratch_key(spec: &ToolSpec, invocation: &Invocation) -> String {
    format!("{}|{}", spec.name, invocation.subject_or("").to_lowercase())
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::fake::{FakeBehavior, FakeRuntime};
    use crate::models::{Priority, ResourceLimits};
    use serde_json::json;

    fn registry() -> Arc<ToolRegistry> {
        let specs: Vec<ToolSpec> = serde_json::from_value(json!([
            {"name": "port-scanner", "image": "nmap", "command": ["nmap", "{target}"]},
            {"name": "dir-bruteforcer", "image": "ffuf", "command": ["ffuf", "-u", "{target}"], "scratch_volume": true}
        ])).unwrap();
        Arc::new(ToolRegistry::from_specs(specs).unwrap())
    }

    fn invocation(id: &str, tool: &str, timeout_secs: u64) -> Invocation {
        Invocation {
            id: id.into(),
            recommendation_id: "r".into(),
            tool: tool.into(),
            arguments: serde_json::from_value(json!({"target": "a.example.com"})).unwrap(),
            limits: ResourceLimits::default(),
            timeout_secs,
            priority: Priority::Medium,
        }
    }

    fn executor(runtime: Arc<FakeRuntime>, settings: ExecutorSettings) -> SandboxExecutor {
        SandboxExecutor::new(runtime, registry(), settings)
    }

    fn fast_retry() -> ExecutorSettings {
        ExecutorSettings {
            retry: RetryConfig { max_retries: 2, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(5) },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_success_and_tool_error() {
        let runtime = Arc::new(FakeRuntime::new().with_image("nmap", FakeBehavior::exit(0).with_output("80/tcp open http")));
        let exec = executor(runtime.clone(), ExecutorSettings::default());
        let result = exec.execute(&invocation("r.0", "port-scanner", 60), &CancellationToken::new()).await;
        assert_eq!(result.status, ExitStatus::Success);
        assert_eq!(result.output, "80/tcp open http");
        assert_eq!(result.attempts, 1);
        assert_eq!(runtime.live_containers(), 0);
        assert!(exec.inflight().is_empty());

        runtime.set_behavior("nmap", FakeBehavior::exit(2).with_output("partial"));
        let result = exec.execute(&invocation("r.1", "port-scanner", 60), &CancellationToken::new()).await;
        assert_eq!(result.status, ExitStatus::ToolError);
        assert_eq!(result.exit_code, Some(2));
        assert_eq!(result.output, "partial");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_terminates_container() {
        let runtime = Arc::new(FakeRuntime::new().with_image("nmap", FakeBehavior::hang()));
        let exec = executor(runtime.clone(), ExecutorSettings::default());
        let result = exec.execute(&invocation("r.0", "port-scanner", 60), &CancellationToken::new()).await;

        assert_eq!(result.status, ExitStatus::Timeout);
        assert_eq!(result.termination_confirmed, Some(true));
        assert!(result.duration_ms >= 60_000);
        assert_eq!(runtime.killed().len(), 1);
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_infrastructure_retry_then_success() {
        let runtime = Arc::new(FakeRuntime::new().with_image("nmap", FakeBehavior::exit(0).failing_launches(2)));
        let exec = executor(runtime.clone(), fast_retry());
        let result = exec.execute(&invocation("r.0", "port-scanner", 60), &CancellationToken::new()).await;
        assert_eq!(result.status, ExitStatus::Success);
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn test_infrastructure_retries_exhausted() {
        let runtime = Arc::new(FakeRuntime::new().with_image("nmap", FakeBehavior::exit(0).failing_launches(10)));
        let exec = executor(runtime.clone(), fast_retry());
        let result = exec.execute(&invocation("r.0", "port-scanner", 60), &CancellationToken::new()).await;
        assert_eq!(result.status, ExitStatus::InfrastructureError);
        assert_eq!(result.attempts, 3);
        assert_eq!(runtime.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_lost_wait_relaunches_container() {
        let runtime = Arc::new(FakeRuntime::new().with_image(
            "nmap",
            FakeBehavior::exit(0).with_output("80/tcp open http").failing_waits(1),
        ));
        let exec = executor(runtime.clone(), fast_retry());
        let result = exec.execute(&invocation("r.0", "port-scanner", 60), &CancellationToken::new()).await;
        assert_eq!(result.status, ExitStatus::Success);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.output, "80/tcp open http");
        assert_eq!(runtime.launch_count(), 2);
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_launch_and_wait_share_attempt_budget() {
        let runtime = Arc::new(FakeRuntime::new().with_image(
            "nmap",
            FakeBehavior::exit(0).failing_launches(1).failing_waits(10),
        ));
        let exec = executor(runtime.clone(), fast_retry());
        let result = exec.execute(&invocation("r.0", "port-scanner", 60), &CancellationToken::new()).await;
        assert_eq!(result.status, ExitStatus::InfrastructureError);
        assert_eq!(result.attempts, 3);
        assert_eq!(runtime.launch_count(), 2);
        assert_eq!(runtime.live_containers(), 0);
        assert!(exec.inflight().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_running_container() {
        let runtime = Arc::new(FakeRuntime::new().with_image("nmap", FakeBehavior::hang()));
        let exec = Arc::new(executor(runtime.clone(), ExecutorSettings::default()));
        let cancel = CancellationToken::new();

        let handle = {
            let exec = exec.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { exec.execute(&invocation("r.0", "port-scanner", 600), &cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(exec.inflight().len(), 1);
        cancel.cancel();

        let result = handle.await.unwrap();
        assert_eq!(result.status, ExitStatus::Cancelled);
        assert_eq!(result.termination_confirmed, Some(true));
        assert_eq!(runtime.killed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_addressed_termination_by_invocation_id() {
        let runtime = Arc::new(FakeRuntime::new().with_image("nmap", FakeBehavior::hang()));
        let exec = Arc::new(executor(runtime.clone(), ExecutorSettings::default()));
        let run = CancellationToken::new();

        let handle = {
            let exec = exec.clone();
            let run = run.clone();
            tokio::spawn(async move { exec.execute(&invocation("r.0", "port-scanner", 600), &run).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(exec.inflight().terminate("r.0"));

        let result = handle.await.unwrap();
        assert_eq!(result.status, ExitStatus::Cancelled);
        assert!(!run.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scratch_volume_serializes_same_subject() {
        let runtime = Arc::new(
            FakeRuntime::new().with_image("ffuf", FakeBehavior::exit(0).with_delay(Duration::from_secs(10))),
        );
        let exec = Arc::new(executor(runtime.clone(), ExecutorSettings::default()));
        let cancel = CancellationToken::new();

        let started = tokio::time::Instant::now();
        let a = {
            let (exec, cancel) = (exec.clone(), cancel.clone());
            tokio::spawn(async move { exec.execute(&invocation("a.0", "dir-bruteforcer", 60), &cancel).await })
        };
        let b = {
            let (exec, cancel) = (exec.clone(), cancel.clone());
            tokio::spawn(async move { exec.execute(&invocation("b.0", "dir-bruteforcer", 60), &cancel).await })
        };
        assert!(a.await.unwrap().succeeded());
        assert!(b.await.unwrap().succeeded());
        assert!(started.elapsed() >= Duration::from_secs(20));

        let launched = runtime.launched();
        assert_eq!(launched[0].scratch_volume, launched[1].scratch_volume);
        assert!(!launched[0].read_only_rootfs());
        assert!(exec.scratch_locks.is_empty());
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let runtime = Arc::new(FakeRuntime::new().with_image("nmap", FakeBehavior::exit(0).with_output("x".repeat(100))));
        let settings = ExecutorSettings { output_cap: 10, ..Default::default() };
        let result = executor(runtime, settings)
            .execute(&invocation("r.0", "port-scanner", 60), &CancellationToken::new())
            .await;
        assert_eq!(result.truncated_bytes, 90);
        assert!(result.output.starts_with("[... truncated 90 bytes ...]"));
    }
}
