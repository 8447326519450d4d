//! In-process container runtime for tests and dry runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::errors::WardenError;
use super::runtime::{ContainerRuntime, ContainerSpec};

/// Scripted behaviour for every container started from one image.
#[derive(Debug, Clone)]
pub struct FakeBehavior {
    pub exit_code: i64,
    pub output: String,
    pub delay: Duration,
    /// Never exits on its own.
    pub hang: bool,
    /// Launch attempts that fail before one succeeds.
    pub launch_failures: u32,
    /// Containers whose wait fails as if the runtime connection dropped.
    pub wait_failures: u32,
}

impl FakeBehavior {
    pub fn exit(exit_code: i64) -> Self {
        Self {
            exit_code,
            output: String::new(),
            delay: Duration::ZERO,
            hang: false,
            launch_failures: 0,
            wait_failures: 0,
        }
    }

    pub fn hang() -> Self {
        Self { hang: true, ..Self::exit(0) }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_launches(mut self, count: u32) -> Self {
        self.launch_failures = count;
        self
    }

    pub fn failing_waits(mut self, count: u32) -> Self {
        self.wait_failures = count;
        self
    }
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self::exit(0)
    }
}

struct FakeContainer {
    image: String,
    behavior: FakeBehavior,
    killed: CancellationToken,
    exited: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct FakeRuntime {
    behaviors: Mutex<HashMap<String, FakeBehavior>>,
    launch_attempts: Mutex<HashMap<String, u32>>,
    wait_attempts: Mutex<HashMap<String, u32>>,
    containers: Mutex<HashMap<String, FakeContainer>>,
    launched: Mutex<Vec<ContainerSpec>>,
    killed: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, image: &str, behavior: FakeBehavior) -> Self {
        self.set_behavior(image, behavior);
        self
    }

    pub fn set_behavior(&self, image: &str, behavior: FakeBehavior) {
        self.behaviors.lock().unwrap().insert(image.to_string(), behavior);
    }

    /// Specs of every container that actually started.
    pub fn launched(&self) -> Vec<ContainerSpec> {
        self.launched.lock().unwrap().clone()
    }

    pub fn launch_count(&self) -> usize {
        self.launched.lock().unwrap().len()
    }

    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().unwrap().clone()
    }

    /// Containers launched and not yet removed.
    pub fn live_containers(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    fn next_attempt(counter: &Mutex<HashMap<String, u32>>, image: &str) -> u32 {
        let mut attempts = counter.lock().unwrap();
        let count = attempts.entry(image.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn behavior_for(&self, image: &str) -> FakeBehavior {
        self.behaviors.lock().unwrap().get(image).cloned().unwrap_or_default()
    }

    fn container<T>(&self, id: &str, f: impl FnOnce(&FakeContainer) -> T) -> Result<T, WardenError> {
        self.containers.lock().unwrap().get(id)
            .map(f)
            .ok_or_else(|| WardenError::Infrastructure(format!("No such container: {}", id)))
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn launch(&self, spec: &ContainerSpec) -> Result<String, WardenError> {
        let behavior = self.behavior_for(&spec.image);
        if Self::next_attempt(&self.launch_attempts, &spec.image) <= behavior.launch_failures {
            return Err(WardenError::Infrastructure(format!("Image '{}' not found", spec.image)));
        }

        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.containers.lock().unwrap().insert(id.clone(), FakeContainer {
            image: spec.image.clone(),
            behavior,
            killed: CancellationToken::new(),
            exited: Arc::new(AtomicBool::new(false)),
        });
        self.launched.lock().unwrap().push(spec.clone());
        Ok(id)
    }

    fn logs(&self, id: &str) -> BoxStream<'static, Result<Vec<u8>, WardenError>> {
        match self.container(id, |c| c.behavior.output.clone()) {
            Ok(output) if output.is_empty() => stream::empty().boxed(),
            Ok(output) => stream::iter(vec![Ok(output.into_bytes())]).boxed(),
            Err(e) => stream::iter(vec![Err(e)]).boxed(),
        }
    }

    async fn wait(&self, id: &str) -> Result<i64, WardenError> {
        let (image, behavior, killed, exited) = self.container(id, |c| {
            (c.image.clone(), c.behavior.clone(), c.killed.clone(), c.exited.clone())
        })?;
        if behavior.wait_failures > 0 && Self::next_attempt(&self.wait_attempts, &image) <= behavior.wait_failures {
            return Err(WardenError::Infrastructure(format!("Lost connection while waiting on {}", id)));
        }

        let code = if behavior.hang {
            killed.cancelled().await;
            137
        } else {
            tokio::select! {
                _ = tokio::time::sleep(behavior.delay) => behavior.exit_code,
                _ = killed.cancelled() => 137,
            }
        };
        exited.store(true, Ordering::SeqCst);
        Ok(code)
    }

    async fn kill(&self, id: &str) -> Result<(), WardenError> {
        self.killed.lock().unwrap().push(id.to_string());
        self.container(id, |c| {
            c.killed.cancel();
            c.exited.store(true, Ordering::SeqCst);
        })
    }

    async fn is_running(&self, id: &str) -> Result<bool, WardenError> {
        Ok(self.container(id, |c| !c.exited.load(Ordering::SeqCst)).unwrap_or(false))
    }

    async fn remove(&self, id: &str) -> Result<(), WardenError> {
        self.containers.lock().unwrap().remove(id);
        Ok(())
    }
}
