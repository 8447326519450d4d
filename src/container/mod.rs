pub mod docker;
pub mod executor;
pub mod fake;
pub mod inflight;
pub mod output;
pub mod runtime;

pub use docker::DockerRuntime;
pub use executor::{ExecutorSettings, SandboxExecutor};
pub use fake::{FakeBehavior, FakeRuntime};
pub use inflight::{InflightRegistry, Lifecycle};
pub use output::BoundedBuffer;
pub use runtime::{ContainerRuntime, ContainerSpec};
