pub mod finding;
pub mod recommendation;
pub mod invocation;
pub mod execution;
pub mod gate;

pub use finding::*;
pub use recommendation::*;
pub use invocation::*;
pub use execution::*;
pub use gate::*;
