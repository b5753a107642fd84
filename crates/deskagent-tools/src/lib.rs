//! Tool catalog, registry and executor.
//!
//! The catalog is the immutable description of every tool the product knows
//! about, partitioned into enableable groups. The registry is the runtime
//! view (which groups are on, which handlers are installed) and produces the
//! schema list handed to the LLM. The executor dispatches a single call,
//! applying the supervised-mode approval gate on the way in.

pub mod catalog;
pub mod executor;
pub mod handlers;
pub mod registry;
pub mod validate;

pub use catalog::{groups, ToolCatalog, ToolDefinition, NO_APPROVAL_TOOLS};
pub use executor::{ExecutionPolicy, SimpleToolExecutor, ToolContext, ToolHandler};
pub use registry::{DisableOutcome, EnableOutcome, RegistryError, ToolRegistry};
pub use validate::validate_args;
