//! Flow definitions, execution state machine, and the flow execution handler.
//!
//! - **Definition**: the declarative `Flow`/`Action`/`Input`/`Node` model,
//!   parseable straight off the YAML surface.
//! - **Execution**: the `ExecutionLog` state machine with optimistic-CAS
//!   persistence.
//! - **Interpolation**: the closed variable-templating evaluator.
//! - **Log stream**: a per-execution multiplexed log channel.
//! - **Handler**: the `FlowExecutionHandler`, which drives one execution
//!   through its per-action loop.

pub mod cache;
pub mod definition;
pub mod envelope;
pub mod error;
pub mod execution;
pub mod handler;
pub mod interpolation;
pub mod log_stream;
pub mod node;
pub mod postgres;

pub use cache::FlowCache;
pub use definition::{
    Action, ExecutorKind, Flow, Input, InputType, NotifyBinding, Schedule, Variable,
};
pub use envelope::{Envelope, RawEnvelope};
pub use error::{DefinitionError, ExecutionError, FlowError};
pub use execution::{
    ExecutionLog, ExecutionLogStore, ExecutionStatus, InMemoryExecutionLogStore, TriggerType,
};
pub use handler::{
    ApprovalDecision, ApprovalGate, DriverFactory, ExecOutput, Executor, ExecutorFactory,
    FlowExecutionHandler, FlowExecutionPayload, NodeDriver, NodeResolver,
};
pub use interpolation::{evaluate, Environment, InterpolationError};
pub use log_stream::{ExecLogger, LogStreamManager, MessageType, StreamMessage};
pub use node::{ConnectionType, Node, OsFamily};
pub use postgres::PgExecutionLogStore;
