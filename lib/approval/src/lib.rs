//! The Approval Coordinator: a stateless `request`/`decide`/`authorize`
//! contract over a persisted `ApprovalRequest`, plus the adapter wiring it
//! into the flow execution handler's `ApprovalGate` seam.

pub mod coordinator;
pub mod error;
pub mod gate;
pub mod policy;
pub mod postgres;
pub mod request;

pub use coordinator::{ApprovalCoordinator, GateOutcome};
pub use error::{ApprovalError, ApprovalStoreError};
pub use gate::{ApprovalGateAdapter, ApprovalPolicyResolver};
pub use policy::FlowActionPolicyResolver;
pub use postgres::PgApprovalStore;
pub use request::{ApprovalRequest, ApprovalStatus, ApprovalStore, Approver, InMemoryApprovalStore};
