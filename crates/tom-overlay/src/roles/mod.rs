/// Dynamic role management — per-peer metrics and quota-based assignment.
///
/// Every peer is scored from observed uptime, relayed bandwidth and
/// contribution; the top `ceil(N/R)` scorers hold the relay role, the
/// rest are clients. Assignments are rewritten atomically on every
/// evaluation.
pub mod manager;
pub mod metrics;

pub use manager::{AssignReason, RoleAssignment, RoleChange, RoleManager, DEFAULT_CLIENTS_PER_RELAY};
pub use metrics::NodeMetrics;
