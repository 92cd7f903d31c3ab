//! Command abstractions.

use uuid::Uuid;

/// Trait that all orchestration commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// Correlation ID to trace this command through both transactions and the
    /// external call between them.
    fn correlation_id(&self) -> Uuid;

    /// Tenant the command is billed to.
    fn tenant_id(&self) -> Uuid;
}
