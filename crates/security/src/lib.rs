//! Security for codeclaw: tool permissions, the approval bridge and the
//! audit log.
//!
//! - **Permissions**: which tools are sensitive, which commands are denied
//! - **Approval bridge**: single-slot channel to an external approver
//! - **Audit logging**: structured record of approvals and blocked commands

pub mod approval;
pub mod audit;
pub mod error;
pub mod permissions;

pub use approval::{ApprovalBridge, ApprovalDecision, ApprovalRequest, ApprovalResponder};
pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use error::SecurityError;
pub use permissions::{PermissionSettings, Permissions};
