//! Immutable audit trail for governance decisions.
//!
//! Every terminal decision produces exactly one committed [`AuditRecord`].
//! The primary sink is durable; when it is unreachable the record is
//! serialized to a local fallback file so the trail survives a database
//! outage. A decision is never returned to the ingress before a commit
//! succeeds at least to the fallback.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod fallback;
mod record;
mod sink;

pub use error::{AuditError, AuditResult};
pub use fallback::FileAuditSink;
pub use record::{AuditRecord, AuditRecordBuilder};
pub use sink::{AuditFilter, AuditSink, FallbackAuditSink, SqliteAuditSink};
