//! Audit events emitted by permission checks.

use std::collections::BTreeSet;
use std::fmt::{self, Display};

use serde::Serialize;
use tracing::{info, warn};
use warden_types::UserId;

/// Which branch of a check produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Granted through the admin mark.
    Admin,
    /// Granted under ANY semantics.
    Check,
    /// Granted under ALL semantics.
    Diff,
    /// Denied.
    Failed,
}

impl AuditKind {
    pub fn granted(self) -> bool {
        !matches!(self, AuditKind::Failed)
    }
}

impl Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            AuditKind::Admin => "admin",
            AuditKind::Check => "check",
            AuditKind::Diff => "diff",
            AuditKind::Failed => "failed",
        };
        f.write_str(tag)
    }
}

/// One check decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub uid: UserId,
    /// Requested permission strings, lower-cased.
    pub rules: Vec<String>,
    /// Matched strings for `Check`, the admin mark for `Admin`, and the
    /// missing strings for `Diff` and `Failed`.
    pub auth: BTreeSet<String>,
    /// `true` for ANY semantics, `false` for ALL.
    pub relation: bool,
}

/// Receives audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

impl<F> AuditSink for F
where
    F: Fn(&AuditEvent) + Send + Sync,
{
    fn record(&self, event: &AuditEvent) {
        self(event);
    }
}

/// Logs decisions through `tracing`: grants at `info`, denials at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        if event.kind.granted() {
            info!(
                kind = %event.kind,
                uid = %event.uid,
                rules = ?event.rules,
                auth = ?event.auth,
                relation = event.relation,
                "Permission granted"
            );
        } else {
            warn!(
                kind = %event.kind,
                uid = %event.uid,
                rules = ?event.rules,
                missing = ?event.auth,
                relation = event.relation,
                "Permission denied"
            );
        }
    }
}
