//! Legal edges of the per-file state machine.
//!
//! ```text
//! pending ──claim──▶ processing ──▶ uploaded ──▶ converting ──▶ embedding ──▶ completed
//!    │                  │  ▲            │             │              │
//!    └──────────────────┴──┼────────────┴─────────────┴──────────────┴──▶ failed
//!                          └── crash recovery (processing → pending)        │
//! pending ◀──────────────────────── retry while retry_count < max ──────────┘
//! ```
//!
//! The retry cap on `failed -> pending` depends on the record, so it is enforced by the
//! store; this table only answers whether an edge exists at all.

use super::types::FileStatus;

/// Targets reachable from `from` in one step.
pub fn allowed_targets(from: FileStatus) -> &'static [FileStatus] {
    use FileStatus::*;
    match from {
        Pending => &[Processing, Uploaded, Failed],
        Processing => &[Uploaded, Failed, Pending],
        Uploaded => &[Converting, Failed],
        Converting => &[Embedding, Failed],
        Embedding => &[Completed, Failed],
        Failed => &[Pending],
        Completed => &[],
    }
}

/// Whether `from -> to` is an edge of the state machine.
pub fn is_allowed(from: FileStatus, to: FileStatus) -> bool {
    allowed_targets(from).contains(&to)
}
