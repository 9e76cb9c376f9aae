//! Session-level plumbing around the runlens test model.
//!
//! [`runlens_model`] holds the reconciled tree; this crate feeds it. The
//! [`protocol`] module decodes the runner's JSON notification stream, the
//! [`session`] coordinator maps stream events onto model mutations, and
//! [`outline`] seeds suites from statically discovered structure.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod outline;
pub mod protocol;
pub mod session;

pub use outline::{
    sync_suite_from_outline, wait_for_outline, OutlineKind, OutlineNode, OutlineProvider,
};
pub use protocol::{parse_notification, Notification, ProtocolError};
pub use session::SessionCoordinator;
