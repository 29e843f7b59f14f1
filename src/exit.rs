//! Process exit codes.
//!
//! The orchestrating script branches purely on these values, so each
//! condition gets its own code and none of them may collide.

use std::fmt;

/// Final outcome of a provisioning run, as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Listen window closed after at least one successful BIND (force-listen).
    ExpiredWithBundle,
    /// Invalid configuration or listener/output directory setup failed.
    Fatal,
    /// A BIND succeeded and ended the run.
    Bind,
    /// An UNBIND succeeded and ended the run.
    Unbind,
    /// Listen window closed and nothing was received.
    ExpiredNoBundle,
}

impl ExitStatus {
    /// Numeric code handed to `std::process::exit`.
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::ExpiredWithBundle => 0,
            ExitStatus::Fatal => 1,
            ExitStatus::Bind => 2,
            ExitStatus::Unbind => 3,
            ExitStatus::ExpiredNoBundle => 5,
        }
    }

    /// Pick the expiry code depending on whether a bundle landed.
    pub fn expired(bundle_received: bool) -> Self {
        if bundle_received {
            ExitStatus::ExpiredWithBundle
        } else {
            ExitStatus::ExpiredNoBundle
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitStatus::ExpiredWithBundle => "duration expired (bundle received)",
            ExitStatus::Fatal => "fatal error",
            ExitStatus::Bind => "bind",
            ExitStatus::Unbind => "unbind",
            ExitStatus::ExpiredNoBundle => "duration expired (no bundle)",
        };
        write!(f, "{} ({})", name, self.code())
    }
}
