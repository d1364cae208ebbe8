//! Session lifecycle states.

use std::fmt;

/// `Uninitialized → Verifying → Ready ⇄ Processing → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    /// Checking that the graph store and the model are reachable.
    Verifying,
    Ready,
    /// A query is in flight; new queries are rejected.
    Processing,
    Closed,
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Verifying => "verifying",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}
