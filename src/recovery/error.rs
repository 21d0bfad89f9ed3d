//! Recovery errors

use std::io;
use std::time::Duration;

use serde::Serialize;

use super::coordinator::RecoveryPhase;
use super::wire::WireError;

/// Coarse classification of a failed resend, for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    OutOfRange,
    Connection,
    Timeout,
    Incomplete,
    Malformed,
    WrongSequence,
}

#[derive(Debug)]
pub enum RecoveryError {
    /// Frame failed to decode
    MalformedRecord {
        seq: Option<i32>,
        source: WireError,
    },
    /// Connect, write or read failed
    Connection {
        phase: RecoveryPhase,
        seq: Option<i32>,
        source: io::Error,
    },
    /// Connect or response exceeded its deadline
    Timeout {
        phase: RecoveryPhase,
        seq: Option<i32>,
        after: Duration,
    },
    /// Remote closed before a full record arrived
    IncompleteResend { seq: i32, buffered: usize },
    /// Resend targets `from..=to` do not fit the 1-byte request field
    OutOfRange { from: i32, to: i32 },
    /// Resend answered with a different sequence than requested
    WrongSequence { requested: i32, received: i32 },
}

impl RecoveryError {
    /// Only a failure of the initial stream aborts a run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection { phase: RecoveryPhase::Streaming, .. }
                | Self::Timeout { phase: RecoveryPhase::Streaming, .. }
        )
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MalformedRecord { .. } => FailureKind::Malformed,
            Self::Connection { .. } => FailureKind::Connection,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::IncompleteResend { .. } => FailureKind::Incomplete,
            Self::OutOfRange { .. } => FailureKind::OutOfRange,
            Self::WrongSequence { .. } => FailureKind::WrongSequence,
        }
    }
}

fn fmt_seq(seq: &Option<i32>) -> String {
    seq.map(|s| format!(" (seq {})", s)).unwrap_or_default()
}

impl std::fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedRecord { seq, source } => {
                write!(f, "malformed record{}: {}", fmt_seq(seq), source)
            }
            Self::Connection { phase, seq, source } => {
                write!(f, "connection error during {:?}{}: {}", phase, fmt_seq(seq), source)
            }
            Self::Timeout { phase, seq, after } => {
                write!(f, "timed out after {:?} during {:?}{}", after, phase, fmt_seq(seq))
            }
            Self::IncompleteResend { seq, buffered } => write!(
                f,
                "connection closed before full record for seq {} ({} bytes buffered)",
                seq, buffered
            ),
            Self::OutOfRange { from, to } if from == to => {
                write!(f, "seq {} does not fit the resend request field (0-255)", from)
            }
            Self::OutOfRange { from, to } => write!(
                f,
                "seqs {}..={} do not fit the resend request field (0-255)",
                from, to
            ),
            Self::WrongSequence { requested, received } => {
                write!(f, "requested seq {} but received seq {}", requested, received)
            }
        }
    }
}

impl std::error::Error for RecoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::MalformedRecord { source, .. } => Some(source),
            Self::Connection { source, .. } => Some(source),
            _ => None,
        }
    }
}
