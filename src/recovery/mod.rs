//! Feed Recovery Module
//!
//! Two-phase retrieval of a gap-free record sequence from the exchange:
//! - Stream phase: one stream-all request, framed into 17-byte records
//! - Recovery phase: one resend request per missing sequence number

pub mod config;
pub mod coordinator;
pub mod error;
pub mod frame;
pub mod output;
pub mod store;
pub mod transport;
pub mod wire;

pub use config::RecoveryConfig;
pub use coordinator::{
    RecoveryCoordinator, RecoveryOptions, RecoveryOutcome, RecoveryPhase, RecoveryStats,
    ResendFailure, ResendRange,
};
pub use error::{FailureKind, RecoveryError};
pub use frame::FrameReader;
pub use output::OutputWriter;
pub use store::{DuplicatePolicy, RecordStore, SeqRange};
pub use transport::{Connection, ConnectionProvider, TcpConnectionProvider};
pub use wire::{encode_request, CallType, Record, WireError, RECORD_SIZE};
