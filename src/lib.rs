//! Feed Recovery Library
//!
//! Exposes the recovery client for the binary and integration tests.

pub mod recovery;

pub use recovery::{
    OutputWriter, Record, RecoveryConfig, RecoveryCoordinator, RecoveryError, RecoveryOutcome,
    TcpConnectionProvider,
};
