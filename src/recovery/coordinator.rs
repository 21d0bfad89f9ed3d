//! Recovery Coordinator
//!
//! Drives one recovery run through
//! `Idle -> Streaming -> GapAnalysis -> Recovering -> Done` (or `Failed`):
//! - Streaming: one stream-all request, drained until the remote closes
//! - GapAnalysis: snapshot of sequences missing below the highest seen
//! - Recovering: one resend request per missing sequence, each on its own
//!   connection; individual failures are recorded, never fatal
//! - Done: sorted records plus a completeness flag

use std::future::Future;
use std::io;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::error::{FailureKind, RecoveryError};
use super::frame::FrameReader;
use super::store::{DuplicatePolicy, InsertOutcome, RecordStore, SeqRange};
use super::transport::{Connection, ConnectionProvider};
use super::wire::{encode_request, CallType, Record, MAX_RESEND_TARGET, RECORD_SIZE, REQUEST_SIZE};

/// Read buffer size for the streaming phase
const STREAM_READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecoveryPhase {
    Idle,
    Streaming,
    GapAnalysis,
    Recovering,
    Done,
    Failed,
}

impl RecoveryPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Handling of resend targets that do not fit the 1-byte request field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResendRange {
    /// Record the sequence as failed without contacting the exchange
    #[default]
    Reject,
    /// Send the low byte anyway (legacy client behaviour)
    Truncate,
}

/// Runtime options for the coordinator
#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    /// Bound on each connection attempt
    pub connect_timeout: Duration,
    /// Bound on each request write, each stream read and each resend response
    pub read_timeout: Duration,
    /// Concurrent resend connections (1 = strictly serial)
    pub max_inflight_resends: usize,
    pub resend_range: ResendRange,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            max_inflight_resends: 1,
            resend_range: ResendRange::default(),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

/// Run counters
#[derive(Debug, Default)]
pub struct RecoveryStats {
    pub frames_streamed: AtomicU64,
    pub malformed_frames: AtomicU64,
    pub duplicate_records: AtomicU64,
    pub divergent_duplicates: AtomicU64,
    pub gaps_detected: AtomicU64,
    pub resends_recovered: AtomicU64,
    pub resends_failed: AtomicU64,
    pub bytes_received: AtomicU64,
}

impl RecoveryStats {
    pub fn snapshot(&self, elapsed: Duration) -> RecoveryStatsSnapshot {
        RecoveryStatsSnapshot {
            frames_streamed: self.frames_streamed.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            duplicate_records: self.duplicate_records.load(Ordering::Relaxed),
            divergent_duplicates: self.divergent_duplicates.load(Ordering::Relaxed),
            gaps_detected: self.gaps_detected.load(Ordering::Relaxed),
            resends_recovered: self.resends_recovered.load(Ordering::Relaxed),
            resends_failed: self.resends_failed.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    fn reset(&self) {
        for counter in [
            &self.frames_streamed,
            &self.malformed_frames,
            &self.duplicate_records,
            &self.divergent_duplicates,
            &self.gaps_detected,
            &self.resends_recovered,
            &self.resends_failed,
            &self.bytes_received,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStatsSnapshot {
    pub frames_streamed: u64,
    pub malformed_frames: u64,
    pub duplicate_records: u64,
    pub divergent_duplicates: u64,
    pub gaps_detected: u64,
    pub resends_recovered: u64,
    pub resends_failed: u64,
    pub bytes_received: u64,
    pub elapsed_ms: u64,
}

/// A sequence (or run `seq..=through`) still missing after recovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResendFailure {
    pub seq: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub through: Option<i32>,
    pub kind: FailureKind,
    pub detail: String,
}

impl ResendFailure {
    fn new(seq: i32, err: &RecoveryError) -> Self {
        Self {
            seq,
            through: None,
            kind: err.kind(),
            detail: err.to_string(),
        }
    }

    fn range(range: SeqRange, err: &RecoveryError) -> Self {
        Self {
            seq: range.from,
            through: (range.to != range.from).then_some(range.to),
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

/// Final artifact of a run that got past the initial stream
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryOutcome {
    /// Records ordered by sequence
    pub records: Vec<Record>,
    pub highest_sequence: i32,
    /// `records.len() == highest_sequence`
    pub complete: bool,
    /// Runs of sequences in `[1, highest_sequence]` still absent
    pub missing: Vec<SeqRange>,
    /// Total sequences covered by `missing`
    pub missing_count: u64,
    /// Resend attempts that did not fill their sequence, ascending
    pub failures: Vec<ResendFailure>,
    pub stats: RecoveryStatsSnapshot,
}

pub struct RecoveryCoordinator {
    provider: Arc<dyn ConnectionProvider>,
    options: RecoveryOptions,
    phase: RwLock<RecoveryPhase>,
    stats: Arc<RecoveryStats>,
}

impl RecoveryCoordinator {
    pub fn new(provider: Arc<dyn ConnectionProvider>, options: RecoveryOptions) -> Self {
        Self {
            provider,
            options,
            phase: RwLock::new(RecoveryPhase::Idle),
            stats: Arc::new(RecoveryStats::default()),
        }
    }

    pub fn phase(&self) -> RecoveryPhase {
        *self.phase.read()
    }

    pub fn stats(&self) -> Arc<RecoveryStats> {
        self.stats.clone()
    }

    fn transition(&self, next: RecoveryPhase) {
        let prev = std::mem::replace(&mut *self.phase.write(), next);
        info!("Recovery phase {:?} -> {:?}", prev, next);
    }

    /// Execute a full run against the provider.
    ///
    /// Only a failure of the initial stream is returned as `Err`; every
    /// later problem degrades `complete` instead.
    pub async fn run(&self) -> Result<RecoveryOutcome, RecoveryError> {
        let started = Instant::now();
        self.stats.reset();
        let mut store = RecordStore::new(self.options.duplicate_policy);

        info!("Starting recovery run against {}", self.provider.describe());

        self.transition(RecoveryPhase::Streaming);
        if let Err(e) = self.stream_all(&mut store).await {
            error!("Initial stream failed: {}", e);
            self.transition(RecoveryPhase::Failed);
            return Err(e);
        }

        self.transition(RecoveryPhase::GapAnalysis);
        let highest = store.highest_sequence_seen();
        let gaps = store.gaps_up_to(highest);
        let gap_count: u64 = gaps.iter().map(SeqRange::len).sum();
        self.stats.gaps_detected.store(gap_count, Ordering::Relaxed);
        info!(
            highest,
            received = store.len(),
            gaps = gap_count,
            ranges = gaps.len(),
            "Gap analysis complete"
        );

        let mut failures = Vec::new();
        if !gaps.is_empty() {
            self.transition(RecoveryPhase::Recovering);
            failures = self.recover(&mut store, &gaps).await;
        }

        self.transition(RecoveryPhase::Done);
        Ok(self.finish(store, failures, started.elapsed()))
    }

    async fn stream_all(&self, store: &mut RecordStore) -> Result<(), RecoveryError> {
        let phase = RecoveryPhase::Streaming;
        let mut conn = self.open(phase, None).await?;
        self.send(&mut conn, encode_request(CallType::StreamAll, 0), phase, None)
            .await?;

        let mut reader = FrameReader::new();
        let mut chunk = vec![0u8; STREAM_READ_CHUNK];
        let mut frame_index = 0u64;

        loop {
            let n = self
                .bounded(self.options.read_timeout, phase, None, conn.read(&mut chunk))
                .await?;
            if n == 0 {
                break;
            }
            self.stats.bytes_received.fetch_add(n as u64, Ordering::Relaxed);

            for frame in reader.feed(&chunk[..n]) {
                frame_index += 1;
                match frame {
                    Ok(record) => {
                        self.stats.frames_streamed.fetch_add(1, Ordering::Relaxed);
                        debug!(seq = record.sequence, "Streamed record");
                        self.merge(store, record);
                    }
                    Err(e) => {
                        self.stats.malformed_frames.fetch_add(1, Ordering::Relaxed);
                        warn!("Skipping malformed frame #{} in stream: {}", frame_index, e);
                    }
                }
            }
        }

        if reader.pending() > 0 {
            warn!(
                "Stream closed with {} trailing bytes (partial record discarded)",
                reader.pending()
            );
        }

        info!(
            frames = frame_index,
            highest = store.highest_sequence_seen(),
            "Stream complete"
        );
        Ok(())
    }

    async fn recover(&self, store: &mut RecordStore, gaps: &[SeqRange]) -> Vec<ResendFailure> {
        let phase = RecoveryPhase::Recovering;
        let inflight = self.options.max_inflight_resends.max(1);
        let (requestable, rejected) = self.partition_gaps(gaps);
        info!(
            "Requesting {} missing records ({} at a time)",
            requestable.iter().map(SeqRange::len).sum::<u64>(),
            inflight
        );

        // `buffered` yields in request order, so merges and logs stay ascending
        let mut results = stream::iter(requestable.iter().flat_map(SeqRange::iter))
            .map(|seq| async move { (seq, self.resend(seq).await) })
            .buffered(inflight);

        let mut failures = Vec::new();
        while let Some((seq, result)) = results.next().await {
            let filled = result.and_then(|record| {
                let received = record.sequence;
                self.merge(store, record);
                if store.contains(seq) {
                    Ok(())
                } else {
                    Err(RecoveryError::WrongSequence {
                        requested: seq,
                        received,
                    })
                }
            });

            match filled {
                Ok(()) => {
                    self.stats.resends_recovered.fetch_add(1, Ordering::Relaxed);
                    debug!(seq, phase = ?phase, "Recovered missing record");
                }
                Err(e) => {
                    self.stats.resends_failed.fetch_add(1, Ordering::Relaxed);
                    warn!(seq, phase = ?phase, "Resend failed: {}", e);
                    failures.push(ResendFailure::new(seq, &e));
                }
            }
        }

        // Higher than every requestable sequence, so failures stay ascending
        for range in rejected {
            let e = RecoveryError::OutOfRange {
                from: range.from,
                to: range.to,
            };
            self.stats
                .resends_failed
                .fetch_add(range.len(), Ordering::Relaxed);
            warn!(from = range.from, to = range.to, phase = ?phase, "Resend skipped: {}", e);
            failures.push(ResendFailure::range(range, &e));
        }

        failures
    }

    /// Split gaps into runs that can be requested and runs the 1-byte
    /// resend field cannot address (empty under `ResendRange::Truncate`).
    fn partition_gaps(&self, gaps: &[SeqRange]) -> (Vec<SeqRange>, Vec<SeqRange>) {
        if self.options.resend_range == ResendRange::Truncate {
            return (gaps.to_vec(), Vec::new());
        }

        let mut requestable = Vec::new();
        let mut rejected = Vec::new();
        for gap in gaps {
            if gap.to <= MAX_RESEND_TARGET {
                requestable.push(*gap);
            } else if gap.from > MAX_RESEND_TARGET {
                rejected.push(*gap);
            } else {
                requestable.push(SeqRange::new(gap.from, MAX_RESEND_TARGET));
                rejected.push(SeqRange::new(MAX_RESEND_TARGET + 1, gap.to));
            }
        }
        (requestable, rejected)
    }

    /// One resend request/response cycle on a fresh connection
    async fn resend(&self, seq: i32) -> Result<Record, RecoveryError> {
        let phase = RecoveryPhase::Recovering;

        // Only reachable under `ResendRange::Truncate`; see `partition_gaps`
        if seq > MAX_RESEND_TARGET {
            warn!(
                seq,
                low_byte = seq as u8,
                phase = ?phase,
                "Resend target truncated to one byte"
            );
        }

        let mut conn = self.open(phase, Some(seq)).await?;
        self.send(&mut conn, encode_request(CallType::ResendOne, seq), phase, Some(seq))
            .await?;

        let limit = self.options.read_timeout;
        match timeout(limit, self.read_one(&mut conn, seq)).await {
            Ok(result) => result,
            Err(_) => Err(RecoveryError::Timeout {
                phase,
                seq: Some(seq),
                after: limit,
            }),
        }
    }

    /// Read until one full frame arrives; anything after it is ignored
    async fn read_one(&self, conn: &mut Connection, seq: i32) -> Result<Record, RecoveryError> {
        let mut reader = FrameReader::new();
        let mut chunk = [0u8; RECORD_SIZE * 4];

        loop {
            let n = conn
                .read(&mut chunk)
                .await
                .map_err(|source| RecoveryError::Connection {
                    phase: RecoveryPhase::Recovering,
                    seq: Some(seq),
                    source,
                })?;
            if n == 0 {
                return Err(RecoveryError::IncompleteResend {
                    seq,
                    buffered: reader.pending(),
                });
            }
            self.stats.bytes_received.fetch_add(n as u64, Ordering::Relaxed);

            let frame = reader.feed(&chunk[..n]).next();
            if let Some(frame) = frame {
                if reader.pending() > 0 {
                    debug!(
                        seq,
                        phase = ?RecoveryPhase::Recovering,
                        "Ignoring {} bytes after resend record",
                        reader.pending()
                    );
                }
                return frame.map_err(|source| RecoveryError::MalformedRecord {
                    seq: Some(seq),
                    source,
                });
            }
        }
    }

    fn merge(&self, store: &mut RecordStore, record: Record) {
        let seq = record.sequence;
        match store.insert(record) {
            InsertOutcome::New => {}
            InsertOutcome::Duplicate => {
                self.stats.duplicate_records.fetch_add(1, Ordering::Relaxed);
                debug!(seq, "Duplicate record");
            }
            InsertOutcome::Divergent => {
                self.stats.duplicate_records.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .divergent_duplicates
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    seq,
                    policy = ?self.options.duplicate_policy,
                    "Duplicate record with different payload"
                );
            }
            InsertOutcome::Rejected => {
                warn!(seq, "Rejected record with non-positive sequence");
            }
        }
    }

    async fn open(
        &self,
        phase: RecoveryPhase,
        seq: Option<i32>,
    ) -> Result<Connection, RecoveryError> {
        self.bounded(self.options.connect_timeout, phase, seq, self.provider.connect())
            .await
    }

    async fn send(
        &self,
        conn: &mut Connection,
        request: [u8; REQUEST_SIZE],
        phase: RecoveryPhase,
        seq: Option<i32>,
    ) -> Result<(), RecoveryError> {
        let write = async {
            conn.write_all(&request).await?;
            conn.flush().await?;
            Ok::<_, io::Error>(())
        };
        self.bounded(self.options.read_timeout, phase, seq, write).await
    }

    /// Apply a deadline to an I/O step and tag failures with phase/seq
    async fn bounded<T>(
        &self,
        limit: Duration,
        phase: RecoveryPhase,
        seq: Option<i32>,
        fut: impl Future<Output = io::Result<T>>,
    ) -> Result<T, RecoveryError> {
        match timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(RecoveryError::Connection { phase, seq, source }),
            Err(_) => Err(RecoveryError::Timeout {
                phase,
                seq,
                after: limit,
            }),
        }
    }

    fn finish(
        &self,
        store: RecordStore,
        failures: Vec<ResendFailure>,
        elapsed: Duration,
    ) -> RecoveryOutcome {
        let highest_sequence = store.highest_sequence_seen();
        let missing = store.gaps_up_to(highest_sequence);
        let missing_count: u64 = missing.iter().map(SeqRange::len).sum();
        let records = store.snapshot_sorted();
        let complete = records.len() == highest_sequence as usize;

        if complete {
            info!(
                records = records.len(),
                "Recovery complete: all sequences 1..={} present", highest_sequence
            );
        } else {
            warn!(
                records = records.len(),
                highest_sequence,
                "Recovery incomplete: {} sequences still missing in {} ranges (first: {:?})",
                missing_count,
                missing.len(),
                &missing[..missing.len().min(8)]
            );
        }

        RecoveryOutcome {
            records,
            highest_sequence,
            complete,
            missing,
            missing_count,
            failures,
            stats: self.stats.snapshot(elapsed),
        }
    }
}
