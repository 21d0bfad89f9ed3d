//! Integration tests for the recovery client
//!
//! Each test starts a scripted exchange on a local TCP port and runs the
//! coordinator against it through the real TCP provider.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use feed_recovery::recovery::{
    FailureKind, RecoveryOptions, RecoveryPhase, ResendRange, SeqRange, RECORD_SIZE,
};
use feed_recovery::{OutputWriter, Record, RecoveryCoordinator, TcpConnectionProvider};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Scripted exchange behaviour
#[derive(Clone, Default)]
struct Exchange {
    stream: Vec<Record>,
    /// Bytes written per stream write; 0 = one write
    stream_chunk: usize,
    resends: HashMap<u8, Record>,
    /// Resend targets answered by resetting the connection
    reset: HashSet<u8>,
}

impl Exchange {
    async fn spawn(self) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let exchange = Arc::new(self);

        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let exchange = exchange.clone();
                tokio::spawn(async move { exchange.serve(socket).await });
            }
        });

        port
    }

    async fn serve(&self, mut socket: TcpStream) {
        let mut req = [0u8; 2];
        if socket.read_exact(&mut req).await.is_err() {
            return;
        }

        match req {
            [1, _] => {
                let bytes: Vec<u8> = self.stream.iter().flat_map(|r| r.to_bytes()).collect();
                let chunk = if self.stream_chunk == 0 {
                    bytes.len().max(1)
                } else {
                    self.stream_chunk
                };
                for part in bytes.chunks(chunk) {
                    if socket.write_all(part).await.is_err() {
                        return;
                    }
                    let _ = socket.flush().await;
                    tokio::task::yield_now().await;
                }
            }
            [2, target] if self.reset.contains(&target) => {
                // RST instead of FIN
                let _ = socket.set_linger(Some(Duration::ZERO));
                return;
            }
            [2, target] => {
                if let Some(record) = self.resends.get(&target) {
                    let _ = socket.write_all(&record.to_bytes()).await;
                }
            }
            _ => {}
        }
        let _ = socket.shutdown().await;
    }
}

fn rec(seq: i32) -> Record {
    let symbols = ["AAPL", "META", "MSFT", "AMZN"];
    let side = if seq % 3 == 0 { 'S' } else { 'B' };
    Record::new(symbols[seq as usize % 4], side, seq * 7, 90 + seq, seq)
}

fn options() -> RecoveryOptions {
    RecoveryOptions {
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn coordinator(port: u16, options: RecoveryOptions) -> RecoveryCoordinator {
    RecoveryCoordinator::new(
        Arc::new(TcpConnectionProvider::new("127.0.0.1", port)),
        options,
    )
}

#[tokio::test]
async fn test_stream_and_recover_over_tcp() {
    let port = Exchange {
        stream: [1, 2, 4].map(rec).to_vec(),
        resends: HashMap::from([(3, rec(3))]),
        ..Default::default()
    }
    .spawn()
    .await;

    let coord = coordinator(port, options());
    let outcome = coord.run().await.unwrap();

    assert_eq!(outcome.records, [1, 2, 3, 4].map(rec).to_vec());
    assert!(outcome.complete);
    assert_eq!(coord.phase(), RecoveryPhase::Done);
}

#[tokio::test]
async fn test_stream_split_mid_record() {
    let port = Exchange {
        stream: (1..=20).map(rec).collect(),
        stream_chunk: 5,
        ..Default::default()
    }
    .spawn()
    .await;

    let outcome = coordinator(port, options()).run().await.unwrap();

    assert_eq!(outcome.records, (1..=20).map(rec).collect::<Vec<_>>());
    assert_eq!(outcome.stats.bytes_received, 20 * RECORD_SIZE as u64);
    assert!(outcome.complete);
}

#[tokio::test]
async fn test_out_of_order_and_duplicate_stream() {
    let port = Exchange {
        stream: [5, 1, 3, 1, 2, 5].map(rec).to_vec(),
        stream_chunk: 11,
        resends: HashMap::from([(4, rec(4))]),
        ..Default::default()
    }
    .spawn()
    .await;

    let outcome = coordinator(port, options()).run().await.unwrap();

    assert_eq!(outcome.records, (1..=5).map(rec).collect::<Vec<_>>());
    assert_eq!(outcome.stats.duplicate_records, 2);
    assert_eq!(outcome.stats.divergent_duplicates, 0);
    assert!(outcome.complete);
}

#[tokio::test]
async fn test_reset_during_recovery_is_isolated() {
    let port = Exchange {
        stream: [1, 2, 4, 6].map(rec).to_vec(),
        resends: HashMap::from([(5, rec(5))]),
        reset: HashSet::from([3]),
        ..Default::default()
    }
    .spawn()
    .await;

    let coord = coordinator(port, options());
    let outcome = coord.run().await.unwrap();

    let seqs: Vec<i32> = outcome.records.iter().map(|r| r.sequence).collect();
    assert_eq!(seqs, vec![1, 2, 4, 5, 6]);
    assert!(!outcome.complete);
    assert_eq!(outcome.missing, vec![SeqRange::single(3)]);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].seq, 3);
    assert!(matches!(
        outcome.failures[0].kind,
        FailureKind::Connection | FailureKind::Incomplete
    ));
    assert_eq!(coord.phase(), RecoveryPhase::Done);
}

#[tokio::test]
async fn test_unreachable_exchange_fails_run() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let coord = coordinator(port, options());
    let err = coord.run().await.unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(coord.phase(), RecoveryPhase::Failed);
}

#[tokio::test]
async fn test_concurrent_recovery_over_tcp() {
    let stream: Vec<Record> = (1..=40).filter(|s| s % 4 != 0).map(rec).collect();
    let resends = (1..=40)
        .filter(|s| s % 4 == 0)
        .map(|s| (s as u8, rec(s)))
        .collect();
    let port = Exchange {
        stream,
        resends,
        ..Default::default()
    }
    .spawn()
    .await;

    let outcome = coordinator(
        port,
        RecoveryOptions {
            max_inflight_resends: 6,
            ..options()
        },
    )
    .run()
    .await
    .unwrap();

    assert_eq!(outcome.records, (1..=40).map(rec).collect::<Vec<_>>());
    assert_eq!(outcome.stats.gaps_detected, 10);
    assert_eq!(outcome.stats.resends_recovered, 10);
    assert!(outcome.complete);
}

#[tokio::test]
async fn test_truncated_resend_targets() {
    let mut stream: Vec<Record> = (1..=300).map(rec).collect();
    stream.retain(|r| r.sequence != 260);
    let port = Exchange {
        stream,
        // 260 as u8 == 4
        resends: HashMap::from([(4, rec(260))]),
        ..Default::default()
    }
    .spawn()
    .await;

    let outcome = coordinator(
        port,
        RecoveryOptions {
            resend_range: ResendRange::Truncate,
            ..options()
        },
    )
    .run()
    .await
    .unwrap();

    assert!(outcome.complete);
    assert_eq!(outcome.records.len(), 300);
}

#[tokio::test]
async fn test_output_written_for_incomplete_run() {
    let port = Exchange {
        stream: [1, 3].map(rec).to_vec(),
        ..Default::default()
    }
    .spawn()
    .await;

    let outcome = coordinator(port, options()).run().await.unwrap();
    assert!(!outcome.complete);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("output.json");
    OutputWriter::new(&path).write(&outcome).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["complete"], false);
    assert_eq!(json["missing"], serde_json::json!([{ "from": 2, "to": 2 }]));
    assert_eq!(json["missing_count"], 1);
    assert_eq!(json["records"][1]["packetSequence"], 3);
    assert_eq!(json["failures"][0]["kind"], "incomplete");
}
