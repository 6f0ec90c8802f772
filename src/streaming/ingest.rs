// Ingest worker - decodes raw lines into the sample ring
//
// One worker per session. It is the only writer of its ring and the only task
// that suspends on transport reads. Bad lines are counted and skipped; the
// worker ends only on cancellation or when the transport goes away.

use crate::streaming::buffer::RingWriter;
use crate::streaming::metrics::{IngestCounters, ThroughputEstimator};
use crate::streaming::rate::Decimator;
use crate::streaming::sample::{DecodeError, SampleDecoder};
use crate::streaming::source::LineStream;
use crate::streaming::types::{StreamError, StreamResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Worker tuning
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Keep every Nth decoded sample (1 keeps all)
    pub decimate: u32,
    pub throughput_window: Duration,
    /// How often the published rate is refreshed when no lines arrive
    pub rate_refresh: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            decimate: 1,
            throughput_window: Duration::from_secs(2),
            rate_refresh: Duration::from_millis(250),
        }
    }
}

/// What happened to a single line
#[derive(Debug, PartialEq)]
pub enum LineOutcome {
    Appended { evicted: bool },
    Decimated,
    Dropped(DecodeError),
    Blank,
}

/// Observable worker status, published over a watch channel
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerStatus {
    Running,
    /// Stopped on request
    Cancelled,
    /// Transport ended or failed
    Failed(String),
}

pub struct IngestWorker {
    label: String,
    decoder: SampleDecoder,
    writer: RingWriter,
    counters: Arc<IngestCounters>,
    decimator: Decimator,
    estimator: ThroughputEstimator,
    rate_refresh: Duration,
}

impl IngestWorker {
    pub fn new(
        label: impl Into<String>,
        decoder: SampleDecoder,
        writer: RingWriter,
        counters: Arc<IngestCounters>,
        config: IngestConfig,
    ) -> Self {
        Self {
            label: label.into(),
            decoder,
            writer,
            counters,
            decimator: Decimator::new(config.decimate),
            estimator: ThroughputEstimator::new(config.throughput_window),
            rate_refresh: config.rate_refresh.max(Duration::from_millis(10)),
        }
    }

    /// Decode one line and append it; never fails
    pub fn process_line(&mut self, line: &str, now: Instant) -> LineOutcome {
        if line.trim().is_empty() {
            return LineOutcome::Blank;
        }
        self.counters.record_line();

        let sample = match self.decoder.decode(line) {
            Ok(sample) => sample,
            Err(e) => {
                self.counters.record_drop();
                let drops = self.counters.drop_count();
                if drops == 1 {
                    log::warn!("[{}] dropping malformed line: {}", self.label, e);
                } else {
                    log::debug!("[{}] dropped line #{}: {}", self.label, drops, e);
                }
                return LineOutcome::Dropped(e);
            }
        };

        self.counters.record_decoded();
        self.estimator.record(now);
        self.counters.publish_rate(self.estimator.rate(now));

        if !self.decimator.accept() {
            self.counters.record_decimated();
            return LineOutcome::Decimated;
        }

        let evicted = self.writer.append(sample);
        LineOutcome::Appended { evicted }
    }

    fn record_unreadable(&mut self, error: &StreamError) {
        self.counters.record_line();
        self.counters.record_drop();
        log::debug!("[{}] unreadable line: {}", self.label, error);
    }

    /// Pull lines until cancelled or the transport ends.
    ///
    /// `first_line` is a line already consumed during the session handshake.
    /// Cancellation is checked before every read, so once `cancel` fires no
    /// further sample is appended.
    pub async fn run(
        &mut self,
        lines: &mut LineStream,
        first_line: Option<String>,
        cancel: &CancellationToken,
    ) -> StreamResult<()> {
        if let Some(line) = first_line {
            if cancel.is_cancelled() {
                return Ok(());
            }
            self.process_line(&line, Instant::now());
        }

        let mut refresh = interval(self.rate_refresh);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    log::info!("[{}] ingest cancelled", self.label);
                    return Ok(());
                }

                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            self.process_line(&line, Instant::now());
                        }
                        Ok(None) => {
                            return Err(StreamError::Connection(
                                "telemetry stream closed by remote".to_string(),
                            ));
                        }
                        Err(e) if e.is_recoverable() => self.record_unreadable(&e),
                        Err(e) => return Err(e),
                    }
                }

                _ = refresh.tick() => {
                    let rate = self.estimator.rate(Instant::now());
                    self.counters.publish_rate(rate);
                }
            }
        }
    }

    /// Run on its own task. The line stream is dropped (and the pipe closed)
    /// when the task ends.
    pub fn spawn(
        mut self,
        mut lines: LineStream,
        first_line: Option<String>,
        cancel: CancellationToken,
    ) -> (JoinHandle<()>, watch::Receiver<WorkerStatus>) {
        let (status_tx, status_rx) = watch::channel(WorkerStatus::Running);

        let handle = tokio::spawn(async move {
            let result = self.run(&mut lines, first_line, &cancel).await;
            drop(lines);
            self.counters.publish_rate(0.0);

            let status = match result {
                Ok(()) => WorkerStatus::Cancelled,
                Err(e) => {
                    log::error!("[{}] ingest stopped: {}", self.label, e);
                    WorkerStatus::Failed(e.to_string())
                }
            };
            let _ = status_tx.send(status);
        });

        (handle, status_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::buffer::{BufferView, SampleRingBuffer};
    use crate::streaming::sample::{ChannelMode, Reading};

    fn line(seq: u64) -> String {
        format!(
            r#"{{"timestamp_ns": {}, "t_s": {}, "sensor_id": "imu0", "ax": {}, "ay": 0.5, "az": 9.8}}"#,
            seq * 5_000_000,
            seq as f64 * 0.005,
            seq
        )
    }

    fn worker(capacity: usize, decimate: u32) -> (IngestWorker, BufferView, Arc<IngestCounters>) {
        let (writer, view) = SampleRingBuffer::new(capacity);
        let counters = Arc::new(IngestCounters::new());
        let worker = IngestWorker::new(
            "test",
            SampleDecoder::new(ChannelMode::ACCEL),
            writer,
            Arc::clone(&counters),
            IngestConfig {
                decimate,
                ..Default::default()
            },
        );
        (worker, view, counters)
    }

    #[test]
    fn test_one_sample_per_well_formed_line() {
        let (mut worker, view, counters) = worker(100, 1);
        let now = Instant::now();
        for seq in 0..10 {
            assert_eq!(
                worker.process_line(&line(seq), now),
                LineOutcome::Appended { evicted: false }
            );
        }

        let snap = view.snapshot();
        assert_eq!(snap.len(), 10);
        let third = &snap.samples()[3];
        assert_eq!(third.timestamp_ns, 15_000_000);
        assert_eq!(third.t_s, 3.0 * 0.005);
        assert_eq!(third.reading, Reading::Accel { ax: 3.0, ay: 0.5, az: 9.8 });
        assert_eq!(counters.decoded_count(), 10);
        assert_eq!(counters.drop_count(), 0);
    }

    #[test]
    fn test_each_malformed_line_counts_once_and_processing_continues() {
        let (mut worker, view, counters) = worker(100, 1);
        let now = Instant::now();
        let malformed = [
            "garbage",
            r#"{"t_s": 0.1, "sensor_id": "imu0", "ax": 1, "ay": 1, "az": 1}"#,
            r#"{"timestamp_ns": "x", "t_s": 0.1, "sensor_id": "imu0", "ax": 1, "ay": 1, "az": 1}"#,
            r#"{"timestamp_ns": 1, "t_s": 0.1, "sensor_id": "imu0", "ax": 1"#,
        ];

        worker.process_line(&line(0), now);
        for (i, bad) in malformed.iter().enumerate() {
            assert!(matches!(worker.process_line(bad, now), LineOutcome::Dropped(_)));
            assert_eq!(counters.drop_count(), i as u64 + 1);
        }
        worker.process_line(&line(1), now);

        assert_eq!(view.len(), 2);
        assert_eq!(counters.lines_received(), 6);
    }

    #[test]
    fn test_blank_lines_ignored() {
        let (mut worker, view, counters) = worker(10, 1);
        assert_eq!(worker.process_line("   ", Instant::now()), LineOutcome::Blank);
        assert_eq!(counters.drop_count(), 0);
        assert_eq!(counters.lines_received(), 0);
        assert!(view.is_empty());
    }

    #[test]
    fn test_local_decimation() {
        let (mut worker, view, counters) = worker(100, 4);
        let now = Instant::now();
        for seq in 0..12 {
            worker.process_line(&line(seq), now);
        }
        let kept: Vec<u64> = view
            .snapshot()
            .iter()
            .map(|s| s.timestamp_ns / 5_000_000)
            .collect();
        assert_eq!(kept, vec![0, 4, 8]);
        assert_eq!(counters.decimated_count(), 9);
        assert_eq!(counters.decoded_count(), 12);
    }

    #[tokio::test]
    async fn test_run_reports_end_of_stream_as_connection_error() {
        let (mut worker, view, counters) = worker(100, 1);
        let input = format!("{}\nnot json\n{}\n", line(1), line(2));
        let mut lines = LineStream::new(std::io::Cursor::new(input.into_bytes()));
        let cancel = CancellationToken::new();

        let err = worker
            .run(&mut lines, Some(line(0)), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Connection(_)));

        let seqs: Vec<u64> = view
            .snapshot()
            .iter()
            .map(|s| s.timestamp_ns / 5_000_000)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(counters.drop_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_counts_as_drop() {
        let (mut worker, view, counters) = worker(100, 1);
        let mut input = line(0).into_bytes();
        input.extend_from_slice(b"\n\xff\xff\n");
        input.extend_from_slice(line(1).as_bytes());
        input.push(b'\n');
        let mut lines = LineStream::new(std::io::Cursor::new(input));

        let _ = worker.run(&mut lines, None, &CancellationToken::new()).await;
        assert_eq!(view.len(), 2);
        assert_eq!(counters.drop_count(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_pending_read() {
        let (worker, view, _counters) = worker(100, 1);
        let (mut tx, rx) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();

        let (handle, mut status) =
            worker.spawn(LineStream::new(rx), None, cancel.clone());

        {
            use tokio::io::AsyncWriteExt;
            tx.write_all(format!("{}\n", line(0)).as_bytes()).await.unwrap();
        }
        // Wait until the first sample lands
        for _ in 0..100 {
            if view.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(view.len(), 1);

        // Remote stays silent; cancellation alone must end the worker
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
        status.changed().await.ok();
        assert_eq!(*status.borrow(), WorkerStatus::Cancelled);
        drop(tx);
    }
}
