//! Datagram processing for one stream.
//!
//! Every accepted datagram is written unchanged to the current chunk file
//! and, packet by packet, fed to the KLV extractor. Finished chunks are
//! committed on the blocking pool so that reception never waits on the
//! catalog.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use stream_klv::{KlvExtractor, PacketAligner, TelemetrySample, TsPacket};
use tokio::task::{JoinError, JoinSet};

use super::chunk::ChunkWriter;
use super::{MonitorState, MonitorStats, StateCell};
use crate::catalog::Record;
use crate::config::StreamMonitorConfig;
use crate::rollover::{CatalogRolloverAction, RolloverActionError, RolloverCondition};
use crate::ts_analyzer::TsPacketAnalyzer;

pub type CommitResult = Result<Record, RolloverActionError>;

/// Log every n-th dropped datagram after the first.
const DROP_LOG_INTERVAL: u64 = 100;

pub struct StreamProcessor {
    title: String,
    chunk_dir: PathBuf,
    aligner: PacketAligner,
    extractor: KlvExtractor,
    analyzer: TsPacketAnalyzer,
    writer: Option<ChunkWriter>,
    condition: RolloverCondition,
    sequence: u64,
    action: Arc<CatalogRolloverAction>,
    pub(crate) commits: JoinSet<CommitResult>,
    stats: Arc<MonitorStats>,
    state: Arc<StateCell>,
    scratch: Vec<TelemetrySample>,
}

impl StreamProcessor {
    pub fn new(
        config: &StreamMonitorConfig,
        action: Arc<CatalogRolloverAction>,
        chunk_dir: PathBuf,
        stats: Arc<MonitorStats>,
        state: Arc<StateCell>,
    ) -> Self {
        Self {
            title: config.title.clone(),
            chunk_dir,
            aligner: PacketAligner::new(),
            extractor: KlvExtractor::new(),
            analyzer: TsPacketAnalyzer::new(),
            writer: None,
            condition: config.rollover_condition(),
            sequence: 0,
            action,
            commits: JoinSet::new(),
            stats,
            state,
            scratch: Vec::new(),
        }
    }

    pub fn stats(&self) -> &Arc<MonitorStats> {
        &self.stats
    }

    /// Bytes in the chunk being written.
    pub fn current_chunk_bytes(&self) -> u64 {
        self.writer.as_ref().map_or(0, ChunkWriter::bytes)
    }

    /// Handle one datagram. Returns true if it completed a chunk.
    pub async fn handle_datagram(&mut self, data: &[u8], now: Instant) -> bool {
        let Self {
            title,
            aligner,
            extractor,
            analyzer,
            scratch,
            ..
        } = self;

        let mut gaps = 0u64;
        let pushed = aligner.push(data, |bytes| match TsPacket::parse(bytes) {
            Ok(packet) => {
                if analyzer.observe(&packet) {
                    gaps += 1;
                }
                extractor.push_parsed(&packet, scratch);
            }
            Err(e) => debug!("[Stream {}] Skipping packet: {}", title, e),
        });

        if let Err(e) = pushed {
            let dropped = self.stats.record_dropped();
            if dropped == 1 || dropped % DROP_LOG_INTERVAL == 0 {
                warn!(
                    "[Stream {}] Dropped datagram of {} bytes: {} ({} dropped so far)",
                    self.title,
                    data.len(),
                    e,
                    dropped
                );
            }
            return false;
        }

        if gaps > 0 {
            self.stats.record_continuity_errors(gaps);
            debug!(
                "[Stream {}] {} continuity gap(s) in datagram",
                self.title, gaps
            );
        }
        self.stats.record_datagram(data.len());

        if let Err(e) = self.write(data, now).await {
            self.abandon_chunk(&e.to_string()).await;
            return false;
        }

        if self.should_roll(now) {
            self.rollover().await;
            return true;
        }
        false
    }

    /// Periodic check for time-based conditions. Returns true if a chunk
    /// was completed.
    pub async fn on_tick(&mut self, now: Instant) -> bool {
        if self.should_roll(now) {
            self.rollover().await;
            return true;
        }
        false
    }

    fn should_roll(&self, now: Instant) -> bool {
        self.writer
            .as_ref()
            .map_or(false, |w| self.condition.is_satisfied(&w.progress(now)))
    }

    async fn write(&mut self, data: &[u8], now: Instant) -> std::io::Result<()> {
        if self.writer.is_none() {
            let sequence = self.sequence + 1;
            let writer = ChunkWriter::create(&self.chunk_dir, &self.title, sequence, now).await?;
            debug!(
                "[Stream {}] Opened chunk #{} at {}",
                self.title,
                sequence,
                writer.path().display()
            );
            self.sequence = sequence;
            self.stats.record_chunk_started();
            self.writer = Some(writer);
        }

        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        writer.write(data, now).await?;

        let count = self.scratch.len();
        if count > 0 {
            writer.add_samples(self.scratch.drain(..));
            self.stats.record_samples(count);
        }
        Ok(())
    }

    /// Drop the current chunk's content and samples. The chunk number is
    /// only reused when the chunk file was never opened.
    async fn abandon_chunk(&mut self, reason: &str) {
        self.scratch.clear();
        let message = match self.writer.take() {
            Some(writer) => {
                let sequence = writer.sequence();
                writer.discard().await;
                format!("chunk #{} abandoned: {}", sequence, reason)
            }
            None => format!("could not open chunk #{}: {}", self.sequence + 1, reason),
        };
        self.stats.record_chunk_lost();
        error!("[Stream {}] Write failure, {}", self.title, message);
        self.stats.record_error(message);
    }

    /// Close the current chunk and start committing it. The next datagram
    /// opens a new chunk.
    pub async fn rollover(&mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };
        let sequence = writer.sequence();
        let path = writer.path().to_path_buf();

        let monitoring = self.state.get() == MonitorState::Monitoring;
        if monitoring {
            self.state.set(MonitorState::RollingOver);
        }
        match writer.finish().await {
            Ok(chunk) => {
                info!(
                    "[Stream {}] Rolling over chunk #{} ({} bytes, {} samples)",
                    self.title,
                    sequence,
                    chunk.byte_length,
                    chunk.samples.len()
                );
                let action = Arc::clone(&self.action);
                self.commits.spawn_blocking(move || action.do_action(chunk));
            }
            Err(e) => {
                error!(
                    "[Stream {}] Failed to close chunk #{}, chunk lost: {}",
                    self.title, sequence, e
                );
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    debug!(
                        "[Stream {}] Failed to remove {}: {}",
                        self.title,
                        path.display(),
                        e
                    );
                }
                self.stats.record_chunk_lost();
                self.stats
                    .record_error(format!("chunk #{} lost: {}", sequence, e));
            }
        }
        if monitoring {
            self.state.set(MonitorState::Monitoring);
        }
    }

    /// Account for a finished commit.
    pub fn reap(&self, joined: Result<CommitResult, JoinError>) {
        match joined {
            Ok(Ok(_)) => self.stats.record_chunk_committed(),
            Ok(Err(e)) => {
                self.stats.record_chunk_lost();
                self.stats.record_error(e.to_string());
            }
            Err(e) => {
                error!("[Stream {}] Rollover task failed: {}", self.title, e);
                self.stats.record_chunk_lost();
                self.stats.record_error(e.to_string());
            }
        }
    }

    /// Apply new thresholds and action settings. The current chunk is
    /// completed under the old settings.
    pub async fn apply_config(
        &mut self,
        config: &StreamMonitorConfig,
        action: Arc<CatalogRolloverAction>,
    ) {
        self.rollover().await;
        self.title = config.title.clone();
        self.condition = config.rollover_condition();
        self.action = action;
        info!(
            "[Stream {}] Rollover now on {}",
            self.title,
            self.condition.describe()
        );
    }

    /// Complete the last chunk and wait up to `timeout` for every commit.
    pub async fn shutdown(&mut self, timeout: Duration) {
        if let Some(writer) = self.writer.as_mut() {
            self.extractor.finish(&mut self.scratch);
            let count = self.scratch.len();
            writer.add_samples(self.scratch.drain(..));
            self.stats.record_samples(count);
        }
        self.rollover().await;
        self.aligner.reset();

        let quality = self.analyzer.snapshot();
        let extracted = self.extractor.stats();
        info!(
            "[Stream {}] {} packets ({} continuity gaps, {} transport errors), {} KLV units decoded, {} skipped",
            self.title,
            quality.packets_total,
            quality.packets_dropped,
            quality.packets_error,
            extracted.units_decoded,
            extracted.units_skipped
        );
        self.analyzer.reset();

        if self.commits.is_empty() {
            return;
        }
        info!(
            "[Stream {}] Waiting for {} chunk commit(s)",
            self.title,
            self.commits.len()
        );

        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = self.commits.join_next().await {
                self.reap(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "[Stream {}] {} chunk commit(s) still running after {:?}",
                self.title,
                self.commits.len(),
                timeout
            );
            self.commits.detach_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryCatalog;
    use crate::catalog::{attribute, CatalogHandle, RecordKind};
    use crate::config::{property, PropertyMap, PropertyValue};
    use crate::monitor::testing::{TrafficGenerator, DATAGRAM_SIZE};
    use crate::rollover::ParentState;
    use std::path::Path;

    fn config(byte_count: i64) -> StreamMonitorConfig {
        let mut props = PropertyMap::new();
        props.insert(
            property::TITLE.into(),
            PropertyValue::Text("UDP Stream Test".into()),
        );
        props.insert(
            property::MONITORED_ADDRESS.into(),
            PropertyValue::Text("udp://127.0.0.1:0".into()),
        );
        props.insert(property::BYTE_COUNT.into(), PropertyValue::Integer(byte_count));
        StreamMonitorConfig::from_properties(&props).unwrap()
    }

    fn processor(
        config: &StreamMonitorConfig,
        catalog: &Arc<MemoryCatalog>,
        dir: &Path,
    ) -> StreamProcessor {
        let mut settings = config.rollover_settings();
        settings.retry_pause = Duration::ZERO;
        let handle: CatalogHandle = catalog.clone();
        let action = CatalogRolloverAction::new(handle, Arc::new(ParentState::new()), settings);
        StreamProcessor::new(
            config,
            Arc::new(action),
            dir.to_path_buf(),
            Arc::new(MonitorStats::new()),
            Arc::new(StateCell::new(MonitorState::Monitoring)),
        )
    }

    #[tokio::test]
    async fn test_chunk_lengths_sum_to_received_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        let config = config(10_000);
        let mut processor = processor(&config, &catalog, dir.path());

        let mut traffic = TrafficGenerator::new(5);
        let t0 = Instant::now();
        for i in 0..50u64 {
            let datagram = traffic.next_datagram();
            processor
                .handle_datagram(&datagram, t0 + Duration::from_millis(i))
                .await;
        }
        processor.shutdown(Duration::from_secs(30)).await;

        let total = 50 * DATAGRAM_SIZE as u64;
        let bytes = catalog.content_bytes();
        assert_eq!(bytes.len() as u64, (total + 9_999) / 10_000);
        assert_eq!(bytes.iter().sum::<u64>(), total);
        assert_eq!(processor.stats().snapshot().bytes_received, total);
        assert_eq!(processor.stats().snapshot().chunks_committed, bytes.len() as u64);
        assert_eq!(catalog.records(RecordKind::Parent).len(), 1);
        // Chunk files are gone once committed.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_twenty_second_stream_yields_two_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        let config = config(5_000_000);
        let mut processor = processor(&config, &catalog, dir.path());

        let count = 1877u64;
        let span = Duration::from_secs(20);
        let mut traffic = TrafficGenerator::new(25);
        let t0 = Instant::now();
        let mut last = t0;
        for i in 0..count {
            last = t0 + span.mul_f64(i as f64 / count as f64);
            let datagram = traffic.next_datagram();
            processor.handle_datagram(&datagram, last).await;
        }
        assert!(processor.on_tick(last + Duration::from_secs(6)).await);
        processor.shutdown(Duration::from_secs(30)).await;

        assert_eq!(catalog.content_bytes().len(), 2);
        assert_eq!(
            catalog.content_bytes().iter().sum::<u64>(),
            count * DATAGRAM_SIZE as u64
        );

        let parents = catalog.records(RecordKind::Parent);
        let children = catalog.records(RecordKind::Child);
        assert_eq!(parents.len(), 1);
        assert_eq!(children.len(), 2);

        let parent = &parents[0];
        let related = parent.list(attribute::ASSOCIATIONS_RELATED).unwrap();
        assert_eq!(related.len(), 2);

        let start = parent.date(attribute::TEMPORAL_START).unwrap();
        let end = parent.date(attribute::TEMPORAL_END).unwrap();
        for child in &children {
            assert!(related.contains(&child.id));
            assert!(start <= child.date(attribute::TEMPORAL_START).unwrap());
            assert!(end >= child.date(attribute::TEMPORAL_END).unwrap());
        }
    }

    #[tokio::test]
    async fn test_misaligned_datagram_dropped_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        let config = config(5_000_000);
        let mut processor = processor(&config, &catalog, dir.path());

        let mut traffic = TrafficGenerator::new(1);
        let t0 = Instant::now();
        processor.handle_datagram(&traffic.next_datagram(), t0).await;
        processor.handle_datagram(&[0u8; 100], t0).await;
        processor.handle_datagram(&[], t0).await;
        processor.handle_datagram(&traffic.next_datagram(), t0).await;

        let stats = processor.stats().snapshot();
        assert_eq!(stats.datagrams_dropped, 2);
        assert_eq!(stats.datagrams, 2);
        assert_eq!(processor.current_chunk_bytes(), 2 * DATAGRAM_SIZE as u64);

        processor.shutdown(Duration::from_secs(30)).await;
        assert_eq!(catalog.content_bytes(), vec![2 * DATAGRAM_SIZE as u64]);
    }

    #[tokio::test]
    async fn test_split_datagrams_still_yield_samples() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        let config = config(5_000_000);
        let mut processor = processor(&config, &catalog, dir.path());

        let mut traffic = TrafficGenerator::new(1);
        let stream: Vec<u8> = (0..4).flat_map(|_| traffic.next_datagram()).collect();
        let t0 = Instant::now();
        for piece in stream.chunks(500) {
            processor.handle_datagram(piece, t0).await;
        }
        processor.shutdown(Duration::from_secs(30)).await;

        let stats = processor.stats().snapshot();
        assert_eq!(stats.samples, 4);
        assert_eq!(stats.datagrams_dropped, 0);
        let children = catalog.records(RecordKind::Child);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].text(attribute::SENSOR_ID), Some("EO"));
    }

    #[tokio::test]
    async fn test_apply_config_rolls_current_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        let config = config(5_000_000);
        let mut processor = processor(&config, &catalog, dir.path());

        let mut traffic = TrafficGenerator::new(10);
        processor
            .handle_datagram(&traffic.next_datagram(), Instant::now())
            .await;

        let smaller = self::config(DATAGRAM_SIZE as i64);
        let action = Arc::clone(&processor.action);
        processor.apply_config(&smaller, action).await;
        assert_eq!(processor.current_chunk_bytes(), 0);

        assert!(
            processor
                .handle_datagram(&traffic.next_datagram(), Instant::now())
                .await
        );
        processor.shutdown(Duration::from_secs(30)).await;
        assert_eq!(catalog.content_bytes().len(), 2);
    }

    #[tokio::test]
    async fn test_unopenable_chunk_is_lost_and_next_commits() {
        let dir = tempfile::tempdir().unwrap();
        let chunk_dir = dir.path().join("chunks");
        let catalog = Arc::new(MemoryCatalog::new());
        let config = config(5_000_000);
        let mut processor = processor(&config, &catalog, &chunk_dir);

        let mut traffic = TrafficGenerator::new(1);
        let t0 = Instant::now();
        assert!(!processor.handle_datagram(&traffic.next_datagram(), t0).await);
        assert_eq!(processor.current_chunk_bytes(), 0);
        assert_eq!(processor.stats().snapshot().chunks_lost, 1);
        assert!(processor.stats().last_error().is_some());

        std::fs::create_dir_all(&chunk_dir).unwrap();
        processor.handle_datagram(&traffic.next_datagram(), t0).await;
        processor.shutdown(Duration::from_secs(30)).await;

        let stats = processor.stats().snapshot();
        assert_eq!(stats.chunks_lost, 1);
        assert_eq!(stats.chunks_committed, 1);
        assert_eq!(catalog.content_bytes(), vec![DATAGRAM_SIZE as u64]);
        let children = catalog.records(RecordKind::Child);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].title(), Some("UDP Stream Test chunk 1"));
    }

    #[tokio::test]
    async fn test_abandoned_chunk_creates_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        let config = config(5_000_000);
        let mut processor = processor(&config, &catalog, dir.path());

        let mut traffic = TrafficGenerator::new(1);
        let t0 = Instant::now();
        processor.handle_datagram(&traffic.next_datagram(), t0).await;
        processor.handle_datagram(&traffic.next_datagram(), t0).await;
        processor.abandon_chunk("No space left on device").await;

        assert_eq!(processor.current_chunk_bytes(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(processor.stats().snapshot().chunks_lost, 1);

        processor.handle_datagram(&traffic.next_datagram(), t0).await;
        processor.shutdown(Duration::from_secs(30)).await;

        assert_eq!(catalog.content_bytes(), vec![DATAGRAM_SIZE as u64]);
        assert_eq!(catalog.records(RecordKind::Parent).len(), 1);
        let children = catalog.records(RecordKind::Child);
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].title(), Some("UDP Stream Test chunk 2"));
    }
}
