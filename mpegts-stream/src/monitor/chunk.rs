//! The chunk file currently being written.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use stream_klv::TelemetrySample;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::rollover::{chunk_filename, ChunkProgress, CompletedChunk};

pub struct ChunkWriter {
    file: BufWriter<File>,
    path: PathBuf,
    sequence: u64,
    bytes: u64,
    started: Instant,
    last_write: Instant,
    started_at: DateTime<Utc>,
    samples: Vec<TelemetrySample>,
}

impl ChunkWriter {
    /// Open a new chunk file under `dir`.
    pub async fn create(dir: &Path, title: &str, sequence: u64, now: Instant) -> io::Result<Self> {
        let started_at = Utc::now();
        let path = dir.join(chunk_filename(title, sequence, started_at));
        let file = File::create(&path).await?;

        Ok(Self {
            file: BufWriter::new(file),
            path,
            sequence,
            bytes: 0,
            started: now,
            last_write: now,
            started_at,
            samples: Vec::new(),
        })
    }

    pub async fn write(&mut self, data: &[u8], now: Instant) -> io::Result<()> {
        self.file.write_all(data).await?;
        self.bytes += data.len() as u64;
        self.last_write = now;
        Ok(())
    }

    pub fn add_samples(&mut self, samples: impl IntoIterator<Item = TelemetrySample>) {
        self.samples.extend(samples);
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn progress(&self, now: Instant) -> ChunkProgress {
        ChunkProgress {
            bytes: self.bytes,
            elapsed: now.saturating_duration_since(self.started),
            idle: now.saturating_duration_since(self.last_write),
        }
    }

    /// Flush and close the file.
    pub async fn finish(mut self) -> io::Result<CompletedChunk> {
        self.file.flush().await?;
        self.file.shutdown().await?;

        Ok(CompletedChunk {
            path: self.path,
            sequence: self.sequence,
            byte_length: self.bytes,
            started_at: self.started_at,
            ended_at: Utc::now(),
            samples: self.samples,
        })
    }

    /// Close and delete the file without committing it.
    pub async fn discard(self) {
        let path = self.path;
        drop(self.file);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("Failed to remove abandoned chunk {}: {}", path.display(), e);
            }
        }
    }
}
