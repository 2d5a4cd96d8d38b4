//! Snapshot sink
//!
//! Buffers depth snapshots and appends them to one CSV file per contract and
//! UTC day. When the day rolls over the previous file is gzip-compressed.
//! File I/O happens on a blocking worker so the driver loop only ever does a
//! channel send.

use chrono::{NaiveDate, TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use rust_decimal::Decimal;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::aggregator::{DepthBucket, Snapshot, BUCKET_COUNT};
use crate::error::{RecorderError, Result};

/// Decimal places kept for weighted prices in the CSV
const PRICE_DP: u32 = 8;

/// Destination for aggregated snapshots
#[cfg_attr(test, mockall::automock)]
pub trait SnapshotSink: Send {
    /// Enqueue a snapshot; must not block on storage
    fn push(&mut self, snapshot: Snapshot) -> Result<()>;
}

/// CSV header shared by every file
pub fn csv_header() -> Vec<String> {
    let mut header = vec!["timestamp".to_string()];
    for side in ["bid", "ask"] {
        for i in 0..BUCKET_COUNT {
            header.push(format!("{}_group_{}_price", side, i));
            header.push(format!("{}_group_{}_size", side, i));
        }
    }
    header
}

fn format_decimal(value: Option<Decimal>, dp: Option<u32>) -> String {
    match value {
        Some(v) => {
            let v = dp.map_or(v, |dp| v.round_dp(dp));
            v.normalize().to_string()
        }
        None => String::new(),
    }
}

/// One CSV row; empty buckets become empty cells
pub fn csv_row(snapshot: &Snapshot) -> Vec<String> {
    let mut row = Vec::with_capacity(1 + 4 * BUCKET_COUNT);
    row.push(snapshot.timestamp.to_string());
    let sides: [&[DepthBucket; BUCKET_COUNT]; 2] = [&snapshot.bid_buckets, &snapshot.ask_buckets];
    for buckets in sides {
        for bucket in buckets.iter() {
            row.push(format_decimal(bucket.weighted_price, Some(PRICE_DP)));
            row.push(format_decimal(bucket.total_size, None));
        }
    }
    row
}

/// UTC calendar day of a unix timestamp
pub fn utc_day(timestamp: i64) -> NaiveDate {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}

/// Synchronous buffered CSV writer with daily rotation
#[derive(Debug)]
pub struct CsvWriter {
    dir: PathBuf,
    contract: String,
    flush_every: usize,
    buffer: Vec<Snapshot>,
    current_day: Option<NaiveDate>,
    /// Finished days whose plain file still awaits compression
    pending_compress: Vec<NaiveDate>,
}

impl CsvWriter {
    pub fn new(dir: impl Into<PathBuf>, contract: &str, flush_every: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            contract: contract.to_string(),
            flush_every: flush_every.max(1),
            buffer: Vec::with_capacity(flush_every),
            current_day: None,
            pending_compress: Vec::new(),
        })
    }

    /// `{dir}/{contract}_{YYYY-MM-DD}.csv`
    pub fn file_path(&self, day: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}_{}.csv", self.contract, day.format("%Y-%m-%d")))
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Days rotated out but not yet compressed
    pub fn pending_compress(&self) -> &[NaiveDate] {
        &self.pending_compress
    }

    /// Buffer a snapshot, rotating first if it belongs to a new day
    ///
    /// A failed compression never drops the snapshot; the day stays queued
    /// and is retried on the next flush.
    pub fn push(&mut self, snapshot: Snapshot) -> Result<()> {
        let day = utc_day(snapshot.timestamp);

        if let Some(current) = self.current_day.filter(|current| *current != day) {
            self.write_buffer()?;
            self.pending_compress.push(current);
            self.current_day = Some(day);
            self.buffer.push(snapshot);
            self.compress_pending();
        } else {
            self.current_day = Some(day);
            self.buffer.push(snapshot);
        }

        if self.buffer.len() >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    /// Append everything buffered to the current day's file, then retry any
    /// outstanding compression
    ///
    /// Returns the number of rows written.
    pub fn flush(&mut self) -> Result<usize> {
        let written = self.write_buffer()?;
        self.compress_pending();
        Ok(written)
    }

    fn compress_pending(&mut self) {
        let days = std::mem::take(&mut self.pending_compress);
        for day in days {
            if let Err(e) = self.compress(day) {
                warn!(contract = %self.contract, day = %day, error = %e, "Compression failed, will retry");
                self.pending_compress.push(day);
            }
        }
    }

    fn write_buffer(&mut self) -> Result<usize> {
        let Some(day) = self.current_day else {
            return Ok(0);
        };
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let path = self.file_path(day);
        let is_new = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        if is_new {
            writer.write_record(csv_header())?;
        }
        for snapshot in &self.buffer {
            writer.write_record(csv_row(snapshot))?;
        }
        writer.flush()?;

        let written = self.buffer.len();
        self.buffer.clear();
        info!(contract = %self.contract, rows = written, path = %path.display(), "Flushed snapshots to file");
        Ok(written)
    }

    /// Gzip a finished day's file to `.csv.gz` and remove the original
    pub fn compress(&self, day: NaiveDate) -> Result<Option<PathBuf>> {
        let path = self.file_path(day);
        if !path.exists() {
            return Ok(None);
        }

        let gz_path = gz_path(&path);
        let mut input = BufReader::new(File::open(&path)?);
        let mut encoder = GzEncoder::new(BufWriter::new(File::create(&gz_path)?), Compression::default());
        io::copy(&mut input, &mut encoder)?;
        encoder
            .finish()?
            .into_inner()
            .map_err(|e| RecorderError::StorageError(e.to_string()))?;
        fs::remove_file(&path)?;

        info!(contract = %self.contract, path = %gz_path.display(), "Compressed and removed daily file");
        Ok(Some(gz_path))
    }
}

fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

/// Non-blocking handle feeding a [`CsvWriter`] on a blocking worker
#[derive(Debug, Clone)]
pub struct CsvSink {
    tx: mpsc::UnboundedSender<Snapshot>,
}

impl CsvSink {
    /// Start the writer worker; it drains and flushes once every handle is dropped
    pub fn spawn(mut writer: CsvWriter) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Snapshot>();

        let handle = tokio::task::spawn_blocking(move || {
            while let Some(snapshot) = rx.blocking_recv() {
                if let Err(e) = writer.push(snapshot) {
                    error!(contract = %writer.contract, error = %e, "Failed to store snapshots");
                }
            }
            if let Err(e) = writer.flush() {
                error!(contract = %writer.contract, error = %e, "Failed to flush on shutdown");
            }
        });

        (Self { tx }, handle)
    }
}

impl SnapshotSink for CsvSink {
    fn push(&mut self, snapshot: Snapshot) -> Result<()> {
        self.tx.send(snapshot).map_err(|_| RecorderError::SinkClosed)
    }
}
