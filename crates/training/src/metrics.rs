//! Scalar metric collection.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub const SCALARS_FILE: &str = "scalars.jsonl";

/// Destination for step-keyed scalar metrics.
pub trait MetricsSink {
    fn push_scalar(&mut self, tag: &str, value: f64, step: u64) -> io::Result<()>;
}

impl<M: MetricsSink + ?Sized> MetricsSink for &mut M {
    fn push_scalar(&mut self, tag: &str, value: f64, step: u64) -> io::Result<()> {
        (**self).push_scalar(tag, value, step)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarRecord {
    pub tag: String,
    pub value: f64,
    pub step: u64,
    pub wall_time: f64,
}

/// In-memory sink.
impl MetricsSink for Vec<ScalarRecord> {
    fn push_scalar(&mut self, tag: &str, value: f64, step: u64) -> io::Result<()> {
        self.push(ScalarRecord {
            tag: tag.to_string(),
            value,
            step,
            wall_time: wall_time(),
        });
        Ok(())
    }
}

fn wall_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Appends one JSON object per scalar to `<root>/<run>/scalars.jsonl`.
pub struct ScalarLogger {
    path: PathBuf,
    out: BufWriter<File>,
}

impl ScalarLogger {
    pub fn create(logs_root: &Path, run: &str) -> io::Result<Self> {
        let dir = logs_root.join(run);
        fs::create_dir_all(&dir)?;
        let path = dir.join(SCALARS_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for ScalarLogger {
    fn push_scalar(&mut self, tag: &str, value: f64, step: u64) -> io::Result<()> {
        let record = ScalarRecord {
            tag: tag.to_string(),
            value,
            step,
            wall_time: wall_time(),
        };
        serde_json::to_writer(&mut self.out, &record)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

/// Read back a scalars file written by [`ScalarLogger`].
pub fn read_scalars(path: &Path) -> io::Result<Vec<ScalarRecord>> {
    let file = File::open(path)?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}
