use super::{LinkCounters, MetricsSnapshot};
use crate::network::LinkId;
use anyhow::{Context, Result};
use csv::Writer;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// CSV sink for per-second snapshots.
pub struct MetricsLogger<W: Write = File> {
    writer: Writer<W>,
}

#[derive(Serialize)]
struct LinkRow {
    link: u32,
    delivered: u64,
    bytes: u64,
}

impl MetricsLogger<File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let writer = Writer::from_path(path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        Ok(Self { writer })
    }
}

impl<W: Write> MetricsLogger<W> {
    pub fn from_writer(inner: W) -> Self {
        Self { writer: Writer::from_writer(inner) }
    }

    pub fn log(&mut self, snapshot: &MetricsSnapshot) -> Result<()> {
        self.writer.serialize(snapshot)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn log_batch(&mut self, snapshots: &[MetricsSnapshot]) -> Result<()> {
        for snapshot in snapshots {
            self.writer.serialize(snapshot)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer.into_inner().map_err(|e| anyhow::anyhow!("flushing csv: {}", e.error()))
    }
}

/// Writes one row per destination link.
pub fn write_link_totals(path: impl AsRef<Path>, totals: &BTreeMap<LinkId, LinkCounters>) -> Result<()> {
    let path = path.as_ref();
    let mut writer = Writer::from_path(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    for (link, counters) in totals {
        writer.serialize(LinkRow {
            link: link.0,
            delivered: counters.delivered,
            bytes: counters.bytes,
        })?;
    }
    writer.flush()?;
    Ok(())
}
