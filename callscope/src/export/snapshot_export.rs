use callscope_common::{Delta, DeltaCodec, DeltaEncoder, Snapshot};
use log::debug;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::ExportError;

/// Export document container
#[derive(Debug, Serialize)]
struct ExportDocument<'a> {
    snapshot: Option<&'a Snapshot>,
    /// Every non-empty delta, the first one a full replace
    deltas: &'a [Delta],
}

/// Accumulates snapshots as a delta stream
#[derive(Debug, Default)]
pub struct SnapshotExporter {
    encoder: DeltaEncoder,
    deltas: Vec<Delta>,
    latest: Option<Snapshot>,
}

impl SnapshotExporter {
    #[must_use]
    pub fn new(codec: DeltaCodec) -> Self {
        Self { encoder: DeltaEncoder::new(codec), deltas: Vec::new(), latest: None }
    }

    /// Record the next snapshot. Returns the delta against the previous one,
    /// `None` when nothing changed.
    ///
    /// # Errors
    /// Returns an error if the snapshot cannot be encoded.
    pub fn record(&mut self, snapshot: Snapshot) -> Result<Option<Delta>, ExportError> {
        let delta = self.encoder.encode(&snapshot)?;
        match &delta {
            Some(delta) => self.deltas.push(delta.clone()),
            None => debug!("snapshot unchanged, no delta"),
        }
        self.latest = Some(snapshot);
        Ok(delta)
    }

    #[must_use]
    pub fn latest(&self) -> Option<&Snapshot> {
        self.latest.as_ref()
    }

    #[must_use]
    pub fn delta_count(&self) -> usize {
        self.deltas.len()
    }

    /// Write the export document as JSON.
    ///
    /// # Errors
    /// Returns an error on serialization or write failure.
    pub fn export<W: Write>(&self, writer: W) -> Result<(), ExportError> {
        let document = ExportDocument { snapshot: self.latest.as_ref(), deltas: &self.deltas };
        serde_json::to_writer_pretty(writer, &document)?;
        Ok(())
    }

    /// Write the export document to `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn export_to_file(&self, path: &Path) -> Result<(), ExportError> {
        let write_failed = |source| ExportError::Write { path: path.to_path_buf(), source };
        let file = File::create(path).map_err(write_failed)?;
        let mut writer = BufWriter::new(file);
        self.export(&mut writer)?;
        writer.flush().map_err(write_failed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(calls: u64) -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.calls.insert("eval".to_owned(), calls);
        snapshot
    }

    #[test]
    fn test_unchanged_snapshot_adds_no_delta() {
        let mut exporter = SnapshotExporter::default();
        assert!(matches!(exporter.record(snapshot(1)).unwrap(), Some(Delta::Replace { .. })));
        assert!(exporter.record(snapshot(1)).unwrap().is_none());
        assert!(exporter.record(snapshot(2)).unwrap().is_some());
        assert_eq!(exporter.delta_count(), 2);
        assert_eq!(exporter.latest(), Some(&snapshot(2)));
    }

    #[test]
    fn test_export_document_shape() {
        let mut exporter = SnapshotExporter::default();
        exporter.record(snapshot(3)).unwrap();

        let mut buffer = Vec::new();
        exporter.export(&mut buffer).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(parsed["snapshot"]["calls"]["eval"], 3);
        assert_eq!(parsed["deltas"].as_array().map(Vec::len), Some(1));
        assert_eq!(parsed["deltas"][0]["op"], "replace");
    }

    #[test]
    fn test_empty_export() {
        let mut buffer = Vec::new();
        SnapshotExporter::default().export(&mut buffer).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert!(parsed["snapshot"].is_null());
    }

    #[test]
    fn test_unwritable_path_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("session.json");
        let err = SnapshotExporter::default().export_to_file(&path).unwrap_err();

        match &err {
            ExportError::Write { path: failed, .. } => assert_eq!(failed, &path),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("session.json"));
    }
}
