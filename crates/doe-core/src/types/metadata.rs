//! Lineage, timestamps and error list shared by every scan envelope.

use crate::error::ScanError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a fresh identifier for scans, runs and EDSR hops
#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Metadata carried by every scan envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanMetadata {
    /// Unique identifier of this scan
    pub scan_id: String,

    /// Scan that scheduled this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_scan_id: Option<String>,

    /// First scan of the lineage (a DDR or EDSR scan, or the scan itself)
    pub root_scan_id: String,

    /// Ingestion event this scan derives from
    pub run_id: String,

    /// Measurement host that executes the scan
    pub vantage_point: String,

    /// When the scan was created
    pub scheduled: DateTime<Utc>,

    /// When a handler picked it up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,

    /// When the handler completed it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,

    /// Errors accumulated while executing
    #[serde(default)]
    pub errors: Vec<ScanError>,
}

impl ScanMetadata {
    /// Metadata for a root scan created by an ingester
    #[must_use]
    pub fn new_root(run_id: impl Into<String>, vantage_point: impl Into<String>) -> Self {
        let scan_id = new_id();
        Self {
            root_scan_id: scan_id.clone(),
            scan_id,
            parent_scan_id: None,
            run_id: run_id.into(),
            vantage_point: vantage_point.into(),
            scheduled: Utc::now(),
            started: None,
            finished: None,
            errors: Vec::new(),
        }
    }

    /// Metadata for a scan scheduled by this one.
    ///
    /// Root, run and vantage point are inherited unchanged.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            scan_id: new_id(),
            parent_scan_id: Some(self.scan_id.clone()),
            root_scan_id: self.root_scan_id.clone(),
            run_id: self.run_id.clone(),
            vantage_point: self.vantage_point.clone(),
            scheduled: Utc::now(),
            started: None,
            finished: None,
            errors: Vec::new(),
        }
    }

    /// Record that execution started
    pub fn start(&mut self) {
        if self.finished.is_none() {
            self.started = Some(Utc::now().max(self.scheduled));
        }
    }

    /// Seal the envelope; later errors are ignored
    pub fn finish(&mut self) {
        if self.finished.is_some() {
            return;
        }
        let started = *self.started.get_or_insert_with(|| Utc::now().max(self.scheduled));
        self.finished = Some(Utc::now().max(started));
    }

    /// Returns true once the envelope is sealed
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Append an error; returns false if the envelope is already sealed
    pub fn add_error(&mut self, error: ScanError) -> bool {
        if self.is_finished() {
            return false;
        }
        self.errors.push(error);
        true
    }

    /// Returns true if any accumulated error is critical
    #[must_use]
    pub fn has_critical_error(&self) -> bool {
        self.errors.iter().any(|e| e.critical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCause;

    #[test]
    fn test_root_scan() {
        let meta = ScanMetadata::new_root("run-1", "vp-eu");
        assert!(!meta.scan_id.is_empty());
        assert_eq!(meta.root_scan_id, meta.scan_id);
        assert!(meta.parent_scan_id.is_none());
        assert_eq!(meta.vantage_point, "vp-eu");
    }

    #[test]
    fn test_child_lineage() {
        let root = ScanMetadata::new_root("run-1", "vp-eu");
        let child = root.child();
        let grandchild = child.child();
        assert_ne!(child.scan_id, root.scan_id);
        assert_eq!(child.parent_scan_id.as_deref(), Some(root.scan_id.as_str()));
        assert_eq!(grandchild.root_scan_id, root.scan_id);
        assert_eq!(grandchild.run_id, "run-1");
        assert_eq!(grandchild.vantage_point, "vp-eu");
    }

    #[test]
    fn test_timestamps_ordered() {
        let mut meta = ScanMetadata::new_root("run-1", "vp");
        meta.start();
        meta.finish();
        let started = meta.started.unwrap();
        let finished = meta.finished.unwrap();
        assert!(meta.scheduled <= started);
        assert!(started <= finished);
    }

    #[test]
    fn test_finish_without_start() {
        let mut meta = ScanMetadata::new_root("run-1", "vp");
        meta.finish();
        assert!(meta.started.is_some());
        assert!(meta.scheduled <= meta.started.unwrap());
    }

    #[test]
    fn test_sealed_envelope_rejects_errors() {
        let mut meta = ScanMetadata::new_root("run-1", "vp");
        assert!(meta.add_error(ScanError::scan(ErrorCause::Other, false, "first")));
        meta.finish();
        let finished = meta.finished;
        assert!(!meta.add_error(ScanError::scan(ErrorCause::Other, true, "late")));
        meta.finish();
        assert_eq!(meta.errors.len(), 1);
        assert_eq!(meta.finished, finished);
        assert!(!meta.has_critical_error());
    }
}
