//! Reconciliation of the blob and metadata stores.
//!
//! Failed compensations, timed-out writes and failed record deletes can leave the stores out
//! of step. A reconciliation pass finds:
//!
//! - **orphan blobs**: blobs under the study prefix that no record references;
//! - **dangling records**: records whose blob is missing.
//!
//! Orphans younger than the grace period are left alone, since a create or update may be
//! between its upload and its metadata write. Age comes from the timestamp embedded in the
//! storage path; blobs without one are reported but never removed. Dangling records are only
//! reported: removing a record is a user-visible loss that needs a human decision.

use crate::error::{StudyError, StudyResult};
use crate::path_namer::PathNamer;
use crate::stores::{BlobStore, MetadataStore, StudyQuery};
use crate::study::StudyRecord;
use crate::timeout::GuardedStores;
use catalog_types::StoragePath;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scanned_blobs: usize,
    pub scanned_records: usize,
    /// Unreferenced blobs older than the grace period.
    pub orphan_blobs: Vec<StoragePath>,
    /// Orphans removed by this pass.
    pub removed_blobs: Vec<StoragePath>,
    /// Unreferenced blobs still inside the grace period.
    pub recent_blobs: Vec<StoragePath>,
    /// Unreferenced blobs whose path carries no timestamp.
    pub undated_blobs: Vec<StoragePath>,
    pub dangling_records: Vec<StudyRecord>,
    /// Removals or existence checks that failed; the pass carries on past them.
    pub failures: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_blobs.is_empty()
            && self.undated_blobs.is_empty()
            && self.dangling_records.is_empty()
            && self.failures.is_empty()
    }
}

pub struct Reconciler {
    stores: GuardedStores,
    namer: PathNamer,
    grace: Duration,
}

impl Reconciler {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        namer: PathNamer,
        grace: Duration,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            stores: GuardedStores::new(blobs, metadata, call_timeout),
            namer,
            grace,
        }
    }

    /// Runs a pass as of now. Orphans are removed only when `apply` is set.
    pub fn run(&self, apply: bool) -> StudyResult<ReconcileReport> {
        self.run_at(apply, Utc::now())
    }

    /// Runs a pass as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `Query` (or `Timeout`) if either store cannot be listed. Failures on individual
    /// blobs are collected in [`ReconcileReport::failures`] instead.
    pub fn run_at(&self, apply: bool, now: DateTime<Utc>) -> StudyResult<ReconcileReport> {
        let records = self
            .stores
            .on_metadata("metadata query", |m| m.query(&StudyQuery::default()))
            .map_err(|failure| failure.into_study_error(StudyError::Query))?;
        let prefix = self.namer.prefix().to_string();
        let blobs = self
            .stores
            .on_blobs("blob list", move |b| b.list(&prefix))
            .map_err(|failure| failure.into_study_error(StudyError::Query))?;

        let mut report = ReconcileReport {
            scanned_blobs: blobs.len(),
            scanned_records: records.len(),
            ..ReconcileReport::default()
        };

        let referenced: HashSet<&StoragePath> = records.iter().map(|r| &r.storage_path).collect();
        let listed: HashSet<&StoragePath> = blobs.iter().collect();

        for record in &records {
            let present = if record.storage_path.has_prefix(self.namer.prefix()) {
                listed.contains(&record.storage_path)
            } else {
                let target = record.storage_path.clone();
                match self.stores.on_blobs("blob exists", move |b| b.exists(&target)) {
                    Ok(present) => present,
                    Err(failure) => {
                        report.failures.push(format!(
                            "could not check {}: {failure:?}",
                            record.storage_path
                        ));
                        continue;
                    }
                }
            };
            if !present {
                tracing::warn!(
                    study_id = %record.id,
                    storage_path = %record.storage_path,
                    "study record references a missing DICOM file"
                );
                report.dangling_records.push(record.clone());
            }
        }

        for path in blobs.iter().filter(|p| !referenced.contains(p)) {
            let Some(stored_at) = self.namer.derived_at(path) else {
                report.undated_blobs.push(path.clone());
                continue;
            };
            let age = now.signed_duration_since(stored_at).to_std().unwrap_or_default();
            if age < self.grace {
                report.recent_blobs.push(path.clone());
                continue;
            }
            report.orphan_blobs.push(path.clone());
            if apply {
                let target = path.clone();
                match self.stores.on_blobs("blob remove", move |b| b.remove(&target)) {
                    Ok(()) => {
                        tracing::info!(storage_path = %path, "removed orphaned DICOM file");
                        report.removed_blobs.push(path.clone());
                    }
                    Err(failure) => {
                        report
                            .failures
                            .push(format!("could not remove {path}: {failure:?}"));
                    }
                }
            }
        }

        tracing::info!(
            scanned_blobs = report.scanned_blobs,
            scanned_records = report.scanned_records,
            orphans = report.orphan_blobs.len(),
            removed = report.removed_blobs.len(),
            dangling = report.dangling_records.len(),
            failures = report.failures.len(),
            apply,
            "reconciliation pass finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StudyErrorKind;
    use crate::test_support::{MemoryBlobStore, MemoryMetadataStore};
    use chrono::TimeZone;

    const T0: i64 = 1_718_000_000_000;

    struct Fixture {
        blobs: Arc<MemoryBlobStore>,
        metadata: Arc<MemoryMetadataStore>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let blobs = Arc::new(MemoryBlobStore::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let reconciler = Reconciler::new(
            blobs.clone(),
            metadata.clone(),
            PathNamer::new("dicom_files"),
            Duration::from_secs(3600),
            Some(Duration::from_secs(5)),
        );
        Fixture {
            blobs,
            metadata,
            reconciler,
        }
    }

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn two_hours_later() -> DateTime<Utc> {
        at(T0 + 2 * 3600 * 1000)
    }

    #[test]
    fn consistent_stores_are_clean() {
        let f = fixture();
        let path = format!("dicom_files/Jane-{T0}/scan.dcm");
        f.blobs.put(&path, b"x");
        f.metadata.seed("Jane", &path, at(T0));

        let report = f.reconciler.run_at(true, two_hours_later()).unwrap();

        assert!(report.is_clean());
        assert_eq!(report.scanned_blobs, 1);
        assert_eq!(report.scanned_records, 1);
        assert!(f.blobs.calls().iter().all(|c| !c.starts_with("remove")));
    }

    #[test]
    fn old_orphans_are_reported_and_removed_only_when_applied() {
        let f = fixture();
        let orphan = format!("dicom_files/Jane-{T0}/scan.dcm");
        f.blobs.put(&orphan, b"x");

        let dry = f.reconciler.run_at(false, two_hours_later()).unwrap();
        assert_eq!(dry.orphan_blobs.len(), 1);
        assert!(dry.removed_blobs.is_empty());
        assert_eq!(f.blobs.paths().len(), 1);

        let applied = f.reconciler.run_at(true, two_hours_later()).unwrap();
        assert_eq!(applied.removed_blobs, applied.orphan_blobs);
        assert!(f.blobs.paths().is_empty());
    }

    #[test]
    fn recent_and_undated_orphans_are_kept() {
        let f = fixture();
        let recent = format!("dicom_files/Jane-{}/scan.dcm", T0 + 2 * 3600 * 1000 - 60_000);
        f.blobs.put(&recent, b"x");
        f.blobs.put("dicom_files/manual-upload.dcm", b"x");

        let report = f.reconciler.run_at(true, two_hours_later()).unwrap();

        assert_eq!(report.recent_blobs.len(), 1);
        assert_eq!(report.undated_blobs.len(), 1);
        assert!(report.orphan_blobs.is_empty());
        assert_eq!(f.blobs.paths().len(), 2);
    }

    #[test]
    fn dangling_records_are_reported_not_deleted() {
        let f = fixture();
        let record = f
            .metadata
            .seed("Jane", &format!("dicom_files/Jane-{T0}/scan.dcm"), at(T0));

        let report = f.reconciler.run_at(true, two_hours_later()).unwrap();

        assert_eq!(report.dangling_records, vec![record]);
        assert_eq!(f.metadata.rows().len(), 1);
    }

    #[test]
    fn records_outside_prefix_are_checked_individually() {
        let f = fixture();
        f.blobs.put("legacy/scan.dcm", b"x");
        f.metadata.seed("Jane", "legacy/scan.dcm", at(T0));

        let report = f.reconciler.run_at(false, two_hours_later()).unwrap();

        assert!(report.dangling_records.is_empty());
        assert!(f.blobs.calls().iter().any(|c| c == "exists legacy/scan.dcm"));
    }

    #[test]
    fn failed_removal_is_collected() {
        let f = fixture();
        f.blobs.put(&format!("dicom_files/Jane-{T0}/scan.dcm"), b"x");
        f.blobs.fail("remove");

        let report = f.reconciler.run_at(true, two_hours_later()).unwrap();

        assert_eq!(report.orphan_blobs.len(), 1);
        assert!(report.removed_blobs.is_empty());
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn listing_failure_aborts_pass() {
        let f = fixture();
        f.blobs.fail("list");
        let err = f.reconciler.run_at(true, two_hours_later()).unwrap_err();
        assert_eq!(err.kind(), StudyErrorKind::Query);
    }
}
