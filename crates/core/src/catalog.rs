//! Filtered study listings.
//!
//! A listing combines a time window on `created_at` with a case-insensitive substring match on
//! `name` and is always ordered newest first. Time windows are computed in the caller's local
//! time zone: "today" starts at local midnight, "last week" is seven calendar days back and
//! "last month" one calendar month back (clamped to the end of a shorter month).
//!
//! The listing query is the only idempotent backend call in the system, so it is the only one
//! that is retried.

use crate::error::{BackendError, StudyError, StudyResult};
use crate::stores::{BlobStore, MetadataStore, StudyQuery};
use crate::study::StudyRecord;
use crate::timeout::{CallFailure, GuardedStores};
use chrono::{
    DateTime, Days, FixedOffset, Local, Months, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFilter {
    #[default]
    All,
    Today,
    #[serde(rename = "week", alias = "lastWeek")]
    LastWeek,
    #[serde(rename = "month", alias = "lastMonth")]
    LastMonth,
}

impl TimeFilter {
    pub const fn as_str(self) -> &'static str {
        match self {
            TimeFilter::All => "all",
            TimeFilter::Today => "today",
            TimeFilter::LastWeek => "week",
            TimeFilter::LastMonth => "month",
        }
    }

    /// Inclusive lower bound on `created_at` for a listing taken at `now`.
    ///
    /// Returns `None` for [`TimeFilter::All`].
    pub fn lower_bound<Tz: TimeZone>(self, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
        let local = now.naive_local();
        let bound = match self {
            TimeFilter::All => return None,
            TimeFilter::Today => local.date().and_time(NaiveTime::MIN),
            TimeFilter::LastWeek => local.checked_sub_days(Days::new(7))?,
            TimeFilter::LastMonth => local.checked_sub_months(Months::new(1))?,
        };
        Some(resolve_local(&now.timezone(), bound, now.offset().fix()))
    }
}

/// Maps a local wall-clock time to UTC.
///
/// A time skipped by a DST change falls back to `offset`, the offset in force at `now`.
fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    match tz.from_local_datetime(&local).earliest() {
        Some(resolved) => resolved.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&(local - offset)),
    }
}

impl std::fmt::Display for TimeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TimeFilter {
    type Err = StudyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "all" => Ok(TimeFilter::All),
            "today" => Ok(TimeFilter::Today),
            "week" | "lastWeek" => Ok(TimeFilter::LastWeek),
            "month" | "lastMonth" => Ok(TimeFilter::LastMonth),
            other => Err(StudyError::Validation(format!(
                "unknown time filter {other:?}; expected all, today, week or month"
            ))),
        }
    }
}

/// What the caller asked to see.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CatalogFilter {
    pub time: TimeFilter,
    /// Matched case-insensitively anywhere in `name`. Empty means no name filter.
    pub name_substring: Option<String>,
}

impl CatalogFilter {
    pub fn new(time: TimeFilter, name_substring: Option<String>) -> Self {
        Self {
            time,
            name_substring,
        }
    }

    pub fn to_query<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> StudyQuery {
        StudyQuery {
            created_since: self.time.lower_bound(now),
            name_contains: self
                .name_substring
                .clone()
                .filter(|needle| !needle.is_empty()),
        }
    }
}

/// Runs listing queries against the metadata store.
#[derive(Clone)]
pub struct StudyCatalog {
    stores: GuardedStores,
    retries: u32,
    retry_backoff: Duration,
}

impl StudyCatalog {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            stores: GuardedStores::new(blobs, metadata, call_timeout),
            retries: 0,
            retry_backoff: Duration::from_millis(200),
        }
    }

    /// Retries a transiently failing query up to `retries` more times.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Base delay between attempts; attempt `n` waits `n * backoff`.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Lists studies matching `filter` as of the local wall clock.
    pub fn list(&self, filter: &CatalogFilter) -> StudyResult<Vec<StudyRecord>> {
        self.list_at(filter, &Local::now())
    }

    /// Lists studies matching `filter` as of `now`.
    ///
    /// An empty result is not an error.
    ///
    /// # Errors
    ///
    /// Returns `Query` if the store fails on every attempt or rejects the query, or `Timeout`
    /// if the last attempt outlived its deadline.
    pub fn list_at<Tz: TimeZone>(
        &self,
        filter: &CatalogFilter,
        now: &DateTime<Tz>,
    ) -> StudyResult<Vec<StudyRecord>> {
        let query = filter.to_query(now);
        let mut attempt = 0;
        loop {
            let q = query.clone();
            match self
                .stores
                .on_metadata("metadata query", move |m| m.query(&q))
            {
                Ok(mut records) => {
                    StudyQuery::order(&mut records);
                    tracing::debug!(
                        time = %filter.time,
                        count = records.len(),
                        attempt,
                        "listed studies"
                    );
                    return Ok(records);
                }
                Err(failure) if attempt < self.retries && is_transient(&failure) => {
                    attempt += 1;
                    tracing::warn!(attempt, error = ?failure, "study query failed; retrying");
                    std::thread::sleep(self.retry_backoff * attempt);
                }
                Err(failure) => return Err(failure.into_study_error(StudyError::Query)),
            }
        }
    }
}

fn is_transient(failure: &CallFailure) -> bool {
    matches!(
        failure,
        CallFailure::TimedOut { .. } | CallFailure::Backend(BackendError::Unavailable(_))
    )
}

/// The most recent listing and the filter that produced it.
///
/// Writes invalidate the cache so a stale listing is never served after the catalog changed.
#[derive(Debug, Default)]
pub struct ListingCache {
    last: Mutex<Option<CachedListing>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedListing {
    pub filter: CatalogFilter,
    pub records: Vec<StudyRecord>,
    /// Whether a write happened after this listing was taken.
    pub stale: bool,
}

impl ListingCache {
    fn slot(&self) -> MutexGuard<'_, Option<CachedListing>> {
        self.last.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn store(&self, filter: &CatalogFilter, records: &[StudyRecord]) {
        *self.slot() = Some(CachedListing {
            filter: filter.clone(),
            records: records.to_vec(),
            stale: false,
        });
    }

    /// Marks the listing stale; its filter is kept so it can be re-run.
    pub fn invalidate(&self) {
        if let Some(listing) = self.slot().as_mut() {
            listing.stale = true;
        }
    }

    /// Drops the listing entirely, e.g. after a failed query.
    pub fn clear(&self) {
        *self.slot() = None;
    }

    /// The cached records, unless a write has made them stale.
    pub fn fresh(&self) -> Option<CachedListing> {
        self.slot().clone().filter(|listing| !listing.stale)
    }

    /// The filter of the last listing, stale or not.
    pub fn last_filter(&self) -> Option<CatalogFilter> {
        self.slot().as_ref().map(|listing| listing.filter.clone())
    }
}

/// How a creation date is shown in listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateLabel {
    Today,
    Yesterday,
    /// Full local date and time.
    On(NaiveDateTime),
}

impl DateLabel {
    pub fn for_timestamp<Tz: TimeZone>(at: DateTime<Utc>, now: &DateTime<Tz>) -> Self {
        let local = at.with_timezone(&now.timezone()).naive_local();
        let today = now.naive_local().date();
        if local.date() == today {
            DateLabel::Today
        } else if today.pred_opt() == Some(local.date()) {
            DateLabel::Yesterday
        } else {
            DateLabel::On(local)
        }
    }
}

impl std::fmt::Display for DateLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateLabel::Today => f.write_str("Today"),
            DateLabel::Yesterday => f.write_str("Yesterday"),
            DateLabel::On(at) => write!(f, "{}", at.format("%b %-d, %Y, %H:%M")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryBlobStore, MemoryMetadataStore};

    fn plus_two() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap()
    }

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<FixedOffset> {
        plus_two().with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    struct Fixture {
        metadata: Arc<MemoryMetadataStore>,
        catalog: StudyCatalog,
    }

    fn fixture(retries: u32) -> Fixture {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let catalog = StudyCatalog::new(
            Arc::new(MemoryBlobStore::new()),
            metadata.clone(),
            Some(Duration::from_secs(5)),
        )
        .with_retries(retries)
        .with_retry_backoff(Duration::ZERO);
        Fixture { metadata, catalog }
    }

    #[test]
    fn today_starts_at_local_midnight() {
        let now = local(2026, 3, 10, 9, 30);
        assert_eq!(
            TimeFilter::Today.lower_bound(&now),
            Some(utc(2026, 3, 9, 22, 0))
        );
    }

    #[test]
    fn week_and_month_count_calendar_units() {
        let now = local(2026, 3, 31, 12, 0);
        assert_eq!(
            TimeFilter::LastWeek.lower_bound(&now),
            Some(utc(2026, 3, 24, 10, 0))
        );
        assert_eq!(
            TimeFilter::LastMonth.lower_bound(&now),
            Some(utc(2026, 2, 28, 10, 0))
        );
        assert_eq!(TimeFilter::All.lower_bound(&now), None);
    }

    #[test]
    fn time_filter_parses_both_spellings() {
        assert_eq!("week".parse::<TimeFilter>().unwrap(), TimeFilter::LastWeek);
        assert_eq!("lastMonth".parse::<TimeFilter>().unwrap(), TimeFilter::LastMonth);
        assert_eq!("".parse::<TimeFilter>().unwrap(), TimeFilter::All);
        assert!("yesterday".parse::<TimeFilter>().is_err());
    }

    #[test]
    fn today_and_substring_compose() {
        let f = fixture(0);
        let now = local(2026, 3, 10, 18, 0);
        let early = f.metadata.seed("Jane Doe", "p/Jane_Doe-1/a.dcm", utc(2026, 3, 9, 22, 0));
        let late = f.metadata.seed("JANE Smith", "p/JANE_Smith-2/b.dcm", utc(2026, 3, 10, 15, 0));
        f.metadata.seed("Bob", "p/Bob-3/c.dcm", utc(2026, 3, 10, 8, 0));
        f.metadata.seed("Jane Old", "p/Jane_Old-4/d.dcm", utc(2026, 3, 9, 21, 59));

        let filter = CatalogFilter::new(TimeFilter::Today, Some("jane".into()));
        let listed = f.catalog.list_at(&filter, &now).unwrap();

        assert_eq!(listed, vec![late, early]);
    }

    #[test]
    fn empty_result_is_not_an_error() {
        let f = fixture(0);
        let listed = f
            .catalog
            .list_at(&CatalogFilter::default(), &local(2026, 1, 1, 0, 0))
            .unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn transient_failures_are_retried() {
        let f = fixture(2);
        f.metadata.seed("Jane Doe", "p/Jane_Doe-1/a.dcm", utc(2026, 3, 9, 22, 0));
        f.metadata.fail_times("query", 2);

        let listed = f
            .catalog
            .list_at(&CatalogFilter::default(), &local(2026, 3, 10, 0, 0))
            .unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(f.metadata.calls().len(), 3);
    }

    #[test]
    fn exhausted_retries_report_query_error() {
        let f = fixture(1);
        f.metadata.fail("query");

        let err = f
            .catalog
            .list_at(&CatalogFilter::default(), &local(2026, 3, 10, 0, 0))
            .unwrap_err();

        assert!(matches!(err, StudyError::Query(BackendError::Unavailable(_))));
        assert_eq!(f.metadata.calls().len(), 2);
    }

    #[test]
    fn cache_invalidation_keeps_filter() {
        let cache = ListingCache::default();
        let filter = CatalogFilter::new(TimeFilter::Today, None);
        cache.store(&filter, &[]);
        assert!(cache.fresh().is_some());

        cache.invalidate();
        assert!(cache.fresh().is_none());
        assert_eq!(cache.last_filter(), Some(filter));

        cache.clear();
        assert_eq!(cache.last_filter(), None);
    }

    #[test]
    fn date_labels_follow_local_days() {
        let now = local(2026, 3, 10, 0, 30);
        assert_eq!(
            DateLabel::for_timestamp(utc(2026, 3, 9, 22, 15), &now),
            DateLabel::Today
        );
        assert_eq!(
            DateLabel::for_timestamp(utc(2026, 3, 9, 21, 0), &now),
            DateLabel::Yesterday
        );
        let older = DateLabel::for_timestamp(utc(2026, 3, 1, 7, 5), &now);
        assert_eq!(older.to_string(), "Mar 1, 2026, 09:05");
    }
}
