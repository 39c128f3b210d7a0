//! Sync orchestration.
//!
//! [`SyncDriver`] is the unit a scheduler or indexing host calls. A full
//! load and an incremental poll share one internal procedure; the only
//! difference is the sync window. Entity kinds run in a fixed order
//! (repository/code, then pull requests, then work items) so output
//! ordering is
//! deterministic for a given configuration, and each enabled kind
//! contributes a lazily built segment to the returned [`DocumentBatches`].
//!
//! Failure containment follows the error taxonomy: a segment that cannot
//! start or continue surfaces as a single `Err` item in the stream and the
//! remaining kinds still run; per-entity problems are logged, counted, and
//! skipped without disturbing the current batch.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use tracing::{info, warn};

use crate::batch::batched;
use crate::config::Config;
use crate::error::SyncError;
use crate::models::{Document, SyncWindow};
use crate::normalize::{
    code_document, pull_request_document, repository_document, work_item_document,
};
use crate::remote::{
    authenticated_clone_url, AzdoClient, Credentials, RemoteSource, WORK_ITEM_FETCH_CAP,
};
use crate::workcopy::{FileAllowList, Workcopy};

type BatchResult = Result<Vec<Document>, SyncError>;
type SegmentIter = Box<dyn Iterator<Item = BatchResult>>;
type SegmentFn = Box<dyn FnOnce() -> SegmentIter>;

pub struct SyncDriver {
    config: Arc<Config>,
    allow: Arc<FileAllowList>,
    source: Option<Arc<dyn RemoteSource>>,
    access_token: Option<String>,
}

impl SyncDriver {
    /// Build a driver from validated configuration. Credentials are
    /// supplied separately via [`load_credentials`](Self::load_credentials).
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let allow = FileAllowList::new(
            &config.code.extensions,
            &config.code.allow_filenames,
            &config.code.exclude_globs,
        )?;
        Ok(Self {
            config: Arc::new(config),
            allow: Arc::new(allow),
            source: None,
            access_token: None,
        })
    }

    /// Establish platform credentials. Must happen before `load_full` or
    /// `poll`; both fail with [`SyncError::MissingCredential`] otherwise.
    pub fn load_credentials(&mut self, credentials: Credentials) -> Result<(), SyncError> {
        let client = AzdoClient::new(credentials.clone())?;
        self.access_token = Some(credentials.access_token);
        self.source = Some(Arc::new(client));
        Ok(())
    }

    /// Substitute a remote source directly (tests, alternative hosts).
    pub fn with_source(mut self, source: Arc<dyn RemoteSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Full load: every enabled entity kind takes its first-sync path.
    pub fn load_full(&self) -> Result<DocumentBatches, SyncError> {
        self.run(None)
    }

    /// Incremental poll over `(start, end)` epoch seconds. A non-positive
    /// start means no prior cursor exists and the run degrades to a full
    /// load.
    pub fn poll(
        &self,
        start_epoch_seconds: i64,
        end_epoch_seconds: i64,
    ) -> Result<DocumentBatches, SyncError> {
        self.run(SyncWindow::from_epoch_seconds(
            start_epoch_seconds,
            end_epoch_seconds,
        ))
    }

    fn run(&self, window: Option<SyncWindow>) -> Result<DocumentBatches, SyncError> {
        // Fail before any network or process call, not deep inside a fetch.
        let source = self.source.clone().ok_or(SyncError::MissingCredential)?;

        let now = Utc::now();
        let ingested_at = now.with_nanosecond(0).unwrap_or(now);

        let mut segments: VecDeque<SegmentFn> = VecDeque::new();
        let sync = &self.config.sync;

        if sync.include_code {
            let config = self.config.clone();
            let allow = self.allow.clone();
            let source = source.clone();
            let token = self.access_token.clone();
            segments.push_back(Box::new(move || {
                code_segment(config, allow, source, token, window, ingested_at)
            }));
        }
        if sync.include_pull_requests {
            let config = self.config.clone();
            let source = source.clone();
            segments.push_back(Box::new(move || {
                pull_request_segment(config, source, window)
            }));
        }
        if sync.include_work_items {
            let config = self.config.clone();
            let source = source.clone();
            segments.push_back(Box::new(move || work_item_segment(config, source, window)));
        }

        Ok(DocumentBatches {
            segments,
            current: None,
        })
    }
}

/// Lazy stream of document batches.
///
/// Each pull drives the pipeline just far enough to fill one batch, so
/// memory stays bounded. Batches already handed out are never revoked;
/// dropping the iterator cancels everything not yet pulled. A segment
/// failure appears as one `Err` item, after which iteration moves on to the
/// next entity kind.
pub struct DocumentBatches {
    segments: VecDeque<SegmentFn>,
    current: Option<SegmentIter>,
}

impl Iterator for DocumentBatches {
    type Item = BatchResult;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(iter) = self.current.as_mut() {
                if let Some(item) = iter.next() {
                    return Some(item);
                }
                self.current = None;
            }
            let factory = self.segments.pop_front()?;
            self.current = Some(factory());
        }
    }
}

fn failed_segment(err: SyncError) -> SegmentIter {
    Box::new(std::iter::once(Err(err)))
}

// ---- repository/code segment ----

fn code_segment(
    config: Arc<Config>,
    allow: Arc<FileAllowList>,
    source: Arc<dyn RemoteSource>,
    access_token: Option<String>,
    window: Option<SyncWindow>,
    ingested_at: DateTime<Utc>,
) -> SegmentIter {
    match code_segment_inner(config, allow, source, access_token, window, ingested_at) {
        Ok(iter) => iter,
        Err(err) => failed_segment(err),
    }
}

fn code_segment_inner(
    config: Arc<Config>,
    allow: Arc<FileAllowList>,
    source: Arc<dyn RemoteSource>,
    access_token: Option<String>,
    window: Option<SyncWindow>,
    ingested_at: DateTime<Utc>,
) -> Result<SegmentIter, SyncError> {
    let repo = source.repository(&config.project.name, &config.project.repository)?;

    let workcopy = Workcopy::new(
        &config.code.workcopy_root,
        &config.project.repository,
        &config.project.branch,
    );
    let clone_url = authenticated_clone_url(&repo.remote_url, access_token.as_deref());
    let fresh = workcopy.ensure(&clone_url)?;

    let all_files = workcopy.tracked_files(&allow);
    info!(
        kind = "code",
        dir = %workcopy.dir().display(),
        files = all_files.len(),
        fresh,
        "working copy ready"
    );

    // The README is resolved against the full listing so an incremental
    // poll that didn't touch it keeps the repository document intact.
    let readme = all_files
        .iter()
        .find(|f| f.to_lowercase().ends_with("readme.md"))
        .cloned();

    let mut files = all_files;
    // A fresh clone has no baseline to diff against; only an established
    // checkout narrows to the window.
    if !fresh {
        if let Some(window) = window {
            let changed = workcopy.changed_files(window)?;
            files.retain(|f| changed.contains(f));
            info!(kind = "code", changed = files.len(), "window applied");
        }
    }

    let head = if config.sync.include_repository {
        let readme_text = readme.and_then(|path| match workcopy.read_file(&path) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(error = %err, "skipping unreadable README");
                None
            }
        });
        vec![repository_document(&repo, readme_text.as_deref(), ingested_at)]
    } else {
        Vec::new()
    };

    let batch_size = config.sync.batch_size;
    let mut skipped = 0usize;
    let file_documents = files.into_iter().filter_map(move |relative| {
        match workcopy.read_file(&relative) {
            Ok(content) => Some(code_document(&repo, &relative, &content, ingested_at)),
            Err(err) => {
                skipped += 1;
                warn!(path = %relative, skipped, error = %err, "skipping unreadable file");
                None
            }
        }
    });

    Ok(Box::new(
        batched(head.into_iter().chain(file_documents), batch_size).map(Ok),
    ))
}

// ---- pull request segment ----

fn pull_request_segment(
    config: Arc<Config>,
    source: Arc<dyn RemoteSource>,
    window: Option<SyncWindow>,
) -> SegmentIter {
    match pull_request_segment_inner(config, source, window) {
        Ok(iter) => iter,
        Err(err) => failed_segment(err),
    }
}

fn pull_request_segment_inner(
    config: Arc<Config>,
    source: Arc<dyn RemoteSource>,
    window: Option<SyncWindow>,
) -> Result<SegmentIter, SyncError> {
    let repo = source.repository(&config.project.name, &config.project.repository)?;
    let pull_requests = source.pull_requests(
        &config.project.name,
        &repo.id,
        &config.sync.state_filter,
        window,
    )?;
    info!(
        kind = "pull_requests",
        fetched = pull_requests.len(),
        "pull request listing complete"
    );

    let mut skipped = 0usize;
    let documents = pull_requests.into_iter().filter_map(move |pr| {
        match pull_request_document(&pr, &repo) {
            Ok(doc) => Some(doc),
            Err(err) => {
                skipped += 1;
                warn!(
                    pull_request = pr.pull_request_id,
                    skipped,
                    error = %err,
                    "skipping pull request"
                );
                None
            }
        }
    });

    Ok(Box::new(batched(documents, config.sync.batch_size).map(Ok)))
}

// ---- work item segment ----

fn work_item_segment(
    config: Arc<Config>,
    source: Arc<dyn RemoteSource>,
    window: Option<SyncWindow>,
) -> SegmentIter {
    match work_item_segment_inner(config, source, window) {
        Ok(iter) => iter,
        Err(err) => failed_segment(err),
    }
}

fn work_item_segment_inner(
    config: Arc<Config>,
    source: Arc<dyn RemoteSource>,
    window: Option<SyncWindow>,
) -> Result<SegmentIter, SyncError> {
    let query = build_work_item_query(
        &config.project.name,
        &config.sync.state_filter,
        window,
        config.sync.window_days,
    );
    let mut ids = source.work_item_ids(&config.project.name, &query)?;

    // A work item matched by several query clauses must still be emitted
    // once.
    let mut seen = HashSet::new();
    ids.retain(|id| seen.insert(*id));
    info!(kind = "work_items", matched = ids.len(), "work item query complete");

    let chunks: Vec<Vec<i64>> = ids.chunks(WORK_ITEM_FETCH_CAP).map(<[i64]>::to_vec).collect();
    let organization_url = source.organization_url().to_string();

    let mut skipped = 0usize;
    let documents = chunks
        .into_iter()
        .flat_map(move |chunk| match source.work_items(&chunk) {
            Ok(items) => items,
            Err(err) => {
                warn!(count = chunk.len(), error = %err, "work item fetch failed, chunk skipped");
                Vec::new()
            }
        })
        .filter_map(move |item| match work_item_document(&item, &organization_url) {
            Ok(doc) => Some(doc),
            Err(err) => {
                skipped += 1;
                warn!(work_item = item.id, skipped, error = %err, "skipping work item");
                None
            }
        });

    Ok(Box::new(batched(documents, config.sync.batch_size).map(Ok)))
}

/// Build the WIQL query for changed work items.
///
/// `[System.ChangedDate]` comparisons operate at whole-day granularity, so
/// the window cannot be passed through in seconds. A full load uses
/// `@today - N` day arithmetic; a poll converts both epoch bounds to the
/// date literals of the days containing them, which widens the window to
/// day boundaries rather than silently narrowing it.
fn build_work_item_query(
    project: &str,
    state_filter: &str,
    window: Option<SyncWindow>,
    window_days: i64,
) -> String {
    let state_predicate = if state_filter.is_empty() || state_filter == "all" {
        "<> ''".to_string()
    } else {
        format!("= '{}'", state_filter.replace('\'', "''"))
    };

    let changed_predicate = match window {
        Some(window) => format!(
            "[System.ChangedDate] >= '{}' AND [System.ChangedDate] <= '{}'",
            window.start.format("%Y-%m-%d"),
            window.end.format("%Y-%m-%d"),
        ),
        None => format!("[System.ChangedDate] > @today - {window_days}"),
    };

    format!(
        "SELECT [System.Id] FROM WorkItems \
         WHERE [System.TeamProject] = '{}' AND {} AND [System.State] {} \
         ORDER BY [System.CreatedDate] Desc",
        project.replace('\'', "''"),
        changed_predicate,
        state_predicate,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn window(start: &str, end: &str) -> SyncWindow {
        let parse = |value: &str| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%SZ")
                .unwrap()
                .and_utc()
        };
        SyncWindow {
            start: parse(start),
            end: parse(end),
        }
    }

    #[test]
    fn test_full_load_query_uses_day_arithmetic() {
        let query = build_work_item_query("codat", "all", None, 180);
        assert!(query.contains("[System.ChangedDate] > @today - 180"));
        assert!(query.contains("[System.State] <> ''"));
        assert!(query.contains("[System.TeamProject] = 'codat'"));
    }

    #[test]
    fn test_poll_query_uses_date_literals() {
        let query = build_work_item_query(
            "codat",
            "all",
            Some(window("2024-01-02T10:30:00Z", "2024-01-05T23:59:59Z")),
            180,
        );
        assert!(query.contains("[System.ChangedDate] >= '2024-01-02'"));
        assert!(query.contains("[System.ChangedDate] <= '2024-01-05'"));
        assert!(!query.contains("@today"));
    }

    #[test]
    fn test_state_filter_is_applied_and_escaped() {
        let query = build_work_item_query("codat", "Done", None, 30);
        assert!(query.contains("[System.State] = 'Done'"));

        let quoted = build_work_item_query("o'brien", "it's", None, 30);
        assert!(quoted.contains("[System.TeamProject] = 'o''brien'"));
        assert!(quoted.contains("[System.State] = 'it''s'"));
    }
}
