//! High-level pipeline: discover → download → list → reconcile → delete → upload.
//!
//! [`synchronise`] runs one mirror pass against any [`PageFetcher`] and [`RemoteStore`]
//! and always returns a [`SynchroniseReport`]; it never returns early with an error.
//!
//! # Failure policy
//! - Sitemap fetch/parse, folder resolution and folder listing failures end the run as
//!   [`RunOutcome::Fatal`] before any mutation, since reconciling against an incomplete
//!   baseline risks mass deletion.
//! - Page, download, upload and delete failures are logged, recorded in
//!   [`SynchroniseReport::failures`] and the run continues. Remote operations are retried
//!   per [`crate::retry::RetryPolicy`] first.
//! - A PDF that fails to download is still part of the discovered set, so its previous
//!   remote copy is kept rather than deleted.
//!
//! # Replacement
//! Uploads never overwrite. After a PDF uploads, remote items that already carried its
//! name are deleted so the folder holds one copy per name.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn, Instrument};
use url::Url;

use crate::config::{FullWipePolicy, MirrorConfig};
use crate::contract::{find_or_create_folder, PageFetcher, RemoteItem, RemoteStore};
use crate::discover::discover;
use crate::download::{fetch_pdf, FetchedPdf};
use crate::reconcile::{reconcile, Reconciliation};
use crate::retry::with_retry;

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    PartialSuccess,
    Fatal { reason: String },
}

impl RunOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunOutcome::Fatal { .. })
    }
}

/// Pipeline stage a per-item failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailureStage {
    Page,
    Download,
    Delete,
    Upload,
    Replace,
    Deadline,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ItemFailure {
    pub stage: FailureStage,
    /// URL or remote item name.
    pub target: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct SynchroniseReport {
    pub run_id: String,
    pub dry_run: bool,
    pub discovered: usize,
    pub downloaded: usize,
    /// Names of uploaded items.
    pub uploaded: Vec<String>,
    /// Names of stale items deleted from the folder.
    pub deleted: Vec<String>,
    /// Number of previous copies removed after a successful re-upload.
    pub replaced: usize,
    pub failures: Vec<ItemFailure>,
    /// Dry run only: names the plan would delete.
    pub would_delete: Vec<String>,
    /// Dry run only: names the plan would upload.
    pub would_upload: Vec<String>,
    /// Set when the plan would have deleted every item in the folder.
    pub full_wipe: bool,
    pub timed_out: bool,
    pub outcome: RunOutcome,
}

impl SynchroniseReport {
    fn new(dry_run: bool) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            dry_run,
            discovered: 0,
            downloaded: 0,
            uploaded: Vec::new(),
            deleted: Vec::new(),
            replaced: 0,
            failures: Vec::new(),
            would_delete: Vec::new(),
            would_upload: Vec::new(),
            full_wipe: false,
            timed_out: false,
            outcome: RunOutcome::Success,
        }
    }

    fn fail(&mut self, stage: FailureStage, target: impl Into<String>, error: impl fmt::Display) {
        self.failures.push(ItemFailure {
            stage,
            target: target.into(),
            error: error.to_string(),
        });
    }

    fn fatal(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        error!(reason = %reason, "[SYNC][FATAL] Run aborted, destination folder left untouched");
        self.outcome = RunOutcome::Fatal { reason };
        self
    }

    fn finish(mut self) -> Self {
        self.uploaded.sort();
        self.deleted.sort();
        self.would_delete.sort();
        self.would_upload.sort();
        self.would_upload.dedup();
        self.failures.sort();
        self.outcome = if self.failures.is_empty() && !self.timed_out {
            RunOutcome::Success
        } else {
            RunOutcome::PartialSuccess
        };
        self
    }
}

impl fmt::Display for SynchroniseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = match &self.outcome {
            RunOutcome::Success => "success".to_string(),
            RunOutcome::PartialSuccess => "partial success".to_string(),
            RunOutcome::Fatal { reason } => format!("FATAL: {reason}"),
        };
        writeln!(f, "Run {} ({})", self.run_id, if self.dry_run { "dry run" } else { "live" })?;
        writeln!(f, "  outcome:    {outcome}")?;
        writeln!(f, "  discovered: {}", self.discovered)?;
        writeln!(f, "  downloaded: {}", self.downloaded)?;
        writeln!(f, "  uploaded:   {}", self.uploaded.len())?;
        writeln!(f, "  replaced:   {}", self.replaced)?;
        writeln!(f, "  deleted:    {}", self.deleted.len())?;
        writeln!(f, "  failures:   {}", self.failures.len())?;
        if self.full_wipe {
            writeln!(f, "  WARNING: discovery found no PDFs; the plan deletes every item in the folder")?;
        }
        if self.timed_out {
            writeln!(f, "  WARNING: run deadline reached; remaining operations were skipped")?;
        }
        for name in &self.deleted {
            writeln!(f, "  - deleted {name}")?;
        }
        if self.dry_run {
            writeln!(f, "  would delete: {}", self.would_delete.len())?;
            for name in &self.would_delete {
                writeln!(f, "  - would delete {name}")?;
            }
            writeln!(f, "  would upload: {}", self.would_upload.len())?;
            for name in &self.would_upload {
                writeln!(f, "  + would upload {name}")?;
            }
        }
        for failure in &self.failures {
            writeln!(
                f,
                "  ! {:?} {}: {}",
                failure.stage, failure.target, failure.error
            )?;
        }
        Ok(())
    }
}

/// Wall-clock budget for the run.
#[derive(Clone, Copy)]
struct Deadline(Option<Instant>);

impl Deadline {
    fn passed(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }
}

/// Run one mirror pass.
pub async fn synchronise<F, S>(config: &MirrorConfig, fetcher: &F, store: &S) -> SynchroniseReport
where
    F: PageFetcher + ?Sized,
    S: RemoteStore + ?Sized,
{
    let report = SynchroniseReport::new(config.sync.dry_run);
    let span = tracing::info_span!("sync", run_id = %report.run_id);
    run(config, fetcher, store, report).instrument(span).await
}

async fn run<F, S>(
    config: &MirrorConfig,
    fetcher: &F,
    store: &S,
    mut report: SynchroniseReport,
) -> SynchroniseReport
where
    F: PageFetcher + ?Sized,
    S: RemoteStore + ?Sized,
{
    let deadline = &Deadline(config.sync.deadline.map(|d| Instant::now() + d));
    let concurrency = config.sync.concurrency.max(1);
    let policy = &config.sync.retry;
    info!(dry_run = report.dry_run, "[SYNC] Starting mirror run");

    // Step 1: Discover
    let discovery = match discover(
        fetcher,
        &config.source.sitemap_url,
        config.source.locale.as_deref(),
        concurrency,
    )
    .await
    {
        Ok(d) => d,
        Err(e) => return report.fatal(format!("sitemap discovery failed: {e}")),
    };
    report.discovered = discovery.pdfs.len();
    for (page, e) in &discovery.failed_pages {
        report.fail(FailureStage::Page, page.as_str(), e);
    }
    warn_on_name_collisions(&discovery.pdfs);
    if deadline.passed() {
        report.timed_out = true;
        return report.fatal("run deadline reached during discovery");
    }

    // Step 2: Download into a scoped staging directory
    let mut fetched: BTreeMap<Url, FetchedPdf> = BTreeMap::new();
    let _staging = if report.dry_run {
        None
    } else {
        let staging = match tokio::fs::create_dir_all(&config.download.dir)
            .await
            .and_then(|_| {
                tempfile::Builder::new()
                    .prefix("pdf-mirror-")
                    .tempdir_in(&config.download.dir)
            }) {
            Ok(dir) => dir,
            Err(e) => {
                return report.fatal(format!(
                    "cannot prepare download directory {}: {e}",
                    config.download.dir.display()
                ))
            }
        };
        let staging_path = staging.path().to_path_buf();
        let staging_path = staging_path.as_path();

        let results: Vec<_> = stream::iter(discovery.pdfs.iter())
            .map(|pdf| async move {
                if deadline.passed() {
                    return (pdf, None);
                }
                (pdf, Some(fetch_pdf(fetcher, pdf, staging_path).await))
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        for (pdf, result) in results {
            match result {
                Some(Ok(file)) => {
                    fetched.insert(pdf.url.clone(), file);
                }
                Some(Err(e)) => {
                    warn!(url = %pdf.url, error = %e, "[SYNC][DOWNLOAD] Skipping PDF");
                    report.fail(FailureStage::Download, pdf.url.as_str(), e);
                }
                None => report.timed_out = true,
            }
        }
        report.downloaded = fetched.len();
        info!(downloaded = report.downloaded, "[SYNC][DOWNLOAD] Download step complete");
        Some(staging)
    };
    if deadline.passed() {
        report.timed_out = true;
        return report.fatal("run deadline reached before the folder was listed");
    }

    // Step 3: Resolve and list the destination folder
    let folder_name = config.destination.folder_name.as_str();
    let folder_id = if report.dry_run {
        match with_retry(policy, "find_folder", || store.find_folder(folder_name)).await {
            Ok(id) => id,
            Err(e) => return report.fatal(format!("cannot resolve folder `{folder_name}`: {e}")),
        }
    } else {
        match with_retry(policy, "find_or_create_folder", || {
            find_or_create_folder(store, folder_name)
        })
        .await
        {
            Ok(id) => Some(id),
            Err(e) => return report.fatal(format!("cannot resolve folder `{folder_name}`: {e}")),
        }
    };
    let remote: Vec<RemoteItem> = match &folder_id {
        Some(id) => match with_retry(policy, "list_children", || store.list_children(id)).await {
            Ok(items) => items,
            Err(e) => return report.fatal(format!("cannot list folder `{folder_name}`: {e}")),
        },
        None => Vec::new(),
    };
    info!(folder = folder_name, remote_items = remote.len(), "[SYNC] Listed destination folder");

    // Step 4: Reconcile
    let plan = reconcile(&discovery.pdfs, &remote);
    info!(
        to_upload = plan.to_upload.len(),
        to_delete = plan.to_delete.len(),
        superseded = plan.superseded.values().map(BTreeSet::len).sum::<usize>(),
        "[SYNC] Reconciled"
    );
    if plan.is_full_wipe() {
        report.full_wipe = true;
        warn!(
            remote_items = plan.to_delete.len(),
            policy = ?config.sync.full_wipe,
            "[SYNC] Discovery returned no PDFs: plan is a full wipe of the destination folder"
        );
        if config.sync.full_wipe == FullWipePolicy::Refuse {
            return report.fatal("refusing to delete every item in the folder (sync.full_wipe = refuse)");
        }
    }

    let Some(folder_id) = folder_id.filter(|_| !report.dry_run) else {
        for item in &plan.to_delete {
            info!(file = %item.name, "[SYNC][DRY-RUN] Would delete");
            report.would_delete.push(item.name.clone());
        }
        for pdf in &plan.to_upload {
            info!(file = %pdf.file_name, url = %pdf.url, "[SYNC][DRY-RUN] Would upload");
            report.would_upload.push(pdf.file_name.clone());
        }
        return report.finish();
    };

    // Step 5: Delete stale items
    apply_deletes(&plan, store, policy, concurrency, deadline, &mut report).await;

    // Step 6: Upload, then drop the copies each upload supersedes
    apply_uploads(plan, fetched, store, &folder_id, policy, concurrency, deadline, &mut report).await;

    let report = report.finish();
    info!(
        outcome = ?report.outcome,
        uploaded = report.uploaded.len(),
        deleted = report.deleted.len(),
        failures = report.failures.len(),
        "[SYNC] Mirror run complete"
    );
    report
}

async fn apply_deletes<S>(
    plan: &Reconciliation,
    store: &S,
    policy: &crate::retry::RetryPolicy,
    concurrency: usize,
    deadline: &Deadline,
    report: &mut SynchroniseReport,
) where
    S: RemoteStore + ?Sized,
{
    let results: Vec<_> = stream::iter(plan.to_delete.iter())
        .map(|item| async move {
            if deadline.passed() {
                return (item, None);
            }
            let id = item.id.as_str();
            info!(file = %item.name, id, "[SYNC][DELETE] Deleting outdated file");
            (item, Some(with_retry(policy, "delete_item", || store.delete_item(id)).await))
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    for (item, result) in results {
        match result {
            Some(Ok(())) => report.deleted.push(item.name.clone()),
            Some(Err(e)) => {
                error!(file = %item.name, error = %e, "[SYNC][ERROR][DELETE] Delete failed");
                report.fail(FailureStage::Delete, item.name.as_str(), e);
            }
            None => {
                report.timed_out = true;
                report.fail(FailureStage::Deadline, item.name.as_str(), "delete skipped");
            }
        }
    }
}

/// Outcome of one upload task.
enum UploadResult {
    Uploaded {
        name: String,
        replaced: usize,
        replace_failures: Vec<(String, String)>,
    },
    Failed {
        name: String,
        error: String,
    },
    Skipped {
        name: String,
    },
}

#[allow(clippy::too_many_arguments)]
async fn apply_uploads<S>(
    plan: Reconciliation,
    mut fetched: BTreeMap<Url, FetchedPdf>,
    store: &S,
    folder_id: &str,
    policy: &crate::retry::RetryPolicy,
    concurrency: usize,
    deadline: &Deadline,
    report: &mut SynchroniseReport,
) where
    S: RemoteStore + ?Sized,
{
    let Reconciliation {
        to_upload,
        mut superseded,
        ..
    } = plan;

    // Download failures were already recorded; only staged files are uploaded.
    // One upload per name: when several staged URLs share a name, the last one in order wins
    // and the other staged files are dropped.
    let mut by_name: BTreeMap<String, FetchedPdf> = BTreeMap::new();
    for pdf in &to_upload {
        if let Some(file) = fetched.remove(&pdf.url) {
            if let Some(shadowed) = by_name.insert(pdf.file_name.clone(), file) {
                debug!(file = %pdf.file_name, skipped = %shadowed.reference.url, "[SYNC][UPLOAD] Name taken by a later URL");
            }
        }
    }
    let jobs: Vec<(FetchedPdf, BTreeSet<RemoteItem>)> = by_name
        .into_iter()
        .map(|(name, file)| {
            let previous = superseded.remove(&name).unwrap_or_default();
            (file, previous)
        })
        .collect();

    let results: Vec<UploadResult> = stream::iter(jobs)
        .map(|(file, previous)| async move {
            let name = file.reference.file_name.clone();
            if deadline.passed() {
                return UploadResult::Skipped { name };
            }
            let path = file.path();
            let uploaded = with_retry(policy, "upload_file", || {
                store.upload_file(folder_id, &name, path)
            })
            .await;
            // The staged file is removed here whatever the upload outcome.
            drop(file);
            if let Err(e) = uploaded {
                error!(file = %name, error = %e, "[SYNC][ERROR][UPLOAD] Upload failed, keeping previous copy");
                return UploadResult::Failed {
                    name,
                    error: e.to_string(),
                };
            }

            let mut replaced = 0;
            let mut replace_failures = Vec::new();
            for old in &previous {
                let id = old.id.as_str();
                match with_retry(policy, "delete_item", || store.delete_item(id)).await {
                    Ok(()) => replaced += 1,
                    Err(e) => {
                        error!(file = %name, id, error = %e, "[SYNC][ERROR][REPLACE] Failed to remove previous copy");
                        replace_failures.push((old.id.clone(), e.to_string()));
                    }
                }
            }
            UploadResult::Uploaded {
                name,
                replaced,
                replace_failures,
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    for result in results {
        match result {
            UploadResult::Uploaded {
                name,
                replaced,
                replace_failures,
            } => {
                for (id, e) in replace_failures {
                    report.fail(FailureStage::Replace, format!("{name} ({id})"), e);
                }
                report.replaced += replaced;
                report.uploaded.push(name);
            }
            UploadResult::Failed { name, error } => {
                report.fail(FailureStage::Upload, name, error);
            }
            UploadResult::Skipped { name } => {
                report.timed_out = true;
                report.fail(FailureStage::Deadline, name, "upload skipped");
            }
        }
    }
}

/// Distinct URLs that resolve to the same file name shadow each other in the folder.
fn warn_on_name_collisions(pdfs: &BTreeSet<crate::contract::PdfReference>) {
    let mut by_name: BTreeMap<&str, Vec<&Url>> = BTreeMap::new();
    for pdf in pdfs {
        by_name.entry(pdf.file_name.as_str()).or_default().push(&pdf.url);
    }
    for (name, urls) in by_name.into_iter().filter(|(_, urls)| urls.len() > 1) {
        let urls: Vec<&str> = urls.iter().map(|u| u.as_str()).collect();
        warn!(file = name, ?urls, "[SYNC] Several PDFs share a file name; only the last URL is uploaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_report_is_success() {
        let mut report = SynchroniseReport::new(false);
        report.uploaded = vec!["b.pdf".into(), "a.pdf".into()];
        let report = report.finish();
        assert_eq!(report.outcome, RunOutcome::Success);
        assert_eq!(report.uploaded, vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn any_failure_or_timeout_is_partial() {
        let mut failed = SynchroniseReport::new(false);
        failed.fail(FailureStage::Download, "https://example.com/x.pdf", "HTTP 404");
        assert_eq!(failed.finish().outcome, RunOutcome::PartialSuccess);

        let mut late = SynchroniseReport::new(false);
        late.timed_out = true;
        assert_eq!(late.finish().outcome, RunOutcome::PartialSuccess);
    }

    #[test]
    fn summary_names_deleted_items_and_failures() {
        let mut report = SynchroniseReport::new(true);
        report.deleted = vec!["old.pdf".into()];
        report.fail(FailureStage::Upload, "x.pdf", "HTTP 400");
        let text = report.finish().to_string();
        assert!(text.contains("dry run"));
        assert!(text.contains("deleted old.pdf"));
        assert!(text.contains("Upload x.pdf: HTTP 400"));
    }

    #[test]
    fn dry_run_summary_shows_the_plan() {
        let mut report = SynchroniseReport::new(true);
        report.would_delete = vec!["old.pdf".into()];
        report.would_upload = vec!["x.pdf".into(), "a.pdf".into(), "x.pdf".into()];
        let report = report.finish();
        assert_eq!(report.would_upload, vec!["a.pdf", "x.pdf"]);
        let text = report.to_string();
        assert!(text.contains("would delete: 1"));
        assert!(text.contains("- would delete old.pdf"));
        assert!(text.contains("+ would upload x.pdf"));
    }

    #[test]
    fn deadline_without_limit_never_passes() {
        assert!(!Deadline(None).passed());
        assert!(Deadline(Some(Instant::now())).passed());
    }
}
