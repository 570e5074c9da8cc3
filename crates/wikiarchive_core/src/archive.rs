use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, mpsc};
use std::thread;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::error::TransportError;
use crate::manifest::write_json_atomic;
use crate::naming::NameRegistry;
use crate::pacing::{PacingPolicy, Sleeper};
use crate::transport::{Transport, fetch_page_html, fetch_page_wikitext};
use crate::worklist::Worklist;

pub const MANIFEST_FILENAME: &str = "index.json";
pub const NAMES_FILENAME: &str = "names.json";
pub const PAGES_DIRNAME: &str = "pages";

/// Where a run's files go: `<root>/pages/<name>.{wikitext,html,meta.json}` plus the
/// manifest and name table at the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    root: PathBuf,
}

impl ArchiveLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.root.join(PAGES_DIRNAME)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILENAME)
    }

    pub fn names_path(&self) -> PathBuf {
        self.root.join(NAMES_FILENAME)
    }

    pub fn wikitext_path(&self, name: &str) -> PathBuf {
        self.pages_dir().join(format!("{name}.wikitext"))
    }

    pub fn html_path(&self, name: &str) -> PathBuf {
        self.pages_dir().join(format!("{name}.html"))
    }

    pub fn meta_path(&self, name: &str) -> PathBuf {
        self.pages_dir().join(format!("{name}.meta.json"))
    }

    pub fn prepare(&self) -> Result<()> {
        let pages = self.pages_dir();
        fs::create_dir_all(&pages)
            .with_context(|| format!("failed to create output directory {}", pages.display()))
    }
}

/// Fetch outcome for one worklist entry: artifact paths on success, the error otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveRecord {
    pub title: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<[String; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ArchiveRecord {
    pub fn archived(title: impl Into<String>, name: impl Into<String>, files: [String; 2]) -> Self {
        Self {
            title: title.into(),
            name: name.into(),
            files: Some(files),
            error: None,
        }
    }

    pub fn failed(
        title: impl Into<String>,
        name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            name: name.into(),
            files: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.files.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    pub pacing: PacingPolicy,
    pub workers: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            pacing: PacingPolicy::default(),
            workers: 1,
        }
    }
}

#[derive(Debug, Serialize)]
struct PageMeta<'a> {
    title: &'a str,
    name: &'a str,
}

struct Job<'a> {
    title: &'a str,
    name: String,
}

/// Archive every worklist entry, returning exactly one record per entry in worklist order.
///
/// Storage names are allocated up front in worklist order, so the result does not depend
/// on `workers`.
pub fn archive<T: Transport + ?Sized>(
    transport: &T,
    worklist: &Worklist,
    layout: &ArchiveLayout,
    names: &mut NameRegistry,
    options: &ArchiveOptions,
    sleeper: &dyn Sleeper,
) -> Vec<ArchiveRecord> {
    let jobs = worklist
        .iter()
        .map(|title| Job {
            title,
            name: names.allocate(title),
        })
        .collect::<Vec<_>>();

    let workers = options.workers.clamp(1, jobs.len().max(1));
    if workers == 1 {
        archive_sequential(transport, &jobs, layout, options, sleeper)
    } else {
        archive_parallel(transport, &jobs, layout, options, sleeper, workers)
    }
}

fn archive_sequential<T: Transport + ?Sized>(
    transport: &T,
    jobs: &[Job<'_>],
    layout: &ArchiveLayout,
    options: &ArchiveOptions,
    sleeper: &dyn Sleeper,
) -> Vec<ArchiveRecord> {
    let mut records = Vec::with_capacity(jobs.len());
    for (index, job) in jobs.iter().enumerate() {
        records.push(archive_job(transport, layout, job));
        options.pacing.after_item(index + 1, sleeper);
    }
    records
}

fn archive_parallel<T: Transport + ?Sized>(
    transport: &T,
    jobs: &[Job<'_>],
    layout: &ArchiveLayout,
    options: &ArchiveOptions,
    sleeper: &dyn Sleeper,
    workers: usize,
) -> Vec<ArchiveRecord> {
    log::info!("archiving {} pages with {workers} workers", jobs.len());
    let gated = PauseGate::new(transport);
    let next = AtomicUsize::new(0);
    let completed = AtomicUsize::new(0);
    let (sender, receiver) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..workers {
            let sender = sender.clone();
            let next = &next;
            let completed = &completed;
            let gated = &gated;
            scope.spawn(move || {
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(job) = jobs.get(index) else {
                        break;
                    };
                    let record = archive_job(gated, layout, job);
                    if sender.send((index, record)).is_err() {
                        break;
                    }
                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    gated.after_item(done, &options.pacing, sleeper);
                }
            });
        }
    });
    drop(sender);

    let mut slots: Vec<Option<ArchiveRecord>> = vec![None; jobs.len()];
    for (index, record) in receiver {
        slots[index] = Some(record);
    }
    slots.into_iter().flatten().collect()
}

/// Shares one pacing pause across workers: while a worker sits out a pause, every
/// other worker's next request waits for it to end.
struct PauseGate<'a, T: ?Sized> {
    inner: &'a T,
    gate: RwLock<()>,
}

impl<'a, T: Transport + ?Sized> PauseGate<'a, T> {
    fn new(inner: &'a T) -> Self {
        Self {
            inner,
            gate: RwLock::new(()),
        }
    }

    fn after_item(&self, completed: usize, pacing: &PacingPolicy, sleeper: &dyn Sleeper) {
        if !pacing.should_pause(completed) {
            return;
        }
        let _held = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        pacing.after_item(completed, sleeper);
    }
}

impl<T: Transport + ?Sized> Transport for PauseGate<'_, T> {
    fn fetch(&self, params: &[(String, String)]) -> Result<serde_json::Value, TransportError> {
        drop(self.gate.read().unwrap_or_else(PoisonError::into_inner));
        self.inner.fetch(params)
    }

    fn request_count(&self) -> usize {
        self.inner.request_count()
    }
}

fn archive_job<T: Transport + ?Sized>(
    transport: &T,
    layout: &ArchiveLayout,
    job: &Job<'_>,
) -> ArchiveRecord {
    match archive_page(transport, layout, job.title, &job.name) {
        Ok(files) => {
            log::debug!("archived {:?} as {}", job.title, job.name);
            ArchiveRecord::archived(job.title, job.name.as_str(), files)
        }
        Err(error) => {
            log::warn!("failed to archive {:?}: {error:#}", job.title);
            ArchiveRecord::failed(job.title, job.name.as_str(), format!("{error:#}"))
        }
    }
}

fn archive_page<T: Transport + ?Sized>(
    transport: &T,
    layout: &ArchiveLayout,
    title: &str,
    name: &str,
) -> Result<[String; 2]> {
    let wikitext = fetch_page_wikitext(transport, title)
        .with_context(|| format!("failed to fetch wikitext for {title}"))?;
    let html = fetch_page_html(transport, title)
        .with_context(|| format!("failed to fetch html for {title}"))?;

    let wikitext_path = layout.wikitext_path(name);
    let html_path = layout.html_path(name);
    fs::write(&wikitext_path, wikitext)
        .with_context(|| format!("failed to write {}", wikitext_path.display()))?;
    fs::write(&html_path, html)
        .with_context(|| format!("failed to write {}", html_path.display()))?;
    write_json_atomic(&layout.meta_path(name), &PageMeta { title, name })?;

    Ok([normalize_path(&wikitext_path), normalize_path(&html_path)])
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
