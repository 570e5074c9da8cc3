use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::archive::{ArchiveLayout, archive};
use crate::config::HarvestConfig;
use crate::discovery::{TopicIndex, discover};
use crate::manifest::{Manifest, write_json_atomic};
use crate::naming::NameRegistry;
use crate::pacing::{Sleeper, ThreadSleeper};
use crate::transport::{MediaWikiClient, Transport};
use crate::worklist::{Worklist, WorklistStats, build_worklist};

/// Discovery and worklist for a run, before anything is fetched or written.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestPlan {
    pub categories: TopicIndex,
    pub worklist: Worklist,
    pub stats: WorklistStats,
    pub requests: usize,
}

impl HarvestPlan {
    pub fn gaps(&self) -> Vec<&str> {
        self.categories.gaps()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarvestReport {
    pub topics: usize,
    pub discovered: usize,
    pub unique: usize,
    pub worklist: usize,
    pub archived: usize,
    pub failed: usize,
    pub requests: usize,
    pub gaps: Vec<String>,
    pub manifest_path: PathBuf,
    pub names_path: PathBuf,
}

pub fn run_plan(config: &HarvestConfig) -> Result<HarvestPlan> {
    let client = MediaWikiClient::new(&config.client)?;
    Ok(plan(&client, config))
}

pub fn run_harvest(config: &HarvestConfig) -> Result<HarvestReport> {
    let client = MediaWikiClient::new(&config.client)?;
    harvest(&client, config, &ThreadSleeper)
}

/// Discover every configured topic and build the capped worklist.
pub fn plan<T: Transport + ?Sized>(transport: &T, config: &HarvestConfig) -> HarvestPlan {
    let categories = discover(transport, &config.topics, &config.discovery);
    let (worklist, stats) = build_worklist(&categories, config.max_pages);
    log::info!(
        "worklist: {} discovered, {} unique, {} kept (cap {})",
        stats.discovered,
        stats.unique,
        stats.kept,
        config.max_pages
    );
    HarvestPlan {
        categories,
        worklist,
        stats,
        requests: transport.request_count(),
    }
}

/// Full run: discovery, archiving, then the name table and manifest.
///
/// Only setup and the final writes can fail; topic and page failures end up in the manifest.
pub fn harvest<T: Transport + ?Sized>(
    transport: &T,
    config: &HarvestConfig,
    sleeper: &dyn Sleeper,
) -> Result<HarvestReport> {
    log::info!(
        "harvesting {} topics (max {} pages) into {}",
        config.topics.len(),
        config.max_pages,
        config.output_dir.display()
    );
    let layout = ArchiveLayout::new(&config.output_dir);
    layout.prepare()?;

    let HarvestPlan {
        categories,
        worklist,
        stats,
        ..
    } = plan(transport, config);

    let mut names = NameRegistry::default();
    let fetched = archive(
        transport,
        &worklist,
        &layout,
        &mut names,
        &config.archive,
        sleeper,
    );

    let names_path = layout.names_path();
    write_json_atomic(&names_path, names.entries()).context("failed to write name table")?;

    let manifest = Manifest::new(categories, fetched);
    let manifest_path = layout.manifest_path();
    manifest
        .write(&manifest_path)
        .context("failed to write manifest")?;
    log::info!(
        "archived {} of {} pages; manifest at {}",
        manifest.archived(),
        worklist.len(),
        manifest_path.display()
    );

    Ok(HarvestReport {
        topics: manifest.categories.len(),
        discovered: stats.discovered,
        unique: stats.unique,
        worklist: stats.kept,
        archived: manifest.archived(),
        failed: manifest.failed(),
        requests: transport.request_count(),
        gaps: manifest
            .categories
            .gaps()
            .into_iter()
            .map(str::to_string)
            .collect(),
        manifest_path,
        names_path,
    })
}
