use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::archive::ArchiveOptions;
use crate::discovery::{DEFAULT_FALLBACK_CAP, DEFAULT_PRIMARY_CAP, DiscoveryOptions, Topic};
use crate::pacing::PacingPolicy;
use crate::transport::{MediaWikiClientConfig, RetryPolicy};

pub const DEFAULT_CONFIG_FILENAME: &str = "wikiarchive.toml";
pub const DEFAULT_API_URL: &str = "https://runescape.wiki/w/api.php";
pub const DEFAULT_USER_AGENT: &str = "wikiarchive/0.1 (RS3 wiki archival; contact: local dev)";
pub const DEFAULT_OUTPUT_DIR: &str = "datasets/rs3/wiki";
pub const DEFAULT_MAX_PAGES: usize = 2_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;

pub const DEFAULT_TOPICS: [(&str, &str); 10] = [
    ("Category:Banks", "bank"),
    ("Category:Lodestones", "lodestone"),
    ("Category:Teleports", "teleport"),
    ("Category:Abilities", "ability"),
    ("Category:Monsters", "monster"),
    ("Category:Fishing spots", "fishing spot"),
    ("Category:Trees", "tree"),
    ("Category:Mining nodes", "mining node"),
    ("Category:Shops", "shop"),
    ("Category:Quests", "quest"),
];

/// Contents of the optional TOML config file.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ConfigFile {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub harvest: HarvestSection,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub attempts: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub rate_limit_rps: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct HarvestSection {
    pub topics: Option<Vec<String>>,
    pub max_pages: Option<usize>,
    pub output: Option<PathBuf>,
    pub primary_cap: Option<usize>,
    pub fallback_cap: Option<usize>,
    pub pace_every: Option<usize>,
    pub pace_ms: Option<u64>,
    pub workers: Option<usize>,
    #[serde(default)]
    pub fallback_keywords: BTreeMap<String, String>,
}

/// Values given on the command line; these win over everything else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub output: Option<PathBuf>,
    pub topics: Option<Vec<String>>,
    pub max_pages: Option<usize>,
    pub workers: Option<usize>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub client: MediaWikiClientConfig,
    pub topics: Vec<Topic>,
    pub max_pages: usize,
    pub output_dir: PathBuf,
    pub discovery: DiscoveryOptions,
    pub archive: ArchiveOptions,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        HarvestConfig::resolve_with(&ConfigFile::default(), &CliOverrides::default(), |_| None)
    }
}

/// Load and parse the config file. A missing file is the empty config.
pub fn load_config(config_path: &Path) -> Result<ConfigFile> {
    if !config_path.exists() {
        return Ok(ConfigFile::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

impl HarvestConfig {
    /// CLI > process environment > config file > default.
    pub fn resolve(file: &ConfigFile, cli: &CliOverrides) -> Self {
        Self::resolve_with(file, cli, |key| env::var(key).ok())
    }

    pub fn resolve_with(
        file: &ConfigFile,
        cli: &CliOverrides,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let wiki = &file.wiki;
        let harvest = &file.harvest;
        let defaults = RetryPolicy::default();

        let client = MediaWikiClientConfig {
            api_url: env_string(&lookup, "WIKI_API_URL")
                .or_else(|| non_empty(wiki.api_url.as_deref()))
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            user_agent: env_string(&lookup, "WIKI_USER_AGENT")
                .or_else(|| non_empty(wiki.user_agent.as_deref()))
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout_ms: env_parsed(&lookup, "WIKI_HTTP_TIMEOUT_MS")
                .or(wiki.timeout_ms)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
            retry: RetryPolicy {
                max_attempts: env_parsed(&lookup, "WIKI_HTTP_ATTEMPTS")
                    .or(wiki.attempts)
                    .unwrap_or(defaults.max_attempts)
                    .max(1),
                backoff_step: env_parsed(&lookup, "WIKI_HTTP_BACKOFF_MS")
                    .or(wiki.backoff_ms)
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff_step),
                max_retry_after: defaults.max_retry_after,
            },
            rate_limit_rps: env_parsed(&lookup, "WIKI_RATE_LIMIT_RPS")
                .or(wiki.rate_limit_rps)
                .filter(|rps: &f64| rps.is_finite() && *rps > 0.0),
        };

        let topic_names = cli
            .topics
            .as_ref()
            .and_then(|topics| topic_list(topics.iter().map(String::as_str)))
            .or_else(|| {
                env_string(&lookup, "WIKI_HARVEST_TOPICS")
                    .and_then(|value| topic_list(value.split(',')))
                    .or_else(|| {
                        env_string(&lookup, "RS3_CATEGORIES")
                            .and_then(|value| topic_list(value.split(',')))
                    })
            })
            .or_else(|| {
                harvest
                    .topics
                    .as_ref()
                    .and_then(|topics| topic_list(topics.iter().map(String::as_str)))
            })
            .unwrap_or_else(|| {
                DEFAULT_TOPICS
                    .iter()
                    .map(|(name, _)| (*name).to_string())
                    .collect()
            });

        let mut keywords = DEFAULT_TOPICS
            .iter()
            .map(|(name, query)| ((*name).to_string(), (*query).to_string()))
            .collect::<BTreeMap<_, _>>();
        keywords.extend(harvest.fallback_keywords.clone());
        let topics = topic_names
            .into_iter()
            .map(|name| match keywords.get(&name) {
                Some(query) => Topic::with_fallback(name, query.clone()),
                None => Topic::new(name),
            })
            .collect();

        let pacing_defaults = PacingPolicy::default();
        Self {
            client,
            topics,
            max_pages: cli
                .max_pages
                .or_else(|| env_parsed(&lookup, "WIKI_HARVEST_MAX_PAGES"))
                .or_else(|| env_parsed(&lookup, "RS3_MAX_PAGES"))
                .or(harvest.max_pages)
                .unwrap_or(DEFAULT_MAX_PAGES),
            output_dir: cli
                .output
                .clone()
                .or_else(|| env_string(&lookup, "WIKI_HARVEST_OUTPUT").map(PathBuf::from))
                .or_else(|| harvest.output.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            discovery: DiscoveryOptions {
                primary_cap: harvest.primary_cap.unwrap_or(DEFAULT_PRIMARY_CAP),
                fallback_cap: harvest.fallback_cap.unwrap_or(DEFAULT_FALLBACK_CAP),
            },
            archive: ArchiveOptions {
                pacing: PacingPolicy {
                    every: harvest.pace_every.unwrap_or(pacing_defaults.every),
                    pause: harvest
                        .pace_ms
                        .map(Duration::from_millis)
                        .unwrap_or(pacing_defaults.pause),
                },
                workers: cli
                    .workers
                    .or_else(|| env_parsed(&lookup, "WIKI_HARVEST_WORKERS"))
                    .or(harvest.workers)
                    .unwrap_or(1)
                    .max(1),
            },
        }
    }

    pub fn topic_names(&self) -> Vec<&str> {
        self.topics.iter().map(|topic| topic.name.as_str()).collect()
    }
}

/// Split, trim, drop empties. `None` when nothing is left.
fn topic_list<'a>(entries: impl Iterator<Item = &'a str>) -> Option<Vec<String>> {
    let topics = entries
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    if topics.is_empty() { None } else { Some(topics) }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn env_string(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    non_empty(lookup(key).as_deref())
}

fn env_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env_string(lookup, key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("ignoring {key}={raw:?}: not a valid number");
            None
        }
    }
}
