use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use crate::paginate::{CategoryMember, list_category_members, search_titles};
use crate::transport::Transport;

pub const CATEGORY_PREFIX: &str = "Category:";
pub const DEFAULT_PRIMARY_CAP: usize = 10_000;
pub const DEFAULT_FALLBACK_CAP: usize = 200;

/// A grouping the operator wants archived, plus the phrase to search for if it lists nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub name: String,
    pub fallback_query: Option<String>,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fallback_query: None,
        }
    }

    pub fn with_fallback(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fallback_query: Some(query.into()),
        }
    }

    /// Explicit fallback phrase, else the topic name without its `Category:` prefix.
    pub fn search_query(&self) -> String {
        if let Some(query) = &self.fallback_query
            && !query.trim().is_empty()
        {
            return query.trim().to_string();
        }
        self.name
            .strip_prefix(CATEGORY_PREFIX)
            .unwrap_or(&self.name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub primary_cap: usize,
    pub fallback_cap: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            primary_cap: DEFAULT_PRIMARY_CAP,
            fallback_cap: DEFAULT_FALLBACK_CAP,
        }
    }
}

/// Outcome of discovery for one topic. `count` is the primary listing size; fallback
/// fields are only present when the search ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryResult {
    pub count: usize,
    pub pages: Vec<CategoryMember>,
    pub method: DiscoveryMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_hits: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_titles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_error: Option<String>,
}

impl DiscoveryResult {
    pub fn primary(pages: Vec<CategoryMember>) -> Self {
        Self {
            count: pages.len(),
            pages,
            method: DiscoveryMethod::Primary,
            error: None,
            search_query: None,
            search_hits: None,
            search_titles: Vec::new(),
            search_error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::primary(Vec::new())
        }
    }

    fn record_fallback(&mut self, query: String, titles: Vec<String>, error: Option<String>) {
        self.method = DiscoveryMethod::Fallback;
        self.search_hits = Some(titles.len());
        self.search_query = Some(query);
        self.search_titles = titles;
        self.search_error = error;
    }

    /// Identifiers in discovery order: primary members first, then fallback hits.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.pages
            .iter()
            .map(|member| member.title.as_str())
            .chain(self.search_titles.iter().map(String::as_str))
    }

    pub fn is_gap(&self) -> bool {
        self.identifiers().next().is_none()
    }
}

/// Per-topic results in configuration order; serialized as a JSON object keyed by topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicIndex {
    entries: Vec<(String, DiscoveryResult)>,
}

impl TopicIndex {
    pub fn insert(&mut self, topic: impl Into<String>, result: DiscoveryResult) {
        let topic = topic.into();
        match self.entries.iter_mut().find(|(name, _)| *name == topic) {
            Some((_, existing)) => *existing = result,
            None => self.entries.push((topic, result)),
        }
    }

    pub fn get(&self, topic: &str) -> Option<&DiscoveryResult> {
        self.entries
            .iter()
            .find(|(name, _)| name == topic)
            .map(|(_, result)| result)
    }

    fn get_mut(&mut self, topic: &str) -> Option<&mut DiscoveryResult> {
        self.entries
            .iter_mut()
            .find(|(name, _)| name == topic)
            .map(|(_, result)| result)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DiscoveryResult)> {
        self.entries
            .iter()
            .map(|(name, result)| (name.as_str(), result))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn gaps(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, result)| result.is_gap())
            .map(|(name, _)| name)
            .collect()
    }
}

impl Serialize for TopicIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, result) in &self.entries {
            map.serialize_entry(name, result)?;
        }
        map.end()
    }
}

/// List every topic's members, then search for the topics that came back empty.
///
/// Failures never escape: a failed listing is recorded as zero members with the error
/// attached, and a failed search as zero hits.
pub fn discover<T: Transport + ?Sized>(
    transport: &T,
    topics: &[Topic],
    options: &DiscoveryOptions,
) -> TopicIndex {
    let mut index = TopicIndex::default();

    for topic in topics {
        let result = match list_category_members(transport, &topic.name, options.primary_cap) {
            Ok(pages) => {
                log::info!("{}: {} members", topic.name, pages.len());
                DiscoveryResult::primary(pages)
            }
            Err(error) => {
                log::warn!("{}: member listing failed: {error}", topic.name);
                DiscoveryResult::failed(error.to_string())
            }
        };
        index.insert(topic.name.clone(), result);
    }

    for topic in topics {
        let Some(result) = index.get_mut(&topic.name) else {
            continue;
        };
        if result.count > 0 || result.method == DiscoveryMethod::Fallback {
            continue;
        }

        let query = topic.search_query();
        let (titles, error) = match search_titles(transport, &query, options.fallback_cap) {
            Ok(titles) => (titles, None),
            Err(error) => {
                log::warn!("{}: fallback search {query:?} failed: {error}", topic.name);
                (Vec::new(), Some(error.to_string()))
            }
        };
        log::info!(
            "{}: no members, fallback search {query:?} found {} pages",
            topic.name,
            titles.len()
        );
        result.record_fallback(query, titles, error);
    }

    index
}
