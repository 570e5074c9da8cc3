use std::collections::HashSet;

use serde::Serialize;

use crate::discovery::TopicIndex;

/// Ordered, duplicate-free identifiers to archive, never longer than the cap it was built with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Worklist {
    titles: Vec<String>,
}

impl Worklist {
    pub fn titles(&self) -> &[String] {
        &self.titles
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.titles.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorklistStats {
    pub discovered: usize,
    pub unique: usize,
    pub kept: usize,
}

/// Merge topics in order, first occurrence wins, then truncate to `max_total`.
///
/// Every topic's listed members come first, then every topic's fallback search hits,
/// each pass in topic order. Truncation happens after the merge, so late topics and
/// search hits can be cut entirely.
pub fn build_worklist(index: &TopicIndex, max_total: usize) -> (Worklist, WorklistStats) {
    let mut seen = HashSet::new();
    let mut titles = Vec::new();
    let mut discovered = 0usize;

    let members = index
        .iter()
        .flat_map(|(_, result)| result.pages.iter().map(|member| member.title.as_str()));
    let search_hits = index
        .iter()
        .flat_map(|(_, result)| result.search_titles.iter().map(String::as_str));
    for title in members.chain(search_hits) {
        discovered += 1;
        if seen.insert(title) {
            titles.push(title.to_string());
        }
    }

    let unique = titles.len();
    if titles.len() > max_total {
        log::info!("worklist capped at {max_total} of {unique} unique pages");
        titles.truncate(max_total);
    }

    let stats = WorklistStats {
        discovered,
        unique,
        kept: titles.len(),
    };
    (Worklist { titles }, stats)
}
