//! In-memory wiki used by the unit tests in place of the live API.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{Value, json};

use crate::error::TransportError;
use crate::pacing::Sleeper;
use crate::transport::Transport;

#[derive(Default)]
pub(crate) struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub(crate) fn recorded(&self) -> Vec<Duration> {
        self.waits.lock().expect("sleeper lock").clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.waits.lock().expect("sleeper lock").push(duration);
    }
}

/// Category listings are stored as explicit pages so continuation can be exercised;
/// search results are split into pages of `search_page_size`.
pub(crate) struct FakeWiki {
    categories: BTreeMap<String, Vec<Vec<String>>>,
    searches: BTreeMap<String, Vec<String>>,
    pages: BTreeMap<String, (String, String)>,
    failing_categories: BTreeSet<String>,
    failing_searches: BTreeSet<String>,
    failing_pages: BTreeSet<String>,
    search_page_size: usize,
    calls: Mutex<Vec<BTreeMap<String, String>>>,
}

impl Default for FakeWiki {
    fn default() -> Self {
        Self {
            categories: BTreeMap::new(),
            searches: BTreeMap::new(),
            pages: BTreeMap::new(),
            failing_categories: BTreeSet::new(),
            failing_searches: BTreeSet::new(),
            failing_pages: BTreeSet::new(),
            search_page_size: 50,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeWiki {
    pub(crate) fn add_category(&mut self, category: &str, batches: &[&[&str]]) {
        let batches = batches
            .iter()
            .map(|batch| batch.iter().map(|title| (*title).to_string()).collect())
            .collect();
        self.categories.insert(category.to_string(), batches);
    }

    pub(crate) fn add_search(&mut self, query: &str, titles: &[&str]) {
        self.searches.insert(
            query.to_string(),
            titles.iter().map(|title| (*title).to_string()).collect(),
        );
    }

    pub(crate) fn add_page(&mut self, title: &str, wikitext: &str, html: &str) {
        self.pages
            .insert(title.to_string(), (wikitext.to_string(), html.to_string()));
    }

    pub(crate) fn fail_category(&mut self, category: &str) {
        self.failing_categories.insert(category.to_string());
    }

    pub(crate) fn fail_search(&mut self, query: &str) {
        self.failing_searches.insert(query.to_string());
    }

    pub(crate) fn fail_page(&mut self, title: &str) {
        self.failing_pages.insert(title.to_string());
    }

    pub(crate) fn set_search_page_size(&mut self, size: usize) {
        self.search_page_size = size.max(1);
    }

    pub(crate) fn calls(&self) -> Vec<BTreeMap<String, String>> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub(crate) fn calls_where(&self, key: &str, value: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.get(key).map(String::as_str) == Some(value))
            .count()
    }

    fn category_members(&self, call: &BTreeMap<String, String>) -> Result<Value, TransportError> {
        let category = call.get("cmtitle").cloned().unwrap_or_default();
        if self.failing_categories.contains(&category) {
            return Err(exhausted("categorymembers unavailable"));
        }
        let batches = self.categories.get(&category).cloned().unwrap_or_default();
        let index = call
            .get("cmcontinue")
            .and_then(|token| token.strip_prefix("page|"))
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(0);
        let batch = batches.get(index).cloned().unwrap_or_default();
        let members = batch
            .iter()
            .enumerate()
            .map(|(offset, title)| json!({"pageid": 1000 + index * 100 + offset, "ns": 0, "title": title}))
            .collect::<Vec<_>>();

        let mut payload = json!({"batchcomplete": true, "query": {"categorymembers": members}});
        if index + 1 < batches.len() {
            payload["continue"] = json!({"cmcontinue": format!("page|{}", index + 1), "continue": "-||"});
        }
        Ok(payload)
    }

    fn search(&self, call: &BTreeMap<String, String>) -> Result<Value, TransportError> {
        let query = call.get("srsearch").cloned().unwrap_or_default();
        if self.failing_searches.contains(&query) {
            return Err(exhausted("search unavailable"));
        }
        let titles = self.searches.get(&query).cloned().unwrap_or_default();
        let offset = call
            .get("sroffset")
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(0);
        let end = (offset + self.search_page_size).min(titles.len());
        let hits = titles
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|title| json!({"ns": 0, "title": title, "snippet": ""}))
            .collect::<Vec<_>>();

        let mut payload = json!({"query": {"searchinfo": {"totalhits": titles.len()}, "search": hits}});
        if end < titles.len() {
            payload["continue"] = json!({"sroffset": end, "continue": "-||"});
        }
        Ok(payload)
    }

    fn revisions(&self, call: &BTreeMap<String, String>) -> Result<Value, TransportError> {
        let title = call.get("titles").cloned().unwrap_or_default();
        if self.failing_pages.contains(&title) {
            return Err(exhausted("revisions unavailable"));
        }
        Ok(match self.pages.get(&title) {
            Some((wikitext, _)) => json!({"query": {"pages": [{
                "pageid": 1,
                "ns": 0,
                "title": title,
                "revisions": [{"slots": {"main": {"contentmodel": "wikitext", "content": wikitext}}}]
            }]}}),
            None => json!({"query": {"pages": [{"ns": 0, "title": title, "missing": true}]}}),
        })
    }

    fn parse(&self, call: &BTreeMap<String, String>) -> Result<Value, TransportError> {
        let title = call.get("page").cloned().unwrap_or_default();
        if self.failing_pages.contains(&title) {
            return Err(exhausted("parse unavailable"));
        }
        match self.pages.get(&title) {
            Some((_, html)) => Ok(json!({"parse": {"title": title, "pageid": 1, "text": html}})),
            None => Err(TransportError::Api {
                code: "missingtitle".to_string(),
                info: "The page you specified doesn't exist.".to_string(),
            }),
        }
    }
}

impl Transport for FakeWiki {
    fn fetch(&self, params: &[(String, String)]) -> Result<Value, TransportError> {
        let call = params.iter().cloned().collect::<BTreeMap<_, _>>();
        self.calls.lock().expect("calls lock").push(call.clone());

        let action = call.get("action").map(String::as_str);
        let list = call.get("list").map(String::as_str);
        let prop = call.get("prop").map(String::as_str);
        match (action, list, prop) {
            (Some("query"), Some("categorymembers"), _) => self.category_members(&call),
            (Some("query"), Some("search"), _) => self.search(&call),
            (Some("query"), None, Some("revisions")) => self.revisions(&call),
            (Some("parse"), _, _) => self.parse(&call),
            _ => Err(TransportError::Api {
                code: "badparams".to_string(),
                info: format!("unexpected request {call:?}"),
            }),
        }
    }

    fn request_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

fn exhausted(message: &str) -> TransportError {
    TransportError::Exhausted {
        attempts: 3,
        last: Box::new(TransportError::Decode(message.to_string())),
    }
}
