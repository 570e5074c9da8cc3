use std::collections::{BTreeMap, HashMap};

use sha2::{Digest, Sha256};

/// Filesystem-safe form of a page title.
///
/// Path and namespace separators become `_`, anything outside letters, digits, space,
/// `-` and `_` is dropped, surrounding spaces are trimmed and inner spaces become `_`.
/// Lossy: distinct titles may share a result; see [`NameRegistry`].
pub fn safe_name(title: &str) -> String {
    title
        .replace(['/', ':'], "_")
        .chars()
        .filter(|ch| ch.is_alphanumeric() || matches!(*ch, '_' | '-' | ' '))
        .collect::<String>()
        .trim_matches(' ')
        .replace(' ', "_")
}

/// Hands out one storage name per title for a run, suffixing a short title hash
/// whenever the plain safe name already belongs to a different title.
#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
    by_title: HashMap<String, String>,
    by_name: BTreeMap<String, String>,
}

impl NameRegistry {
    pub fn allocate(&mut self, title: &str) -> String {
        if let Some(existing) = self.by_title.get(title) {
            return existing.clone();
        }

        let base = safe_name(title);
        let hash = short_hash(title);
        let mut name = if base.is_empty() {
            format!("page-{hash}")
        } else {
            base.clone()
        };
        if self.by_name.contains_key(&name) {
            log::warn!("storage name {name:?} already used; disambiguating {title:?}");
            name = if base.is_empty() {
                format!("page-{hash}")
            } else {
                format!("{base}-{hash}")
            };
            let stem = name.clone();
            let mut counter = 2;
            while self.by_name.contains_key(&name) {
                name = format!("{stem}-{counter}");
                counter += 1;
            }
        }

        self.by_title.insert(title.to_string(), name.clone());
        self.by_name.insert(name.clone(), title.to_string());
        name
    }

    pub fn title_for(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(String::as_str)
    }

    /// Storage name to title, sorted by name.
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.by_name
    }
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut output = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
