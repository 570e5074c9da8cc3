use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TransportError;
use crate::transport::{QueryParams, Transport, params};

/// The two continuation-driven listings discovery relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListQuery<'a> {
    CategoryMembers(&'a str),
    Search(&'a str),
}

impl ListQuery<'_> {
    pub fn params(&self) -> QueryParams {
        match *self {
            Self::CategoryMembers(category) => params(&[
                ("action", "query"),
                ("list", "categorymembers"),
                ("cmtitle", category),
                ("cmtype", "page"),
                ("cmlimit", "max"),
            ]),
            Self::Search(query) => params(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", "50"),
                ("srnamespace", "0"),
            ]),
        }
    }
}

/// A `categorymembers` entry. Fields other than `title` are kept as returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMember {
    pub title: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CategoryMember {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            extra: Map::new(),
        }
    }
}

/// Drive a listing until `max_items` are gathered or the API stops returning `continue`.
///
/// Each response's `continue` object is echoed back verbatim on the next request.
/// The result never exceeds `max_items`.
pub fn collect<T, I, F>(
    transport: &T,
    base_params: &[(String, String)],
    mut extract: F,
    max_items: usize,
) -> Result<Vec<I>, TransportError>
where
    T: Transport + ?Sized,
    F: FnMut(&Value) -> Vec<I>,
{
    let mut items = Vec::new();
    if max_items == 0 {
        return Ok(items);
    }

    let mut continuation: QueryParams = Vec::new();
    loop {
        let request = merge_params(base_params, &continuation);
        let response = transport.fetch(&request)?;
        items.extend(extract(&response));
        if items.len() >= max_items {
            items.truncate(max_items);
            break;
        }

        match continuation_params(&response) {
            Some(next) if next != continuation => continuation = next,
            Some(_) => {
                log::warn!("API repeated the same continuation token; stopping pagination");
                break;
            }
            None => break,
        }
    }
    Ok(items)
}

pub fn list_category_members<T: Transport + ?Sized>(
    transport: &T,
    category: &str,
    max_items: usize,
) -> Result<Vec<CategoryMember>, TransportError> {
    collect(
        transport,
        &ListQuery::CategoryMembers(category).params(),
        |response| {
            query_list(response, "categorymembers")
                .iter()
                .filter_map(|item| serde_json::from_value::<CategoryMember>(item.clone()).ok())
                .filter(|member| !member.title.trim().is_empty())
                .collect()
        },
        max_items,
    )
}

pub fn search_titles<T: Transport + ?Sized>(
    transport: &T,
    query: &str,
    max_items: usize,
) -> Result<Vec<String>, TransportError> {
    collect(
        transport,
        &ListQuery::Search(query).params(),
        |response| {
            query_list(response, "search")
                .iter()
                .filter_map(|hit| hit.get("title").and_then(Value::as_str))
                .filter(|title| !title.trim().is_empty())
                .map(ToString::to_string)
                .collect()
        },
        max_items,
    )
}

fn query_list<'a>(response: &'a Value, list: &str) -> &'a [Value] {
    response
        .get("query")
        .and_then(|query| query.get(list))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn continuation_params(response: &Value) -> Option<QueryParams> {
    let object = response.get("continue")?.as_object()?;
    Some(
        object
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect(),
    )
}

fn merge_params(base: &[(String, String)], overrides: &[(String, String)]) -> QueryParams {
    let mut merged = base
        .iter()
        .filter(|(key, _)| !overrides.iter().any(|(other, _)| other == key))
        .cloned()
        .collect::<Vec<_>>();
    merged.extend(overrides.iter().cloned());
    merged
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::{
        ListQuery, collect, continuation_params, list_category_members,
        merge_params, search_titles,
    };
    use crate::testing::FakeWiki;
    use crate::transport::{Transport, params};

    #[test]
    fn collects_every_page_in_order_until_continuation_ends() {
        let mut wiki = FakeWiki::default();
        wiki.add_category(
            "Category:Trees",
            &[&["Tree", "Oak"], &["Willow"], &["Maple", "Yew", "Magic tree"]],
        );

        let members = list_category_members(&wiki, "Category:Trees", 10_000).expect("members");
        let titles = members
            .iter()
            .map(|member| member.title.as_str())
            .collect::<Vec<_>>();

        assert_eq!(
            titles,
            vec!["Tree", "Oak", "Willow", "Maple", "Yew", "Magic tree"]
        );
        assert_eq!(wiki.request_count(), 3);

        let calls = wiki.calls();
        assert_eq!(calls[0].get("cmcontinue"), None);
        assert_eq!(calls[1].get("cmcontinue").map(String::as_str), Some("page|1"));
        assert_eq!(calls[2].get("cmcontinue").map(String::as_str), Some("page|2"));
        assert_eq!(calls[2].get("continue").map(String::as_str), Some("-||"));
    }

    #[test]
    fn member_metadata_is_preserved() {
        let mut wiki = FakeWiki::default();
        wiki.add_category("Category:Banks", &[&["Bank (Falador)"]]);

        let members = list_category_members(&wiki, "Category:Banks", 10).expect("members");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].title, "Bank (Falador)");
        assert_eq!(members[0].extra.get("ns"), Some(&json!(0)));
        assert!(members[0].extra.contains_key("pageid"));
    }

    #[test]
    fn stops_at_max_items_without_requesting_more_pages() {
        let mut wiki = FakeWiki::default();
        wiki.add_category("Category:Monsters", &[&["Cow", "Goblin", "Imp"], &["Man"]]);

        let members = list_category_members(&wiki, "Category:Monsters", 2).expect("members");
        let titles = members
            .iter()
            .map(|member| member.title.as_str())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["Cow", "Goblin"]);
        assert_eq!(wiki.request_count(), 1);
    }

    #[test]
    fn search_echoes_numeric_offsets_and_flattens_titles() {
        let mut wiki = FakeWiki::default();
        wiki.set_search_page_size(2);
        wiki.add_search("ghost", &["Ghost", "Ghostly robes", "Ghost guard"]);

        let titles = search_titles(&wiki, "ghost", 200).expect("search");
        assert_eq!(titles, vec!["Ghost", "Ghostly robes", "Ghost guard"]);

        let calls = wiki.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].get("sroffset").map(String::as_str), Some("2"));
        assert_eq!(calls[1].get("srnamespace").map(String::as_str), Some("0"));
    }

    #[test]
    fn empty_listing_is_not_an_error() {
        let wiki = FakeWiki::default();
        let members = list_category_members(&wiki, "Category:Nothing", 10).expect("members");
        assert!(members.is_empty());
        assert!(search_titles(&wiki, "nothing", 10).expect("search").is_empty());
    }

    #[test]
    fn transport_failure_aborts_collection() {
        let mut wiki = FakeWiki::default();
        wiki.fail_category("Category:Shops");
        assert!(list_category_members(&wiki, "Category:Shops", 10).is_err());
    }

    #[test]
    fn zero_cap_makes_no_requests() {
        let wiki = FakeWiki::default();
        let items = collect(
            &wiki,
            &ListQuery::Search("bank").params(),
            |_: &Value| vec![1],
            0,
        )
        .expect("collect");
        assert!(items.is_empty());
        assert_eq!(wiki.request_count(), 0);
    }

    #[test]
    fn continuation_overrides_base_parameters() {
        let merged = merge_params(
            &params(&[("list", "search"), ("sroffset", "0")]),
            &params(&[("sroffset", "50"), ("continue", "-||")]),
        );
        assert_eq!(
            merged,
            params(&[("list", "search"), ("sroffset", "50"), ("continue", "-||")])
        );
    }

    #[test]
    fn continuation_requires_an_object() {
        assert_eq!(continuation_params(&json!({"query": {}})), None);
        assert_eq!(continuation_params(&json!({"continue": "-||"})), None);
        assert_eq!(
            continuation_params(&json!({"continue": {"sroffset": 50}})),
            Some(params(&[("sroffset", "50")]))
        );
    }
}
