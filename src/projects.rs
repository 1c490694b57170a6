//! Identifier Fetcher: pages through the project listing and collects project ids.

use std::collections::HashSet;
use std::path::PathBuf;

use serde_json::Value;

use crate::client::{ApiClient, ApiError};
use crate::files;

const PROJECTS_PATH: &str = "/api/rs/project";

/// One page of the project listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub last: bool,
}

/// Interpret a listing response. `page_index` is the zero-based page that was requested.
pub fn parse_page(value: Value, page_index: u32) -> Result<Page, ApiError> {
    match value {
        Value::Object(mut map) if map.contains_key("content") => {
            let items = match map.remove("content") {
                Some(Value::Array(items)) => items,
                Some(other) => {
                    return Err(ApiError::MalformedResponse(format!(
                        "`content` is {}, expected an array",
                        json_kind(&other)
                    )))
                }
                None => Vec::new(),
            };

            let last = match map.get("last").and_then(Value::as_bool) {
                Some(last) => last,
                None => match map.get("totalPages").and_then(Value::as_u64) {
                    Some(total) => u64::from(page_index) + 1 >= total,
                    None => true,
                },
            };

            Ok(Page { items, last })
        }
        // A bare list is the whole result set
        Value::Array(items) => Ok(Page { items, last: true }),
        other => Err(ApiError::MalformedResponse(format!(
            "expected a page object or an array, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Pull the `id` of each item; null, missing or non-numeric ids are skipped.
pub fn extract_ids(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item.get("id")? {
            Value::Number(n) => n.as_u64().map(|id| id.to_string()),
            Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

pub struct ProjectFetcher<'a> {
    client: &'a ApiClient,
    page_size: u32,
}

impl<'a> ProjectFetcher<'a> {
    pub fn new(client: &'a ApiClient, page_size: u32) -> Self {
        Self {
            client,
            page_size: page_size.max(1),
        }
    }

    /// Fetch every page. Any failure aborts the whole fetch.
    pub fn fetch_all(&self, access_token: &str) -> Result<Vec<String>, ApiError> {
        let authorization = format!("Bearer {}", access_token);
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut page_index = 0u32;

        loop {
            let query = [
                ("page", page_index.to_string()),
                ("size", self.page_size.to_string()),
                ("sort", "id,asc".to_string()),
            ];
            let body = self.client.get_json(PROJECTS_PATH, &query, &authorization)?;
            let page = parse_page(body, page_index)?;

            let page_ids = extract_ids(&page.items);
            log::info!(
                "Page {}: {} projects ({} with ids)",
                page_index,
                page.items.len(),
                page_ids.len()
            );

            for id in page_ids {
                if seen.insert(id.clone()) {
                    ids.push(id);
                } else {
                    log::debug!("Duplicate project id {} on page {}", id, page_index);
                }
            }

            // An empty page ends the loop even if the metadata says otherwise
            if page.last || page.items.is_empty() {
                break;
            }
            page_index += 1;
        }

        Ok(ids)
    }
}

#[derive(Debug, Clone)]
pub struct FetchReport {
    pub ids: Vec<String>,
    pub output: PathBuf,
}

/// Exchange the credential, fetch all ids, then write them to `output`.
pub fn run(client: &ApiClient, credential: &str, page_size: u32, output: PathBuf) -> anyhow::Result<FetchReport> {
    let access_token = client.exchange_token(credential)?;
    let ids = ProjectFetcher::new(client, page_size).fetch_all(&access_token)?;

    files::write_column(&output, &ids)?;

    Ok(FetchReport { ids, output })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_flag_wins_over_total_pages() {
        let page = parse_page(json!({"content": [{"id": 1}], "last": true, "totalPages": 9}), 0).unwrap();
        assert!(page.last);

        let page = parse_page(json!({"content": [{"id": 1}], "last": false, "totalPages": 1}), 0).unwrap();
        assert!(!page.last);
    }

    #[test]
    fn test_last_inferred_from_total_pages() {
        let body = json!({"content": [{"id": 1}], "totalPages": 3});
        assert!(!parse_page(body.clone(), 1).unwrap().last);
        assert!(parse_page(body, 2).unwrap().last);

        // no pagination metadata at all
        assert!(parse_page(json!({"content": []}), 0).unwrap().last);
    }

    #[test]
    fn test_bare_list_is_final_page() {
        let page = parse_page(json!([{"id": 5}, {"id": 6}]), 0).unwrap();
        assert!(page.last);
        assert_eq!(page.items.len(), 2);
    }

    #[test]
    fn test_other_shapes_are_malformed() {
        assert!(matches!(
            parse_page(json!({"items": []}), 0),
            Err(ApiError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_page(json!("nope"), 0),
            Err(ApiError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_page(json!({"content": {"id": 1}}), 0),
            Err(ApiError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_extract_ids_skips_missing_and_null() {
        let items = vec![
            json!({"id": 10}),
            json!({"id": null}),
            json!({"name": "no id"}),
            json!({"id": "11"}),
            json!({"id": "abc"}),
            json!({"id": -3}),
            json!(42),
        ];
        assert_eq!(extract_ids(&items), vec!["10", "11"]);
    }
}
