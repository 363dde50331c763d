//! The agent's closed tool set.
//!
//! | Name | Aliases | Call |
//! |------|---------|------|
//! | `search` | `web_search` | [`ToolCall::WebSearch`] |
//! | `getAllChunks` | `get_all_chunks` | [`ToolCall::FetchAllChunks`] |
//!
//! A [`Toolbox`] is built per query and bound to the identity being
//! answered; it will not read any other identity's index.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::SearchConfig;
use crate::http;
use crate::index::IndexManager;
use crate::models::UserIdentity;

pub const NO_REPORT_OBSERVATION: &str =
    "Error: No health report found for this user. Please upload a document first.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    WebSearch,
    FetchAllChunks,
}

impl ToolKind {
    pub const ALL: [ToolKind; 2] = [ToolKind::WebSearch, ToolKind::FetchAllChunks];

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "search" | "web_search" => Some(ToolKind::WebSearch),
            "getAllChunks" | "get_all_chunks" => Some(ToolKind::FetchAllChunks),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::WebSearch => "search",
            ToolKind::FetchAllChunks => "getAllChunks",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::WebSearch => {
                "Search the web when the user query requires external information, \
                 such as reference ranges or what a test measures. \
                 Action Input: the search query."
            }
            ToolKind::FetchAllChunks => {
                "Fetch every passage of the user's health report. Use only when the \
                 question needs the entire report (a summary, full analysis or overall \
                 interpretation) or when the provided data is insufficient. Do not use \
                 it for questions about a single test or metric already covered by the \
                 provided data. Action Input: the user ID."
            }
        }
    }

    /// Turn the raw `Action Input` into a typed call.
    pub fn call(&self, input: &str) -> ToolCall {
        match self {
            ToolKind::WebSearch => ToolCall::WebSearch {
                query: input.trim().to_string(),
            },
            ToolKind::FetchAllChunks => ToolCall::FetchAllChunks {
                identity: identity_argument(input),
            },
        }
    }
}

/// A resolved tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    WebSearch { query: String },
    /// `identity` is as the model wrote it; empty means "the current user".
    FetchAllChunks { identity: String },
}

/// Accepts `alice`, `user_id: alice`, `user_id=alice` or `{"user_id": "alice"}`.
fn identity_argument(input: &str) -> String {
    let s = input.trim();
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(s) {
        if let Some(id) = map.get("user_id").and_then(|v| v.as_str()) {
            return id.trim().to_string();
        }
    }
    let s = s
        .strip_prefix("user_id")
        .map(|rest| rest.trim_start().trim_start_matches([':', '=']))
        .unwrap_or(s);
    s.trim().trim_matches(|c: char| c == '"' || c == '\'').trim().to_string()
}

// ============ Web search ============

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<String>;
}

/// DuckDuckGo Instant Answer API. No key required.
pub struct DuckDuckGo {
    url: String,
    max_results: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl DuckDuckGo {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        Ok(Self {
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.duckduckgo.com".to_string()),
            max_results: config.max_results,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl WebSearch for DuckDuckGo {
    async fn search(&self, query: &str) -> Result<String> {
        let endpoint = format!("{}/", self.url);
        let json = http::send_json_with_retry("DuckDuckGo", self.max_retries, || {
            self.client.get(&endpoint).query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
        })
        .await?;

        Ok(summarize_instant_answer(&json, self.max_results))
    }
}

fn summarize_instant_answer(json: &serde_json::Value, max_results: usize) -> String {
    let mut lines: Vec<String> = Vec::new();

    for key in ["Answer", "AbstractText", "Definition"] {
        if let Some(text) = json.get(key).and_then(|v| v.as_str()) {
            if !text.trim().is_empty() {
                lines.push(text.trim().to_string());
            }
        }
    }

    let mut related = Vec::new();
    if let Some(topics) = json.get("RelatedTopics").and_then(|v| v.as_array()) {
        for topic in topics {
            match topic.get("Topics").and_then(|v| v.as_array()) {
                Some(group) => related.extend(group.iter().filter_map(topic_text)),
                None => related.extend(topic_text(topic)),
            }
        }
    }
    lines.extend(related.into_iter().take(max_results));

    if lines.is_empty() {
        "No results found.".to_string()
    } else {
        lines.join("\n")
    }
}

fn topic_text(topic: &serde_json::Value) -> Option<String> {
    topic
        .get("Text")
        .and_then(|t| t.as_str())
        .filter(|t| !t.trim().is_empty())
        .map(|t| t.trim().to_string())
}

pub struct DisabledSearch;

#[async_trait]
impl WebSearch for DisabledSearch {
    async fn search(&self, _query: &str) -> Result<String> {
        bail!("web search is disabled")
    }
}

pub fn create_search(config: &SearchConfig) -> Result<Arc<dyn WebSearch>> {
    match config.provider.as_str() {
        "duckduckgo" => Ok(Arc::new(DuckDuckGo::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledSearch)),
        other => bail!("Unknown search provider: {}", other),
    }
}

// ============ Toolbox ============

/// Executes tool calls on behalf of one identity.
pub struct Toolbox {
    identity: UserIdentity,
    indexes: IndexManager,
    search: Arc<dyn WebSearch>,
}

impl Toolbox {
    pub fn new(identity: UserIdentity, indexes: IndexManager, search: Arc<dyn WebSearch>) -> Self {
        Self {
            identity,
            indexes,
            search,
        }
    }

    /// Run `call` and return its observation. Errors are execution failures
    /// the loop reports back to the model.
    pub async fn execute(&self, call: &ToolCall) -> Result<String> {
        match call {
            ToolCall::WebSearch { query } => {
                if query.is_empty() {
                    bail!("search needs a query");
                }
                self.search.search(query).await
            }
            ToolCall::FetchAllChunks { identity } => {
                if !identity.is_empty() && identity != self.identity.as_str() {
                    return Ok(format!(
                        "Refused: getAllChunks can only read the report of user {}.",
                        self.identity
                    ));
                }
                let Some(index) = self.indexes.load(&self.identity).await? else {
                    return Ok(NO_REPORT_OBSERVATION.to_string());
                };
                tracing::debug!(identity = %self.identity, chunks = index.len(), "fetched all chunks");
                Ok(index
                    .chunks()
                    .map(|c| c.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_aliases() {
        assert_eq!(ToolKind::from_name("search"), Some(ToolKind::WebSearch));
        assert_eq!(ToolKind::from_name("web_search"), Some(ToolKind::WebSearch));
        assert_eq!(ToolKind::from_name("getAllChunks"), Some(ToolKind::FetchAllChunks));
        assert_eq!(ToolKind::from_name("get_all_chunks"), Some(ToolKind::FetchAllChunks));
        assert_eq!(ToolKind::from_name("calculator"), None);
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn identity_argument_forms() {
        assert_eq!(identity_argument("alice"), "alice");
        assert_eq!(identity_argument("\"alice\""), "alice");
        assert_eq!(identity_argument("user_id: alice"), "alice");
        assert_eq!(identity_argument("user_id=alice"), "alice");
        assert_eq!(identity_argument(r#"{"user_id": "alice"}"#), "alice");
        assert_eq!(identity_argument(""), "");
    }

    #[test]
    fn instant_answer_summary() {
        let json = serde_json::json!({
            "AbstractText": "Glycated hemoglobin is a form of hemoglobin.",
            "Answer": "",
            "RelatedTopics": [
                { "Text": "HbA1c - test for diabetes" },
                { "Name": "See also", "Topics": [{ "Text": "Blood sugar" }, { "Text": "Insulin" }] },
            ]
        });
        assert_eq!(
            summarize_instant_answer(&json, 2),
            "Glycated hemoglobin is a form of hemoglobin.\nHbA1c - test for diabetes\nBlood sugar"
        );
        assert_eq!(
            summarize_instant_answer(&serde_json::json!({}), 5),
            "No results found."
        );
    }

    #[tokio::test]
    async fn disabled_search_errors() {
        assert!(DisabledSearch.search("x").await.is_err());
    }
}
