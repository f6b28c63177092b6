//! Web access tools: search and fetch URLs.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{required_str, to_json_safe, Tool, ToolArgs};

/// User agent sent by both web tools.
pub const USER_AGENT: &str = "gemini-agent/1.0";

/// DuckDuckGo Instant Answer API.
pub const DDG_API_URL: &str = "https://api.duckduckgo.com/";

const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);
const FETCH_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_RESULTS: usize = 8;
const MAX_TITLE_CHARS: usize = 120;
const MAX_TEXT_CHARS: usize = 8000;

/// Search the web via the DuckDuckGo Instant Answer API.
pub struct WebSearch {
    endpoint: String,
}

impl WebSearch {
    pub fn new() -> Self {
        Self::with_endpoint(DDG_API_URL)
    }

    /// Point the tool at a different API root (used by tests).
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl Default for WebSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    heading: Option<String>,
    #[serde(default)]
    abstract_text: Option<String>,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: Option<String>,
    #[serde(default)]
    related_topics: Option<Vec<Option<RelatedTopic>>>,
}

/// Either a topic with text and link, or a named group holding more topics.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RelatedTopic {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "FirstURL")]
    first_url: Option<String>,
    #[serde(default)]
    topics: Option<Vec<Option<RelatedTopic>>>,
}

impl RelatedTopic {
    fn as_result(&self) -> Option<SearchResult> {
        let text = self.text.as_deref().filter(|t| !t.is_empty())?;
        let url = self.first_url.as_deref().filter(|u| !u.is_empty())?;
        Some(SearchResult {
            title: text.chars().take(MAX_TITLE_CHARS).collect(),
            snippet: text.to_string(),
            url: Some(url.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct SearchResult {
    title: String,
    snippet: String,
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct SearchOutput<'a> {
    query: &'a str,
    results: Vec<SearchResult>,
}

/// Flatten the abstract and (one level of nested) related topics into a
/// uniform result list.
fn flatten_results(answer: InstantAnswer) -> Vec<SearchResult> {
    let mut results = Vec::new();

    if let Some(snippet) = answer.abstract_text.filter(|t| !t.is_empty()) {
        results.push(SearchResult {
            title: answer
                .heading
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| "Abstract".to_string()),
            snippet,
            url: answer.abstract_url,
        });
    }

    for topic in answer.related_topics.unwrap_or_default().into_iter().flatten() {
        if let Some(result) = topic.as_result() {
            results.push(result);
        } else if let Some(subtopics) = &topic.topics {
            results.extend(subtopics.iter().flatten().filter_map(RelatedTopic::as_result));
        }
    }

    results.truncate(MAX_RESULTS);
    results
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web using DuckDuckGo Instant Answer API."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "OBJECT",
            "properties": {
                "query": { "type": "STRING", "description": "Search query" },
                "region": { "type": "STRING", "description": "Region code", "nullable": true }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: &ToolArgs) -> anyhow::Result<Value> {
        let query =
            required_str(args, "query").ok_or_else(|| anyhow::anyhow!("Missing query"))?;
        let region = required_str(args, "region");

        let mut params = vec![("q", query), ("format", "json")];
        if let Some(region) = region {
            params.push(("kl", region));
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(SEARCH_TIMEOUT)
            .build()?;

        let answer: InstantAnswer = client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let results = flatten_results(answer);
        tracing::debug!(query = %query, count = results.len(), "Web search completed");

        Ok(to_json_safe(&SearchOutput { query, results }))
    }
}

/// Fetch a web page and extract its readable text.
pub struct FetchUrl;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchOutput<'a> {
    url: &'a str,
    content_type: String,
    text: String,
}

#[async_trait]
impl Tool for FetchUrl {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch a URL and extract readable text."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "OBJECT",
            "properties": {
                "url": { "type": "STRING", "description": "URL to fetch" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: &ToolArgs) -> anyhow::Result<Value> {
        let url = required_str(args, "url").ok_or_else(|| anyhow::anyhow!("Missing url"))?;

        let parsed =
            url::Url::parse(url).map_err(|e| anyhow::anyhow!("Invalid URL {}: {}", url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("Unsupported URL scheme: {}", parsed.scheme());
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        let response = client.get(parsed).send().await?.error_for_status()?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !content_type.contains("text") && !content_type.contains("html") {
            anyhow::bail!("Unsupported content-type: {}", content_type);
        }

        let body = response.text().await?;
        let text: String = extract_text(&body).chars().take(MAX_TEXT_CHARS).collect();

        Ok(to_json_safe(&FetchOutput {
            url,
            content_type,
            text,
        }))
    }
}

fn hidden_blocks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<noscript\b[^>]*>.*?</noscript\s*>|<!--.*?-->",
        )
        .expect("valid regex")
    })
}

fn tags() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"))
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Extract readable text from HTML: drop `script`, `style` and `noscript`
/// elements and comments, strip remaining tags, decode common entities and
/// collapse whitespace.
pub fn extract_text(html: &str) -> String {
    let visible = hidden_blocks().replace_all(html, " ");
    let text = tags().replace_all(&visible, " ");
    let text = html_decode(&text);
    whitespace().replace_all(&text, " ").trim().to_string()
}

fn entities() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"&(?:#[xX]([0-9a-fA-F]{1,8})|#([0-9]{1,10})|([a-zA-Z][a-zA-Z0-9]{1,31}));")
            .expect("valid regex")
    })
}

fn named_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "hellip" => "\u{2026}",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "middot" => "\u{b7}",
        "bull" => "\u{2022}",
        "deg" => "\u{b0}",
        "times" => "\u{d7}",
        "divide" => "\u{f7}",
        "cent" => "\u{a2}",
        "pound" => "\u{a3}",
        "euro" => "\u{20ac}",
        "yen" => "\u{a5}",
        _ => return None,
    })
}

/// Decode numeric character references and common named entities in one
/// pass, so `&amp;lt;` becomes `&lt;` and not `<`. Unknown names are kept.
fn html_decode(s: &str) -> String {
    entities()
        .replace_all(s, |caps: &regex::Captures| {
            let code = match (caps.get(1), caps.get(2), caps.get(3)) {
                (Some(hex), _, _) => u32::from_str_radix(hex.as_str(), 16).ok(),
                (_, Some(dec), _) => dec.as_str().parse::<u32>().ok(),
                (_, _, Some(name)) => {
                    return named_entity(name.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| caps[0].to_string());
                }
                _ => None,
            };
            code.filter(|&c| c != 0)
                .and_then(char::from_u32)
                .unwrap_or(char::REPLACEMENT_CHARACTER)
                .to_string()
        })
        .into_owned()
}
