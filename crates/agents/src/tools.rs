//! Approval-gated tools agents can call.
//!
//! An agent calls a tool by replying with nothing but a JSON object
//! `{"tool": "<name>", "arguments": {...}}`. Every invocation goes through the
//! shared [`ToolApprovalGate`] first. Tools run on behalf of the calling agent,
//! whose key is passed to [`Tool::invoke`] for per-agent credentials.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use roundtable_common::{AgentProfile, Result, RoundtableError};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::approval::{SUMMARY_LIMIT, ToolApprovalGate, summarize_text};
use crate::backlog::{GitHubBacklog, backlog_tools};

const DEFAULT_MAX_CHARS: usize = 4000;
const SEARCH_MAX_TOPICS: usize = 5;
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Human-readable summary shown in the approval prompt.
    fn summarize(&self, arguments: &Value) -> String;

    /// Runs the tool for the agent `agent_key`.
    async fn invoke(&self, agent_key: &str, arguments: &Value) -> Result<String>;
}

/// A tool call parsed from agent output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl ToolCall {
    /// Parses output that consists solely of a tool-call object, optionally
    /// wrapped in a fenced code block.
    pub fn parse(output: &str) -> Option<Self> {
        let trimmed = output.trim();
        let body = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|rest| rest.strip_suffix("```"))
            .unwrap_or(trimmed)
            .trim();

        if !body.starts_with('{') {
            return None;
        }
        let call: ToolCall = serde_json::from_str(body).ok()?;
        if call.tool.trim().is_empty() || !call.arguments.is_object() {
            return None;
        }
        Some(call)
    }
}

/// Wraps a tool so it only runs after a human approved the exact pending request.
pub struct ApprovalGatedTool {
    inner: Arc<dyn Tool>,
    gate: Arc<ToolApprovalGate>,
}

impl ApprovalGatedTool {
    pub fn new(inner: Arc<dyn Tool>, gate: Arc<ToolApprovalGate>) -> Self {
        Self { inner, gate }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn description(&self) -> &str {
        self.inner.description()
    }

    /// Returns the approval prompt, the tool output, or a user-safe error line.
    pub async fn call(&self, agent_key: &str, arguments: &Value) -> String {
        let summary = self.inner.summarize(arguments);
        let (approved, prompt) = self
            .gate
            .ensure_approval(self.inner.name(), &summary, arguments);
        if !approved {
            return prompt;
        }

        info!(tool = self.inner.name(), agent = agent_key, "Invoking approved tool");
        match self.inner.invoke(agent_key, arguments).await {
            Ok(text) if text.trim().is_empty() => "No content found".to_string(),
            Ok(text) => text,
            Err(e) => {
                warn!(
                    tool = self.inner.name(),
                    agent = agent_key,
                    error = %e,
                    "Tool invocation failed"
                );
                format!("Tool {} could not complete the request.", self.inner.name())
            }
        }
    }
}

/// Named set of gated tools.
pub struct ToolBox {
    gate: Arc<ToolApprovalGate>,
    tools: BTreeMap<String, ApprovalGatedTool>,
}

impl ToolBox {
    pub fn new(gate: Arc<ToolApprovalGate>) -> Self {
        Self {
            gate,
            tools: BTreeMap::new(),
        }
    }

    /// `web_search`, `fetch_url`, `wikipedia_lookup` and the GitHub backlog tools.
    pub fn builtin(gate: Arc<ToolApprovalGate>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("roundtable/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        let mut toolbox = Self::new(gate);
        toolbox.register(Arc::new(WebSearchTool::new(http.clone())));
        toolbox.register(Arc::new(FetchUrlTool::new(http.clone())));
        toolbox.register(Arc::new(WikipediaLookupTool::new(http.clone())));
        for tool in backlog_tools(GitHubBacklog::new(http)) {
            toolbox.register(tool);
        }
        toolbox
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools
            .insert(name, ApprovalGatedTool::new(tool, self.gate.clone()));
    }

    pub fn get(&self, name: &str) -> Option<&ApprovalGatedTool> {
        self.tools.get(name)
    }

    pub fn gate(&self) -> &Arc<ToolApprovalGate> {
        &self.gate
    }

    /// `(name, description)` pairs for prompt building.
    pub fn descriptions(&self) -> Vec<(String, String)> {
        self.tools
            .values()
            .map(|t| (t.name().to_string(), t.description().to_string()))
            .collect()
    }

    /// Runs `output` as a tool call if it is one and `agent` is allowed the tool.
    /// Returns `None` when the output is ordinary text.
    pub async fn dispatch(&self, agent: &AgentProfile, output: &str) -> Option<String> {
        let call = ToolCall::parse(output)?;
        if !agent.has_tool(&call.tool) {
            warn!(agent = %agent.key, tool = %call.tool, "Agent requested a tool it does not have");
            return None;
        }
        let tool = self.get(&call.tool)?;
        Some(tool.call(&agent.key, &call.arguments).await)
    }
}

pub(crate) fn string_arg<'a>(arguments: &'a Value, key: &str) -> Result<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RoundtableError::Tool(format!("missing string argument '{key}'")))
}

/// Trimmed string argument, or `""` when absent.
pub(crate) fn optional_arg<'a>(arguments: &'a Value, key: &str) -> &'a str {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
}

fn truncate(mut text: String, max_chars: usize) -> String {
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
        text.push_str("...");
    }
    text
}

/// Fetches public data from a URL.
pub struct FetchUrlTool {
    http: reqwest::Client,
    max_chars: usize,
}

impl FetchUrlTool {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch public data from a URL for analysis. Arguments: {\"url\": string}"
    }

    fn summarize(&self, arguments: &Value) -> String {
        let url = arguments.get("url").and_then(Value::as_str).unwrap_or_default();
        summarize_text("Fetch URL", url, SUMMARY_LIMIT)
    }

    async fn invoke(&self, _agent_key: &str, arguments: &Value) -> Result<String> {
        let url = string_arg(arguments, "url")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(RoundtableError::Tool(format!("unsupported URL: {url}")));
        }

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RoundtableError::Tool(format!("fetch failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RoundtableError::Tool(format!("fetch returned {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RoundtableError::Tool(format!("failed to read body: {e}")))?;
        Ok(truncate(body, self.max_chars))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    heading: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    related_topics: Vec<RelatedTopic>,
}

/// Grouped topics carry no `Text` and are skipped.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RelatedTopic {
    #[serde(default)]
    text: String,
    #[serde(default, rename = "FirstURL")]
    first_url: String,
}

impl InstantAnswer {
    fn render(&self) -> String {
        let mut lines = Vec::new();
        if !self.abstract_text.trim().is_empty() {
            let mut line = if self.heading.is_empty() {
                self.abstract_text.clone()
            } else {
                format!("{}: {}", self.heading, self.abstract_text)
            };
            if !self.abstract_url.is_empty() {
                line.push_str(&format!(" ({})", self.abstract_url));
            }
            lines.push(line);
        }
        for topic in self
            .related_topics
            .iter()
            .filter(|t| !t.text.trim().is_empty())
            .take(SEARCH_MAX_TOPICS)
        {
            if topic.first_url.is_empty() {
                lines.push(format!("- {}", topic.text));
            } else {
                lines.push(format!("- {} ({})", topic.text, topic.first_url));
            }
        }
        lines.join("\n")
    }
}

/// Searches the web through the DuckDuckGo instant answer API.
pub struct WebSearchTool {
    http: reqwest::Client,
    base_url: String,
    max_chars: usize,
}

impl WebSearchTool {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: "https://api.duckduckgo.com/".to_string(),
            max_chars: DEFAULT_MAX_CHARS,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn search_url(&self, query: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| RoundtableError::Tool(format!("invalid search base URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("format", "json")
            .append_pair("no_html", "1")
            .append_pair("no_redirect", "1")
            .append_pair("skip_disambig", "1");
        Ok(url)
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for market, competitor, and trend information. Arguments: {\"query\": string}"
    }

    fn summarize(&self, arguments: &Value) -> String {
        let query = arguments.get("query").and_then(Value::as_str).unwrap_or_default();
        summarize_text("Search the web for", query, SUMMARY_LIMIT)
    }

    async fn invoke(&self, _agent_key: &str, arguments: &Value) -> Result<String> {
        let query = string_arg(arguments, "query")?;
        let url = self.search_url(query)?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RoundtableError::Tool(format!("search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RoundtableError::Tool(format!("search returned {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RoundtableError::Tool(format!("failed to read search response: {e}")))?;
        let answer: InstantAnswer = serde_json::from_str(&body)
            .map_err(|e| RoundtableError::Tool(format!("invalid search response: {e}")))?;

        let rendered = answer.render();
        if rendered.is_empty() {
            return Ok("No results found".to_string());
        }
        Ok(truncate(rendered, self.max_chars))
    }
}

#[derive(Deserialize)]
struct WikipediaSummary {
    #[serde(default)]
    title: String,
    #[serde(default)]
    extract: String,
}

/// Looks up background information via the Wikipedia page-summary API.
pub struct WikipediaLookupTool {
    http: reqwest::Client,
    base_url: String,
}

impl WikipediaLookupTool {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: "https://en.wikipedia.org/api/rest_v1/page/summary".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn summary_url(&self, query: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| RoundtableError::Tool(format!("invalid Wikipedia base URL: {e}")))?;
        let title = query.split_whitespace().collect::<Vec<_>>().join("_");
        url.path_segments_mut()
            .map_err(|_| RoundtableError::Tool("Wikipedia base URL cannot take a path".to_string()))?
            .push(&title);
        Ok(url)
    }
}

#[async_trait]
impl Tool for WikipediaLookupTool {
    fn name(&self) -> &str {
        "wikipedia_lookup"
    }

    fn description(&self) -> &str {
        "Lookup background information on Wikipedia. Arguments: {\"query\": string}"
    }

    fn summarize(&self, arguments: &Value) -> String {
        let query = arguments.get("query").and_then(Value::as_str).unwrap_or_default();
        summarize_text("Lookup Wikipedia for", query, SUMMARY_LIMIT)
    }

    async fn invoke(&self, _agent_key: &str, arguments: &Value) -> Result<String> {
        let query = string_arg(arguments, "query")?;
        let url = self.summary_url(query)?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RoundtableError::Tool(format!("Wikipedia request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok("No results found".to_string());
        }
        if !response.status().is_success() {
            return Err(RoundtableError::Tool(format!(
                "Wikipedia returned {}",
                response.status()
            )));
        }

        let summary: WikipediaSummary = response
            .json()
            .await
            .map_err(|e| RoundtableError::Tool(format!("invalid Wikipedia response: {e}")))?;

        if summary.extract.trim().is_empty() {
            return Ok("No results found".to_string());
        }
        Ok(format!("{}: {}", summary.title, summary.extract))
    }
}
