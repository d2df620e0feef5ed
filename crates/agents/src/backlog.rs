//! Product backlog tools backed by GitHub issues.
//!
//! Requests authenticate as the agent that made the call: its token is read
//! from `{AGENT_KEY}_GITHUB_TOKEN` (for example `ANALYST_GITHUB_TOKEN`). The
//! repository comes from `GITHUB_REPO`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, Url};
use roundtable_common::{Result, RoundtableError};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::approval::{SUMMARY_LIMIT, summarize_text};
use crate::tools::{Tool, optional_arg, string_arg};

pub const DEFAULT_GITHUB_REPO: &str = "team-vanda/vanda-project";
const GITHUB_API: &str = "https://api.github.com";
const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const LIST_PAGE_SIZE: &str = "50";

/// Resolves an agent key to its GitHub token.
pub type TokenLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment variable holding the token for `agent_key`.
pub fn agent_token_var(agent_key: &str) -> String {
    format!("{}_GITHUB_TOKEN", agent_key.to_uppercase())
}

fn env_token(agent_key: &str) -> Option<String> {
    std::env::var(agent_token_var(agent_key))
        .ok()
        .filter(|token| !token.trim().is_empty())
}

#[derive(Debug, Deserialize)]
struct IssueLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Issue {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    labels: Vec<IssueLabel>,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    updated_at: String,
    #[serde(default)]
    html_url: String,
}

impl Issue {
    fn label_names(&self) -> Vec<&str> {
        self.labels.iter().map(|l| l.name.as_str()).collect()
    }
}

/// Shared GitHub client for the backlog tools.
#[derive(Clone)]
pub struct GitHubBacklog {
    http: reqwest::Client,
    api_base: String,
    repo: String,
    tokens: TokenLookup,
}

impl GitHubBacklog {
    /// Targets `GITHUB_REPO` (or the default repository) with per-agent env tokens.
    pub fn new(http: reqwest::Client) -> Self {
        let repo = std::env::var("GITHUB_REPO")
            .ok()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GITHUB_REPO.to_string());
        Self {
            http,
            api_base: GITHUB_API.to_string(),
            repo,
            tokens: Arc::new(env_token),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = repo.into();
        self
    }

    pub fn with_token_lookup(
        mut self,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.tokens = Arc::new(lookup);
        self
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// `{api}/repos/{owner}/{name}/issues[/{number}]`
    fn issues_url(&self, number: Option<u64>) -> Result<Url> {
        let (owner, name) = self
            .repo
            .split_once('/')
            .filter(|(owner, name)| !owner.is_empty() && !name.is_empty())
            .ok_or_else(|| {
                RoundtableError::Tool(format!("GITHUB_REPO must be owner/name, got '{}'", self.repo))
            })?;

        let mut url = Url::parse(&self.api_base)
            .map_err(|e| RoundtableError::Tool(format!("invalid GitHub API URL: {e}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| RoundtableError::Tool("GitHub API URL cannot take a path".to_string()))?;
            segments.pop_if_empty().extend(["repos", owner, name, "issues"]);
            if let Some(number) = number {
                segments.push(&number.to_string());
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, agent_key: &str) -> Result<RequestBuilder> {
        let token = (self.tokens)(agent_key).ok_or_else(|| {
            RoundtableError::Tool(format!(
                "no GitHub token for agent '{agent_key}'; set {}",
                agent_token_var(agent_key)
            ))
        })?;
        Ok(self
            .http
            .request(method, url)
            .timeout(REQUEST_TIMEOUT)
            .header(AUTHORIZATION, format!("token {token}"))
            .header(ACCEPT, GITHUB_ACCEPT))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| RoundtableError::Tool(format!("GitHub request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RoundtableError::Tool(format!("GitHub returned {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| RoundtableError::Tool(format!("invalid GitHub response: {e}")))
    }
}

/// The four backlog tools sharing one client.
pub fn backlog_tools(backlog: GitHubBacklog) -> Vec<Arc<dyn Tool>> {
    let backlog = Arc::new(backlog);
    vec![
        Arc::new(CreateBacklogItemTool::new(backlog.clone())),
        Arc::new(ListBacklogTool::new(backlog.clone())),
        Arc::new(UpdateBacklogItemTool::new(backlog.clone())),
        Arc::new(GetBacklogItemTool::new(backlog)),
    ]
}

/// Comma-separated labels, trimmed, blanks dropped.
fn split_labels(labels: &str) -> Vec<String> {
    labels
        .split(',')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Accepts `42`, `"42"` or `"#42"`.
fn issue_number_arg(arguments: &Value) -> Result<u64> {
    match arguments.get("issue_number") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().trim_start_matches('#').parse().ok(),
        _ => None,
    }
    .filter(|n| *n > 0)
    .ok_or_else(|| RoundtableError::Tool("missing or invalid 'issue_number'".to_string()))
}

fn issue_ref(arguments: &Value) -> String {
    issue_number_arg(arguments)
        .map(|n| format!("#{n}"))
        .unwrap_or_default()
}

pub struct CreateBacklogItemTool {
    backlog: Arc<GitHubBacklog>,
}

impl CreateBacklogItemTool {
    pub fn new(backlog: Arc<GitHubBacklog>) -> Self {
        Self { backlog }
    }
}

#[async_trait]
impl Tool for CreateBacklogItemTool {
    fn name(&self) -> &str {
        "create_backlog_item"
    }

    fn description(&self) -> &str {
        "Create a backlog item (GitHub issue) for product planning. Arguments: {\"title\": string, \
         \"description\": string, \"labels\": comma-separated string, \"priority\": low|medium|high|critical}"
    }

    fn summarize(&self, arguments: &Value) -> String {
        summarize_text("Create GitHub issue", optional_arg(arguments, "title"), SUMMARY_LIMIT)
    }

    async fn invoke(&self, agent_key: &str, arguments: &Value) -> Result<String> {
        let title = string_arg(arguments, "title")?;
        let description = string_arg(arguments, "description")?;
        let priority = match optional_arg(arguments, "priority") {
            "" => "medium",
            p => p,
        };

        let mut labels = split_labels(optional_arg(arguments, "labels"));
        labels.push(format!("priority-{priority}"));

        let url = self.backlog.issues_url(None)?;
        debug!(repo = %self.backlog.repo, agent = agent_key, "Creating backlog item");
        let issue: Issue = self
            .backlog
            .send(
                self.backlog
                    .request(Method::POST, url, agent_key)?
                    .json(&json!({"title": title, "body": description, "labels": labels})),
            )
            .await?;

        Ok(json!({
            "success": true,
            "issue_number": issue.number,
            "title": issue.title,
            "url": issue.html_url,
            "state": issue.state,
        })
        .to_string())
    }
}

pub struct ListBacklogTool {
    backlog: Arc<GitHubBacklog>,
}

impl ListBacklogTool {
    pub fn new(backlog: Arc<GitHubBacklog>) -> Self {
        Self { backlog }
    }
}

#[async_trait]
impl Tool for ListBacklogTool {
    fn name(&self) -> &str {
        "list_backlog"
    }

    fn description(&self) -> &str {
        "List product backlog items (GitHub issues). Arguments: {\"filter_labels\": comma-separated \
         string, \"state\": open|closed|all}"
    }

    fn summarize(&self, arguments: &Value) -> String {
        let state = match optional_arg(arguments, "state") {
            "" => "open",
            s => s,
        };
        summarize_text(
            "List GitHub issues",
            &format!("labels={}, state={state}", optional_arg(arguments, "filter_labels")),
            SUMMARY_LIMIT,
        )
    }

    async fn invoke(&self, agent_key: &str, arguments: &Value) -> Result<String> {
        let state = match optional_arg(arguments, "state") {
            "" => "open",
            s => s,
        };
        let filter_labels = optional_arg(arguments, "filter_labels");

        let mut url = self.backlog.issues_url(None)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("state", state)
                .append_pair("per_page", LIST_PAGE_SIZE)
                .append_pair("sort", "updated")
                .append_pair("direction", "desc");
            if !filter_labels.is_empty() {
                query.append_pair("labels", filter_labels);
            }
        }

        let issues: Vec<Issue> = self
            .backlog
            .send(self.backlog.request(Method::GET, url, agent_key)?)
            .await?;

        let items: Vec<Value> = issues
            .iter()
            .map(|issue| {
                json!({
                    "number": issue.number,
                    "title": issue.title,
                    "state": issue.state,
                    "labels": issue.label_names(),
                    "created_at": issue.created_at,
                    "updated_at": issue.updated_at,
                    "url": issue.html_url,
                })
            })
            .collect();

        Ok(json!({"success": true, "total": items.len(), "items": items}).to_string())
    }
}

pub struct UpdateBacklogItemTool {
    backlog: Arc<GitHubBacklog>,
}

impl UpdateBacklogItemTool {
    pub fn new(backlog: Arc<GitHubBacklog>) -> Self {
        Self { backlog }
    }
}

#[async_trait]
impl Tool for UpdateBacklogItemTool {
    fn name(&self) -> &str {
        "update_backlog_item"
    }

    fn description(&self) -> &str {
        "Update a backlog item (GitHub issue). Arguments: {\"issue_number\": integer, \"title\", \
         \"description\", \"labels\", \"state\": open|closed} (all but issue_number optional)"
    }

    fn summarize(&self, arguments: &Value) -> String {
        summarize_text("Update GitHub issue", &issue_ref(arguments), SUMMARY_LIMIT)
    }

    async fn invoke(&self, agent_key: &str, arguments: &Value) -> Result<String> {
        let number = issue_number_arg(arguments)?;

        // Only fields the agent supplied are changed.
        let mut payload = serde_json::Map::new();
        for (arg, field) in [("title", "title"), ("description", "body"), ("state", "state")] {
            let value = optional_arg(arguments, arg);
            if !value.is_empty() {
                payload.insert(field.to_string(), Value::from(value));
            }
        }
        let labels = optional_arg(arguments, "labels");
        if !labels.is_empty() {
            payload.insert("labels".to_string(), json!(split_labels(labels)));
        }

        let url = self.backlog.issues_url(Some(number))?;
        let issue: Issue = self
            .backlog
            .send(
                self.backlog
                    .request(Method::PATCH, url, agent_key)?
                    .json(&payload),
            )
            .await?;

        Ok(json!({
            "success": true,
            "issue_number": issue.number,
            "title": issue.title,
            "state": issue.state,
            "url": issue.html_url,
        })
        .to_string())
    }
}

pub struct GetBacklogItemTool {
    backlog: Arc<GitHubBacklog>,
}

impl GetBacklogItemTool {
    pub fn new(backlog: Arc<GitHubBacklog>) -> Self {
        Self { backlog }
    }
}

#[async_trait]
impl Tool for GetBacklogItemTool {
    fn name(&self) -> &str {
        "get_backlog_item"
    }

    fn description(&self) -> &str {
        "Get the details of a backlog item (GitHub issue). Arguments: {\"issue_number\": integer}"
    }

    fn summarize(&self, arguments: &Value) -> String {
        summarize_text("Get GitHub issue", &issue_ref(arguments), SUMMARY_LIMIT)
    }

    async fn invoke(&self, agent_key: &str, arguments: &Value) -> Result<String> {
        let number = issue_number_arg(arguments)?;
        let url = self.backlog.issues_url(Some(number))?;
        let issue: Issue = self
            .backlog
            .send(self.backlog.request(Method::GET, url, agent_key)?)
            .await?;

        Ok(json!({
            "success": true,
            "number": issue.number,
            "title": issue.title,
            "body": issue.body,
            "state": issue.state,
            "labels": issue.label_names(),
            "created_at": issue.created_at,
            "updated_at": issue.updated_at,
            "url": issue.html_url,
        })
        .to_string())
    }
}
