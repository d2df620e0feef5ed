//! The team: agent roster, mention parsing, per-agent response predicates,
//! and approval-gated tools.
//!
//! ```text
//!   AgentRegistry ──► extract_mentions ──► (routing)
//!        │
//!        └──► build_responders ──► Responder::decide (volunteer mode)
//!
//!   ToolBox ──► ApprovalGatedTool ──► ToolApprovalGate (single pending request)
//!                      │
//!                      └──► web_search, fetch_url, wikipedia_lookup, GitHub backlog
//! ```

pub mod approval;
pub mod backlog;
pub mod mention;
pub mod registry;
pub mod responder;
pub mod tools;

pub use approval::{
    DecisionAction, SUMMARY_LIMIT, ToolApprovalDecision, ToolApprovalGate, ToolApprovalRequest,
    summarize_text,
};
pub use backlog::{
    CreateBacklogItemTool, DEFAULT_GITHUB_REPO, GetBacklogItemTool, GitHubBacklog,
    ListBacklogTool, TokenLookup, UpdateBacklogItemTool, agent_token_var, backlog_tools,
};
pub use mention::{extract_mentions, mentions_name};
pub use registry::{AgentRegistry, ROUTER_KEY, default_roster};
pub use responder::{
    GeneralistResponder, Responder, RouterResponder, SpecialistResponder, active_window,
    build_responders,
};
pub use tools::{
    ApprovalGatedTool, FetchUrlTool, Tool, ToolBox, ToolCall, WebSearchTool, WikipediaLookupTool,
};
