//! Single-flight human approval for tool calls.
//!
//! The gate holds at most one pending [`ToolApprovalRequest`] process-wide.
//! A user message `approve <id>` records the approval; the next
//! [`ToolApprovalGate::ensure_approval`] call consumes it and lets exactly one
//! tool invocation through.

use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

const MAX_ARGUMENT_CHARS: usize = 240;

/// Default summary length for [`summarize_text`].
pub const SUMMARY_LIMIT: usize = 160;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolApprovalRequest {
    pub request_id: String,
    pub tool_name: String,
    pub summary: String,
    pub arguments: serde_json::Value,
    pub created_at: SystemTime,
}

impl ToolApprovalRequest {
    /// User-facing prompt describing this request.
    pub fn prompt(&self) -> String {
        format!(
            "Approval required before using a tool.\n\
             Tool: {}\n\
             Summary: {}\n\
             Args: {}\n\
             Reply with: approve {id} or deny {id}",
            self.tool_name,
            self.summary,
            render_arguments(&self.arguments),
            id = self.request_id,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Approve,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolApprovalDecision {
    pub action: DecisionAction,
    pub request_id: String,
}

#[derive(Debug, Default)]
struct GateState {
    pending: Option<ToolApprovalRequest>,
    approved_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct ToolApprovalGate {
    state: Mutex<GateState>,
}

impl ToolApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(true, "")` only when the pending request was approved; the
    /// approval is consumed. Otherwise returns `(false, prompt)` for the
    /// pending request, minting one if none exists.
    pub fn ensure_approval(
        &self,
        tool_name: &str,
        summary: &str,
        arguments: &serde_json::Value,
    ) -> (bool, String) {
        let mut state = self.state.lock();

        if let Some(approved_id) = state.approved_id.take() {
            match state.pending.as_ref() {
                Some(pending) if pending.request_id == approved_id => {
                    state.pending = None;
                    info!(request_id = %approved_id, tool = tool_name, "Tool approval consumed");
                    return (true, String::new());
                }
                _ => debug!(request_id = %approved_id, "Discarding stale approval"),
            }
        }

        if let Some(pending) = state.pending.as_ref() {
            return (false, pending.prompt());
        }

        let request = ToolApprovalRequest {
            request_id: new_request_id(),
            tool_name: tool_name.to_string(),
            summary: if summary.trim().is_empty() {
                tool_name.to_string()
            } else {
                summary.to_string()
            },
            arguments: arguments.clone(),
            created_at: SystemTime::now(),
        };
        info!(
            request_id = %request.request_id,
            tool = tool_name,
            "Tool approval requested"
        );
        let prompt = request.prompt();
        state.pending = Some(request);
        (false, prompt)
    }

    /// Interprets `approve [id]` / `deny [id]`. Returns `None` when the text is
    /// not a decision, nothing is pending, or the id does not match.
    pub fn register_decision(&self, text: &str) -> Option<ToolApprovalDecision> {
        let normalized = text.trim().to_lowercase();
        let mut tokens = normalized.split_whitespace();
        let action = match tokens.next()? {
            "approve" => DecisionAction::Approve,
            "deny" => DecisionAction::Deny,
            _ => return None,
        };
        let requested_id = tokens.next();

        let mut state = self.state.lock();
        let pending_id = state.pending.as_ref()?.request_id.clone();

        if let Some(id) = requested_id
            && id != pending_id
        {
            debug!(requested = id, pending = %pending_id, "Ignoring decision for unknown request");
            return None;
        }

        match action {
            DecisionAction::Approve => {
                state.approved_id = Some(pending_id.clone());
            }
            DecisionAction::Deny => {
                state.pending = None;
                state.approved_id = None;
            }
        }

        info!(request_id = %pending_id, action = ?action, "Tool approval decision recorded");
        Some(ToolApprovalDecision {
            action,
            request_id: pending_id,
        })
    }

    /// Snapshot of the pending request, if any.
    pub fn pending(&self) -> Option<ToolApprovalRequest> {
        self.state.lock().pending.clone()
    }
}

fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn render_arguments(arguments: &serde_json::Value) -> String {
    truncate_chars(&arguments.to_string(), MAX_ARGUMENT_CHARS)
}

/// Short, single-line summary: `"<action>: <text>"`, text whitespace-collapsed
/// and truncated to `limit` characters.
pub fn summarize_text(action: &str, text: &str, limit: usize) -> String {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned = truncate_chars(&cleaned, limit);
    if cleaned.is_empty() {
        action.to_string()
    } else {
        format!("{action}: {cleaned}")
    }
}
