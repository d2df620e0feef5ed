//! Routing and turn orchestration for Roundtable.
//!
//! The coordinator decides which agents answer an inbound message, runs them
//! over a shared transcript and returns one [`AgentResponse`] per turn.
//!
//! # Architecture
//!
//! ```text
//! inbound transcript
//!        │
//!        ▼
//! ┌──────────────────┐   approve <id> / deny <id>
//! │   Coordinator    │ ─────────────────────────► ToolApprovalGate
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐   @mentions, else router classification,
//! │  RoutingEngine   │   else default responder
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ TurnOrchestrator │ ──► CompletionService (one call per planned turn)
//! └────────┬─────────┘
//!          ▼
//!   Vec<AgentResponse>
//! ```
//!
//! [`AgentResponse`]: roundtable_common::AgentResponse

pub mod config;
pub mod coordinator;
pub mod orchestrator;
pub mod routing;

pub use config::{
    CoordinatorConfig, FailurePolicy, OrchestrationConfig, OrchestrationMode, RoutingConfig,
};
pub use coordinator::Coordinator;
pub use orchestrator::{PassResult, TurnOrchestrator, sequence_note, tag_output};
pub use routing::{MAX_RESPONDERS, RouteSource, RoutePlan, RoutingEngine, parse_plan};
