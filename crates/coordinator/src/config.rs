//! Configuration for the coordinator.
//!
//! # Security
//!
//! - Config file permission validation on Unix systems
//! - Rejects world-readable files containing API keys
//! - Warns about API keys stored in config files

use std::path::{Path, PathBuf};

use roundtable_agents::AgentRegistry;
use roundtable_common::{AgentProfile, RoundtableError};
use roundtable_llm::LlmConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Main coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Default completion provider
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub orchestration: OrchestrationConfig,

    /// Prepended to every agent's instructions
    #[serde(default = "default_team_mission")]
    pub team_mission: String,

    /// TOML roster file; relative paths resolve against the config file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roster_path: Option<PathBuf>,

    /// Inline roster; takes precedence over `roster_path`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Transcript entries included in the classification prompt
    pub context_messages: usize,

    /// Responder used when classification yields nothing usable
    pub default_agent: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            context_messages: 5,
            default_agent: "assistant".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationMode {
    /// Routed plan, executed in order over a growing transcript
    #[default]
    Chained,
    /// Routed plan, executed concurrently against the same base transcript
    FanOut,
    /// No router; agents volunteer through their response predicates
    Volunteer,
}

/// What a pass does after a completion failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and keep going with the remaining plan
    #[default]
    Continue,
    /// Record the failure and end the pass
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub mode: OrchestrationMode,

    pub failure_policy: FailurePolicy,

    /// Delay between streamed turns; cosmetic only
    pub pacing_ms: u64,

    /// Per-turn completion timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_timeout_ms: Option<u64>,

    /// Concurrent completions in fan-out mode
    pub fan_out_concurrency: usize,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            mode: OrchestrationMode::default(),
            failure_policy: FailurePolicy::default(),
            pacing_ms: 400,
            turn_timeout_ms: None,
            fan_out_concurrency: 3,
        }
    }
}

fn default_team_mission() -> String {
    "Mission: help the user reach sound, actionable decisions as a small team of experts. \
     Be brief and focus only on the most important points."
        .to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            routing: RoutingConfig::default(),
            orchestration: OrchestrationConfig::default(),
            team_mission: default_team_mission(),
            roster_path: None,
            agents: Vec::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from a TOML file.
    ///
    /// On Unix the file must be a regular file that is not world-writable,
    /// and not world-readable when it carries an API key.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let mut config = Self::from_toml_str(&content)?;
        let has_api_key = config.llm.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());

        #[cfg(unix)]
        validate_config_file_permissions(path, has_api_key)?;

        if has_api_key {
            warn!(
                "API key found in config file '{}'. For better security, use environment \
                 variables instead (GITHUB_TOKEN, OPENAI_API_KEY, ANTHROPIC_API_KEY).",
                path.display()
            );
        }

        config.resolve_relative_paths(path.parent());
        Ok(config)
    }

    /// Load configuration from a TOML file without permission checks.
    pub fn from_file_unchecked(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.resolve_relative_paths(path.parent());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn resolve_relative_paths(&mut self, base: Option<&Path>) {
        if let (Some(roster), Some(base)) = (self.roster_path.as_mut(), base)
            && roster.is_relative()
        {
            *roster = base.join(&*roster);
        }
    }

    /// Inline agents, else the roster file, else the built-in team.
    pub fn build_registry(&self) -> roundtable_common::Result<AgentRegistry> {
        let registry = if !self.agents.is_empty() {
            AgentRegistry::new(self.agents.clone())?
        } else if let Some(path) = &self.roster_path {
            AgentRegistry::from_toml_file(path)?
        } else {
            AgentRegistry::builtin()
        };
        self.validate_against(&registry)?;
        info!(agents = registry.len(), "Agent registry ready");
        Ok(registry)
    }

    /// Checks settings that depend on the roster.
    pub fn validate_against(&self, registry: &AgentRegistry) -> roundtable_common::Result<()> {
        if !registry.is_responder(&self.routing.default_agent) {
            return Err(RoundtableError::Config(format!(
                "routing.default_agent '{}' is not a responding agent in the roster",
                self.routing.default_agent
            )));
        }
        if self.routing.context_messages == 0 {
            return Err(RoundtableError::Config(
                "routing.context_messages must be at least 1".to_string(),
            ));
        }
        if self.orchestration.fan_out_concurrency == 0 {
            return Err(RoundtableError::Config(
                "orchestration.fan_out_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validate config file permissions on Unix systems.
///
/// - File must be a regular file (not symlink, directory, etc.)
/// - File must not be world-writable
/// - File holding an API key must not be world-readable
#[cfg(unix)]
fn validate_config_file_permissions(path: &Path, has_api_key: bool) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::symlink_metadata(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    if !metadata.is_file() {
        anyhow::bail!(
            "Config path '{}' is not a regular file. Symlinks and directories are not allowed.",
            path.display()
        );
    }

    let permission_bits = metadata.permissions().mode() & 0o777;

    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "Config file '{}' is world-writable (mode {:04o}). Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    if has_api_key && permission_bits & 0o004 != 0 {
        anyhow::bail!(
            "Config file '{}' contains an API key but is world-readable (mode {:04o}). \
             Fix with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    if has_api_key && permission_bits & 0o040 != 0 {
        warn!(
            "Config file '{}' contains an API key and is group-readable (mode {:04o}). \
             Consider restricting access with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL_CONFIG: &str = r#"
team_mission = "Ship the MVP."

[llm]
provider = "openai"
model = "gpt-4o-mini"
api_url = "http://localhost:11434/v1"

[routing]
context_messages = 10

[orchestration]
mode = "fan_out"
failure_policy = "abort"
pacing_ms = 0
turn_timeout_ms = 20000
"#;

    #[test]
    fn defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.routing.context_messages, 5);
        assert_eq!(config.routing.default_agent, "assistant");
        assert_eq!(config.orchestration.mode, OrchestrationMode::Chained);
        assert_eq!(config.orchestration.failure_policy, FailurePolicy::Continue);
        assert_eq!(config.orchestration.pacing_ms, 400);
        assert!(config.orchestration.turn_timeout_ms.is_none());
        assert_eq!(config.orchestration.fan_out_concurrency, 3);
        assert!(!config.team_mission.is_empty());
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = CoordinatorConfig::from_toml_str("").unwrap();
        assert_eq!(config.llm.provider, "github");
        assert_eq!(config.routing.context_messages, 5);
        let registry = config.build_registry().unwrap();
        assert_eq!(registry.roster().count(), 6);
    }

    #[test]
    fn parses_full_config() {
        let config = CoordinatorConfig::from_toml_str(FULL_CONFIG).unwrap();
        assert_eq!(config.team_mission, "Ship the MVP.");
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.routing.context_messages, 10);
        assert_eq!(config.routing.default_agent, "assistant");
        assert_eq!(config.orchestration.mode, OrchestrationMode::FanOut);
        assert_eq!(config.orchestration.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.orchestration.pacing_ms, 0);
        assert_eq!(config.orchestration.turn_timeout_ms, Some(20000));
        assert_eq!(config.orchestration.fan_out_concurrency, 3);
    }

    #[test]
    fn inline_agents_build_registry() {
        let config = CoordinatorConfig::from_toml_str(
            r#"
[routing]
default_agent = "helper"

[[agents]]
key = "helper"
name = "Ada"
role_title = "Helper"
kind = "generalist"
"#,
        )
        .unwrap();
        let registry = config.build_registry().unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_default_agent_is_rejected() {
        let config = CoordinatorConfig::from_toml_str("[routing]\ndefault_agent = \"router\"\n").unwrap();
        let err = config.build_registry().unwrap_err();
        assert!(matches!(err, RoundtableError::Config(_)));
    }

    #[test]
    fn roster_path_is_relative_to_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("team.toml"),
            "[[agents]]\nkey = \"assistant\"\nname = \"Emma\"\nrole_title = \"Assistant\"\nkind = \"generalist\"\n",
        )
        .unwrap();
        let config_path = dir.path().join("roundtable.toml");
        std::fs::write(&config_path, "roster_path = \"team.toml\"\n").unwrap();

        let config = CoordinatorConfig::from_file_unchecked(&config_path).unwrap();
        assert_eq!(config.roster_path.as_deref(), Some(dir.path().join("team.toml").as_path()));
        assert_eq!(config.build_registry().unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn world_writable_config_is_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "team_mission = \"x\"").unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o666)).unwrap();

        let err = CoordinatorConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("world-writable"));
    }

    #[cfg(unix)]
    #[test]
    fn world_readable_key_is_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[llm]\napi_key = \"ghp-secret\"").unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(CoordinatorConfig::from_file(file.path()).is_err());

        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600)).unwrap();
        let config = CoordinatorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("ghp-secret"));
    }
}
