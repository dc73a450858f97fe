//! Configuration: the TOML file that defines agents, the complexity →
//! agent mapping, and the IPC port.
//!
//! Grounded on the config loader's layered resolution and serde-default
//! field style, adapted to this crate's schema and validation rules.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use fuel_store::Complexity;

fn default_prompt_args() -> Vec<String> {
    vec!["-p".to_string()]
}

fn default_max_concurrent() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDef {
    pub command: String,
    #[serde(default = "default_prompt_args")]
    pub prompt_args: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub resume_args: Vec<String>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Either a bare agent name or a detailed override, as a complexity
/// tier's target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComplexityTarget {
    Agent(String),
    Detailed {
        agent: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl ComplexityTarget {
    pub fn agent_name(&self) -> &str {
        match self {
            ComplexityTarget::Agent(name) => name,
            ComplexityTarget::Detailed { agent, .. } => agent,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComplexityMap {
    pub trivial: Option<ComplexityTarget>,
    pub simple: Option<ComplexityTarget>,
    pub moderate: Option<ComplexityTarget>,
    pub complex: Option<ComplexityTarget>,
}

impl ComplexityMap {
    fn targets(&self) -> impl Iterator<Item = &ComplexityTarget> {
        [&self.trivial, &self.simple, &self.moderate, &self.complex]
            .into_iter()
            .filter_map(|t| t.as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub primary: String,
    #[serde(default)]
    pub review: Option<String>,
    #[serde(default)]
    pub complexity: ComplexityMap,
    #[serde(default)]
    pub agents: HashMap<String, AgentDef>,
    pub consume_port: u16,
}

impl ConfigFile {
    /// Agent name to use for review tasks; falls back to `primary`.
    pub fn review_agent(&self) -> &str {
        self.review.as_deref().unwrap_or(&self.primary)
    }

    /// Agent name a complexity tier maps to, falling back to `primary`
    /// when the tier has no entry in `[complexity]`.
    pub fn resolve_agent(&self, complexity: Complexity) -> &str {
        let target = match complexity {
            Complexity::Trivial => self.complexity.trivial.as_ref(),
            Complexity::Simple => self.complexity.simple.as_ref(),
            Complexity::Moderate => self.complexity.moderate.as_ref(),
            Complexity::Complex => self.complexity.complex.as_ref(),
        };
        target.map(|t| t.agent_name()).unwrap_or(&self.primary)
    }

    fn validate(&self) -> Result<()> {
        if !self.agents.contains_key(&self.primary) {
            return Err(Error::Config(format!(
                "primary agent '{}' is not defined in [agents]",
                self.primary
            )));
        }
        if let Some(review) = &self.review {
            if !self.agents.contains_key(review) {
                return Err(Error::Config(format!(
                    "review agent '{review}' is not defined in [agents]"
                )));
            }
        }
        for target in self.complexity.targets() {
            let name = target.agent_name();
            if !self.agents.contains_key(name) {
                return Err(Error::Config(format!(
                    "complexity mapping references undefined agent '{name}'"
                )));
            }
        }
        Ok(())
    }

    /// Parse and validate `text` as a config file's contents.
    pub fn parse(text: &str) -> Result<Self> {
        let config: ConfigFile =
            toml::from_str(text).map_err(|e| Error::Config(format!("malformed configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config path (explicit > `FUEL_CONFIG` env > `.fuel/config.toml`
    /// under `cwd`) and load it.
    pub fn load(explicit_path: Option<&Path>, cwd: &Path) -> Result<Self> {
        let path = resolve_path(explicit_path, cwd)?;
        let text = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&text)
    }
}

fn resolve_path(explicit_path: Option<&Path>, cwd: &Path) -> Result<PathBuf> {
    if let Some(p) = explicit_path {
        return Ok(p.to_path_buf());
    }
    if let Ok(p) = env::var("FUEL_CONFIG") {
        return Ok(PathBuf::from(p));
    }
    let default_path = cwd.join(".fuel").join("config.toml");
    if default_path.exists() {
        return Ok(default_path);
    }
    Err(Error::Config(format!(
        "no configuration found: pass an explicit path, set FUEL_CONFIG, or create {}",
        default_path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"
            primary = "claude"
            consume_port = 7777

            [agents.claude]
            command = "claude"

            [complexity]
            trivial = "claude"
            complex = { agent = "claude", model = "opus" }
        "#
    }

    #[test]
    fn parses_minimal_valid_config() {
        let config = ConfigFile::parse(sample()).unwrap();
        assert_eq!(config.primary, "claude");
        assert_eq!(config.review_agent(), "claude");
        assert_eq!(config.consume_port, 7777);
        let agent = &config.agents["claude"];
        assert_eq!(agent.prompt_args, vec!["-p".to_string()]);
        assert_eq!(agent.max_concurrent, 2);
        assert_eq!(agent.max_attempts, 3);
        assert_eq!(agent.max_retries, 5);
    }

    #[test]
    fn rejects_undefined_primary_agent() {
        let text = r#"
            primary = "ghost"
            consume_port = 1
        "#;
        let err = ConfigFile::parse(text).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_complexity_entry_referencing_undefined_agent() {
        let text = r#"
            primary = "claude"
            consume_port = 1

            [agents.claude]
            command = "claude"

            [complexity]
            trivial = "ghost"
        "#;
        let err = ConfigFile::parse(text).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_unknown_complexity_key() {
        let text = r#"
            primary = "claude"
            consume_port = 1

            [agents.claude]
            command = "claude"

            [complexity]
            ultra = "claude"
        "#;
        assert!(ConfigFile::parse(text).is_err());
    }

    #[test]
    fn review_defaults_to_primary_when_absent() {
        let config = ConfigFile::parse(sample()).unwrap();
        assert_eq!(config.review_agent(), "claude");
    }

    #[test]
    fn explicit_path_wins_over_env_and_default() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.toml");
        std::fs::write(&explicit, sample()).unwrap();
        let resolved = resolve_path(Some(&explicit), dir.path()).unwrap();
        assert_eq!(resolved, explicit);
    }
}
