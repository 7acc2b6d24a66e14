//! Scenario configuration
//!
//! A scenario is a YAML file naming the providers, models and request
//! parameters of one benchmark run. `${VAR}` placeholders in provider URLs
//! and API keys are filled from the environment when the file is loaded.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// One backend to benchmark
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Name of the provider, used as the result key
    pub name: String,
    /// Base URL of the API (without `/v1`)
    pub base_url: String,
    /// API key, sent as a bearer token when non-empty
    #[serde(default)]
    pub api_key: String,
    /// Model alias -> backend model id
    #[serde(default)]
    pub models: HashMap<String, String>,
    /// Model id used for aliases missing from `models`
    #[serde(default = "default_model")]
    pub default_model: String,
}

fn default_model() -> String {
    "facebook/opt-125m".to_string()
}

/// Which calls count toward the pacing interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingScope {
    /// Counter restarts for every (provider, model) pair
    #[default]
    PerModel,
    /// One counter for the whole run
    Run,
}

/// Rate-limit pacing: sleep `pause_secs` after every `every` calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacingConfig {
    /// 0 disables pacing
    #[serde(default = "default_pacing_every")]
    pub every: usize,
    #[serde(default = "default_pause_secs")]
    pub pause_secs: u64,
    #[serde(default)]
    pub scope: PacingScope,
}

fn default_pacing_every() -> usize {
    30
}
fn default_pause_secs() -> u64 {
    120
}

impl Default for PacingConfig {
    fn default() -> Self {
        PacingConfig {
            every: default_pacing_every(),
            pause_secs: default_pause_secs(),
            scope: PacingScope::default(),
        }
    }
}

impl PacingConfig {
    pub fn disabled() -> Self {
        PacingConfig {
            every: 0,
            ..Self::default()
        }
    }

    pub fn pause(&self) -> Duration {
        Duration::from_secs(self.pause_secs)
    }
}

/// Where persisted result items go
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistConfig {
    /// JSON-lines file the items are appended to
    pub path: String,
}

/// A complete benchmark scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Name of the scenario
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Prompt sent with every request
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// Model aliases, resolved per provider
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Providers to benchmark, in order
    pub providers: Vec<ProviderConfig>,
    /// Requests per (provider, model) pair
    #[serde(default = "default_num_requests")]
    pub num_requests: usize,
    /// Maximum tokens to generate
    #[serde(default = "default_max_output")]
    pub max_output: u32,
    /// Time token by token instead of end to end
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub verbose: bool,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub pacing: PacingConfig,
    /// Root directory for CDF artifacts
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default)]
    pub persist: Option<PersistConfig>,
}

fn default_prompt() -> String {
    "Explain the theory of relativity.".to_string()
}
fn default_models() -> Vec<String> {
    vec!["common-model".to_string()]
}
fn default_num_requests() -> usize {
    10
}
fn default_max_output() -> u32 {
    100
}
fn default_timeout() -> u64 {
    1800
}
fn default_output_dir() -> String {
    "benchmark_graph".to_string()
}

impl Scenario {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Reject scenarios that cannot produce any sample
    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(anyhow!("Scenario '{}' lists no providers", self.name));
        }
        if self.models.is_empty() {
            return Err(anyhow!("Scenario '{}' lists no models", self.name));
        }
        Ok(())
    }
}

/// Expand environment variables in a string
/// Replaces ${VAR_NAME} with the value of the environment variable
fn expand_env_vars(s: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;
    let mut result = s.to_string();
    let mut missing_vars = Vec::new();

    for caps in re.captures_iter(s) {
        if let Some(var_name) = caps.get(1) {
            let var_name_str = var_name.as_str();
            match std::env::var(var_name_str) {
                Ok(value) => {
                    let pattern = format!("${{{}}}", var_name_str);
                    result = result.replace(&pattern, &value);
                }
                Err(_) => {
                    missing_vars.push(var_name_str.to_string());
                }
            }
        }
    }

    if !missing_vars.is_empty() {
        return Err(anyhow!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        ));
    }

    Ok(result)
}

/// Expand environment variables in a scenario
pub fn expand_scenario_env_vars(mut scenario: Scenario) -> Result<Scenario> {
    for provider in &mut scenario.providers {
        provider.api_key = expand_env_vars(&provider.api_key)?;
        provider.base_url = expand_env_vars(&provider.base_url)?;
    }
    Ok(scenario)
}

pub fn parse_scenario(content: &str) -> Result<Scenario> {
    let scenario: Scenario = serde_yaml::from_str(content)?;
    let scenario = expand_scenario_env_vars(scenario)?;
    scenario.validate()?;
    Ok(scenario)
}

/// Load a scenario from a YAML file
pub fn load_scenario_from_file(path: &str) -> Result<Scenario> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file: {}", path))?;
    parse_scenario(&content).with_context(|| format!("Failed to parse scenario file: {}", path))
}
