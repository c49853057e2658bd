//! Configuration types and loading
//!
//! Configuration is YAML with kebab-case keys; every section has defaults so
//! a missing or partial file still yields a working setup. The fallback
//! chain is: explicit path, then `.orchd.yml` in the working directory, then
//! `~/.config/orchd/orchd.yml`, then built-in defaults.

use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{TaskType, WorkItemKind};

/// Main orchestrator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduler retry policy and priority boosting
    pub scheduler: SchedulerConfig,

    /// Execution loop turn budgeting
    pub execution: ExecutionConfig,

    /// Decision engine thresholds
    pub decision: DecisionConfig,

    /// Session and context-window management
    pub session: SessionConfig,

    /// Suspension-point timeouts
    pub timeouts: TimeoutsConfig,

    /// Agent capability provider
    pub agent: ProviderConfig,

    /// Supervising LLM capability provider
    pub supervisor: ProviderConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            let config = Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()))?;
            config.validate()?;
            return Ok(config);
        }

        let local_config = PathBuf::from(".orchd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => {
                    config.validate()?;
                    return Ok(config);
                }
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("orchd").join("orchd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        config.validate()?;
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject configurations that violate documented bounds
    pub fn validate(&self) -> Result<()> {
        let turns = &self.execution.max_turns;
        if turns.min > turns.max || turns.default < turns.min || turns.default > turns.max {
            bail!(
                "max-turns bounds invalid: min {} default {} max {}",
                turns.min,
                turns.default,
                turns.max
            );
        }
        if self.scheduler.retry.factor < 1.0 {
            bail!("retry factor must be >= 1.0");
        }
        if !(0.0..1.0).contains(&self.scheduler.retry.jitter) {
            bail!("retry jitter must be in [0, 1)");
        }

        let zones = &self.session.context_window.zones;
        let ordered = 0.0 < zones.yellow
            && zones.yellow < zones.orange
            && zones.orange < zones.red
            && zones.red < zones.emergency
            && zones.emergency <= 1.0;
        if !ordered {
            bail!(
                "zone thresholds must be strictly ordered: yellow {} orange {} red {} emergency {}",
                zones.yellow,
                zones.orange,
                zones.red,
                zones.emergency
            );
        }

        let thresholds = &self.decision.thresholds;
        for (name, value) in [
            ("high-confidence", thresholds.high_confidence),
            ("medium-confidence", thresholds.medium_confidence),
            ("quality-gate", thresholds.quality_gate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("decision threshold {} out of range: {}", name, value);
            }
        }
        if thresholds.medium_confidence > thresholds.high_confidence {
            bail!("medium-confidence must not exceed high-confidence");
        }

        if let WindowLimitSetting::Named(name) = &self.session.context_window.limit
            && name != "auto"
        {
            bail!("context-window limit must be an integer or 'auto', got '{}'", name);
        }
        if self.session.optimization_profile != "auto"
            && self
                .session
                .optimization_profile
                .parse::<crate::session::OptimizationProfile>()
                .is_err()
        {
            bail!(
                "unknown optimization profile: '{}'",
                self.session.optimization_profile
            );
        }

        Ok(())
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Backoff policy for transient failures
    pub retry: RetryConfig,

    /// Whether effective-priority boosting applies on reads
    pub boosting: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            boosting: true,
        }
    }
}

/// Retry backoff policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay in seconds
    #[serde(rename = "base-delay-seconds")]
    pub base_delay_seconds: u64,

    /// Exponential growth factor
    pub factor: f64,

    /// Jitter fraction applied uniformly in [1-j, 1+j]
    pub jitter: f64,

    /// Execution attempts before terminal failure
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: 60,
            factor: 2.0,
            jitter: 0.2,
            max_attempts: 3,
        }
    }
}

/// Execution loop configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Adaptive turn budgeting
    #[serde(rename = "max-turns")]
    pub max_turns: MaxTurnsConfig,
}

/// Adaptive max-turns ladder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxTurnsConfig {
    /// Overrides keyed by work-item kind; checked first
    #[serde(rename = "by-work-item-kind")]
    pub by_work_item_kind: HashMap<WorkItemKind, u32>,

    /// Overrides keyed by fine-grained task type; checked second
    #[serde(rename = "by-task-type")]
    pub by_task_type: HashMap<TaskType, u32>,

    /// Fallback when no override or estimate applies
    pub default: u32,

    pub min: u32,

    pub max: u32,

    /// Multiplier applied per retry after turn exhaustion
    #[serde(rename = "retry-multiplier")]
    pub retry_multiplier: f64,

    /// Whether turn exhaustion may schedule a retry automatically
    #[serde(rename = "auto-retry")]
    pub auto_retry: bool,
}

impl Default for MaxTurnsConfig {
    fn default() -> Self {
        let by_work_item_kind = HashMap::from([
            (WorkItemKind::Epic, 100),
            (WorkItemKind::Story, 50),
            (WorkItemKind::Task, 30),
            (WorkItemKind::Subtask, 20),
        ]);
        let by_task_type = HashMap::from([
            (TaskType::Validation, 5),
            (TaskType::CodeGeneration, 12),
            (TaskType::Refactoring, 15),
            (TaskType::Debugging, 20),
            (TaskType::ErrorAnalysis, 8),
            (TaskType::Planning, 5),
            (TaskType::Documentation, 3),
            (TaskType::Testing, 8),
        ]);
        Self {
            by_work_item_kind,
            by_task_type,
            default: 50,
            min: 3,
            max: 150,
            retry_multiplier: 3.0,
            auto_retry: true,
        }
    }
}

/// Decision engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub thresholds: DecisionThresholds,
}

/// Score gates consulted by the decision engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionThresholds {
    #[serde(rename = "high-confidence")]
    pub high_confidence: f64,

    #[serde(rename = "medium-confidence")]
    pub medium_confidence: f64,

    #[serde(rename = "quality-gate")]
    pub quality_gate: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            high_confidence: 0.85,
            medium_confidence: 0.65,
            quality_gate: 0.80,
        }
    }
}

/// Session and context-window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(rename = "context-window")]
    pub context_window: ContextWindowConfig,

    /// `auto` or an explicit profile name
    #[serde(rename = "optimization-profile")]
    pub optimization_profile: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            context_window: ContextWindowConfig::default(),
            optimization_profile: "auto".to_string(),
        }
    }
}

/// Context-window limit: a fixed token count or `auto` discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WindowLimitSetting {
    Fixed(u64),
    Named(String),
}

impl WindowLimitSetting {
    pub fn fixed(&self) -> Option<u64> {
        match self {
            Self::Fixed(limit) => Some(*limit),
            Self::Named(_) => None,
        }
    }
}

impl Default for WindowLimitSetting {
    fn default() -> Self {
        Self::Named("auto".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextWindowConfig {
    /// Token budget, or `auto` to discover from the agent
    pub limit: WindowLimitSetting,

    pub zones: ZoneThresholds,

    /// Whether orange/red zones trigger a refresh automatically
    #[serde(rename = "auto-refresh")]
    pub auto_refresh: bool,
}

impl Default for ContextWindowConfig {
    fn default() -> Self {
        Self {
            limit: WindowLimitSetting::default(),
            zones: ZoneThresholds::default(),
            auto_refresh: true,
        }
    }
}

/// Utilization zone boundaries; strictly ordered
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneThresholds {
    pub yellow: f64,
    pub orange: f64,
    pub red: f64,
    pub emergency: f64,
}

impl Default for ZoneThresholds {
    fn default() -> Self {
        Self {
            yellow: 0.50,
            orange: 0.70,
            red: 0.85,
            emergency: 0.95,
        }
    }
}

/// Suspension-point timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    #[serde(rename = "agent-seconds")]
    pub agent_seconds: u64,

    #[serde(rename = "llm-seconds")]
    pub llm_seconds: u64,

    #[serde(rename = "store-seconds")]
    pub store_seconds: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            agent_seconds: 7200,
            llm_seconds: 120,
            store_seconds: 30,
        }
    }
}

/// External capability provider selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider name ("http" or "mock")
    pub provider: String,

    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Environment variable holding the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    pub model: String,

    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Known context window for the model, when the capability does not
    /// publish one
    #[serde(rename = "context-window")]
    pub context_window: Option<u64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            base_url: "http://localhost:8787".to_string(),
            api_key_env: "ORCHD_API_KEY".to_string(),
            model: "local-coder".to_string(),
            max_tokens: 16384,
            context_window: None,
        }
    }
}
