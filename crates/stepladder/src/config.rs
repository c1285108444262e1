use std::path::Path;

use anyhow::{Context, Result};
use coordination::{DifficultyScore, EngineConfig, MergePolicy, SandboxConfig, Tier, TierPolicy};
use serde::{Deserialize, Serialize};

/// Model line-up used by the adaptive pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// The same model in every role
    Uniform,
    /// A specialised model per role, scaled with the tier
    #[default]
    Hybrid,
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uniform => write!(f, "uniform"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

const QWEN_CODER_7B: &str = "Qwen/Qwen2.5-Coder-7B-Instruct";
const QWEN_CODER_1_5B: &str = "Qwen/Qwen2.5-Coder-1.5B-Instruct";
const DEEPSEEK_CODER_V2: &str = "deepseek-ai/DeepSeek-Coder-V2-Instruct";
const LLAMA_8B: &str = "meta-llama/Llama-3.1-8B-Instruct";

/// OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base URL up to and including `/v1`
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".into(),
            api_key: None,
            request_timeout_secs: 120,
            temperature: 0.0,
            max_tokens: 2048,
        }
    }
}

/// Resolved model name per role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub planner: String,
    pub worker_s: String,
    pub worker_m: String,
    pub worker_l: String,
    pub merger: String,
    pub baseline: String,
}

impl ModelConfig {
    pub fn for_preset(preset: Preset) -> Self {
        match preset {
            Preset::Uniform => Self {
                planner: QWEN_CODER_7B.into(),
                worker_s: QWEN_CODER_7B.into(),
                worker_m: QWEN_CODER_7B.into(),
                worker_l: QWEN_CODER_7B.into(),
                merger: QWEN_CODER_7B.into(),
                baseline: QWEN_CODER_7B.into(),
            },
            Preset::Hybrid => Self {
                planner: LLAMA_8B.into(),
                worker_s: QWEN_CODER_1_5B.into(),
                worker_m: QWEN_CODER_7B.into(),
                worker_l: DEEPSEEK_CODER_V2.into(),
                merger: LLAMA_8B.into(),
                baseline: QWEN_CODER_7B.into(),
            },
        }
    }

    pub fn worker(&self, tier: Tier) -> &str {
        match tier {
            Tier::S => &self.worker_s,
            Tier::M => &self.worker_m,
            Tier::L => &self.worker_l,
        }
    }
}

/// Per-role overrides applied on top of a preset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOverrides {
    pub planner: Option<String>,
    pub worker_s: Option<String>,
    pub worker_m: Option<String>,
    pub worker_l: Option<String>,
    pub merger: Option<String>,
    pub baseline: Option<String>,
}

/// `[engine]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_escalations: u32,
    pub retry_at_top_tier: bool,
    pub collaborator_timeout_secs: u64,
    /// Difficulty assumed when the planner keeps returning garbage.
    /// Absent means such runs fault.
    pub fallback_difficulty: Option<DifficultyScore>,
    pub baseline_tier: Tier,
}

impl Default for EngineSection {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            max_escalations: engine.max_escalations,
            retry_at_top_tier: engine.retry_at_top_tier,
            collaborator_timeout_secs: engine.collaborator_timeout_secs,
            fallback_difficulty: engine.fallback_difficulty,
            baseline_tier: engine.baseline_tier,
        }
    }
}

/// `[merge]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeSection {
    pub policy: MergePolicy,
}

/// `[run]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Runs in flight at once
    pub concurrency: usize,
    pub preset: Preset,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            concurrency: 4,
            preset: Preset::default(),
        }
    }
}

/// Top-level configuration: TOML file, then `STEPLADDER_*` environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepladderConfig {
    pub endpoint: EndpointConfig,
    pub models: ModelOverrides,
    pub engine: EngineSection,
    pub tiers: TierPolicy,
    pub sandbox: SandboxConfig,
    pub merge: MergeSection,
    pub run: RunSection,
}

impl StepladderConfig {
    /// Load from `path` (if any) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse TOML")
    }

    /// Apply `STEPLADDER_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("STEPLADDER_BASE_URL") {
            self.endpoint.base_url = url;
        }
        if let Some(key) = lookup("STEPLADDER_API_KEY") {
            self.endpoint.api_key = Some(key);
        }
        if let Some(secs) = lookup("STEPLADDER_REQUEST_TIMEOUT_SECS") {
            self.endpoint.request_timeout_secs =
                parse_env("STEPLADDER_REQUEST_TIMEOUT_SECS", &secs)?;
        }

        let models = [
            ("STEPLADDER_PLANNER_MODEL", &mut self.models.planner),
            ("STEPLADDER_WORKER_S_MODEL", &mut self.models.worker_s),
            ("STEPLADDER_WORKER_M_MODEL", &mut self.models.worker_m),
            ("STEPLADDER_WORKER_L_MODEL", &mut self.models.worker_l),
            ("STEPLADDER_MERGER_MODEL", &mut self.models.merger),
            ("STEPLADDER_BASELINE_MODEL", &mut self.models.baseline),
        ];
        for (key, slot) in models {
            if let Some(model) = lookup(key) {
                *slot = Some(model);
            }
        }

        if let Some(preset) = lookup("STEPLADDER_PRESET") {
            self.run.preset = match preset.to_ascii_lowercase().as_str() {
                "uniform" => Preset::Uniform,
                "hybrid" => Preset::Hybrid,
                other => anyhow::bail!("STEPLADDER_PRESET: unknown preset '{other}'"),
            };
        }
        if let Some(max) = lookup("STEPLADDER_MAX_ESCALATIONS") {
            self.engine.max_escalations = parse_env("STEPLADDER_MAX_ESCALATIONS", &max)?;
        }
        if let Some(fallback) = lookup("STEPLADDER_FALLBACK_DIFFICULTY") {
            self.engine.fallback_difficulty = if fallback.eq_ignore_ascii_case("none") {
                None
            } else {
                let points: i64 = parse_env("STEPLADDER_FALLBACK_DIFFICULTY", &fallback)?;
                Some(
                    DifficultyScore::try_from(points)
                        .map_err(|e| anyhow::anyhow!("STEPLADDER_FALLBACK_DIFFICULTY: {e}"))?,
                )
            };
        }
        if let Some(interpreter) = lookup("STEPLADDER_INTERPRETER") {
            let argv: Vec<String> = interpreter.split_whitespace().map(String::from).collect();
            if argv.is_empty() {
                anyhow::bail!("STEPLADDER_INTERPRETER must not be empty");
            }
            self.sandbox.interpreter = argv;
        }
        if let Some(secs) = lookup("STEPLADDER_SANDBOX_TIMEOUT_SECS") {
            self.sandbox.timeout_secs = parse_env("STEPLADDER_SANDBOX_TIMEOUT_SECS", &secs)?;
        }
        Ok(())
    }

    /// Model names for the active preset with overrides applied.
    pub fn models(&self) -> ModelConfig {
        let mut models = ModelConfig::for_preset(self.run.preset);
        let overrides = [
            (&self.models.planner, &mut models.planner),
            (&self.models.worker_s, &mut models.worker_s),
            (&self.models.worker_m, &mut models.worker_m),
            (&self.models.worker_l, &mut models.worker_l),
            (&self.models.merger, &mut models.merger),
            (&self.models.baseline, &mut models.baseline),
        ];
        for (choice, slot) in overrides {
            if let Some(model) = choice {
                *slot = model.clone();
            }
        }
        models
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_escalations: self.engine.max_escalations,
            retry_at_top_tier: self.engine.retry_at_top_tier,
            collaborator_timeout_secs: self.engine.collaborator_timeout_secs,
            fallback_difficulty: self.engine.fallback_difficulty,
            baseline_tier: self.engine.baseline_tier,
            tiers: self.tiers,
            merge: self.merge.policy,
            sandbox: self.sandbox.clone(),
        }
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{key}: invalid value '{value}': {e}"))
}
