use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::hands::{SessionConfig, SessionMode};

/// Bounds of the randomized pause between typed characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingCadence {
    pub min: Duration,
    pub max: Duration,
}

impl TypingCadence {
    /// No pause at all. Used where typing must be deterministic.
    pub const INSTANT: TypingCadence = TypingCadence {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn next_delay(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let span = (self.max - self.min).as_secs_f64();
        self.min + Duration::from_secs_f64(span * rand::random::<f64>())
    }
}

impl Default for TypingCadence {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_millis(200))
    }
}

/// Timing knobs for step execution and extraction.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Per-candidate wait when resolving a selector.
    pub element_timeout: Duration,
    /// Wait for `document.readyState == "complete"`.
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    pub typing: TypingCadence,
    pub scroll_pause: Duration,
    pub max_scroll_rounds: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            element_timeout: Duration::from_secs(20),
            ready_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(250),
            typing: TypingCadence::default(),
            scroll_pause: Duration::from_secs(1),
            max_scroll_rounds: crate::types::MAX_SCROLL_ROUNDS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SessionModeArg {
    Ephemeral,
    Persistent,
}

impl From<SessionModeArg> for SessionMode {
    fn from(arg: SessionModeArg) -> Self {
        match arg {
            SessionModeArg::Ephemeral => SessionMode::Ephemeral,
            SessionModeArg::Persistent => SessionMode::Persistent,
        }
    }
}

/// Process settings, from flags or the environment (a `.env` file is
/// loaded first by the binary).
#[derive(Debug, Clone, Parser)]
#[command(name = "agent", about = "Natural-language browser automation service")]
pub struct Settings {
    #[arg(long, env = "AGENT_BIND", default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "AGENT_MODEL", default_value = "gpt-4o-mini")]
    pub model: String,

    #[arg(
        long,
        env = "AGENT_LLM_URL",
        default_value = "https://api.openai.com/v1/chat/completions"
    )]
    pub llm_url: String,

    /// Chrome executable; auto-detected when unset.
    #[arg(long, env = "CHROME")]
    pub chrome_path: Option<PathBuf>,

    /// Attach to a running Chrome instead of launching one,
    /// e.g. `http://127.0.0.1:9222`.
    #[arg(long, env = "AGENT_DEBUGGER_URL")]
    pub debugger_url: Option<String>,

    /// Run automation sessions without a visible window.
    #[arg(long, env = "AGENT_HEADLESS", default_value_t = false)]
    pub headless: bool,

    /// `persistent` leaves the browser open after each run and leaks one
    /// browser process per run.
    #[arg(
        long,
        env = "AGENT_SESSION_MODE",
        value_enum,
        default_value_t = SessionModeArg::Ephemeral
    )]
    pub session_mode: SessionModeArg,

    #[arg(long, env = "AGENT_ELEMENT_TIMEOUT_SECS", default_value_t = 20)]
    pub element_timeout_secs: u64,

    #[arg(long, env = "AGENT_READY_TIMEOUT_SECS", default_value_t = 20)]
    pub ready_timeout_secs: u64,

    #[arg(long, env = "AGENT_TYPING_MIN_MS", default_value_t = 50)]
    pub typing_min_ms: u64,

    #[arg(long, env = "AGENT_TYPING_MAX_MS", default_value_t = 200)]
    pub typing_max_ms: u64,
}

impl Settings {
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            element_timeout: Duration::from_secs(self.element_timeout_secs),
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
            typing: TypingCadence::new(
                Duration::from_millis(self.typing_min_ms),
                Duration::from_millis(self.typing_max_ms),
            ),
            ..RunnerConfig::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            headless: self.headless,
            mode: self.session_mode.into(),
            chrome_path: self.chrome_path.clone(),
            debugger_url: self.debugger_url.clone(),
            ..SessionConfig::default()
        }
    }
}
