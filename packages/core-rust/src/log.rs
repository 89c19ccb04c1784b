//! Context-aware logging.
//!
//! Call sites hand the request context and a message to a [`ContextLog`]; the
//! logger pulls the request id, user id and elapsed time off the context and
//! records the caller's source location on its own. Nothing at the call site
//! repeats "where am I" or "which request is this".

use std::fmt;
use std::panic::Location;
use std::str::FromStr;

use tracing_subscriber::EnvFilter;

use crate::context::RequestContext;

// ---------------------------------------------------------------------------
// Level & config
// ---------------------------------------------------------------------------

/// Severity of a log entry, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from parsing logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogConfigError {
    #[error("unknown log level: {0:?} (expected debug, info, warn or error)")]
    UnknownLevel(String),
}

impl FromStr for Level {
    type Err = LogConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(LogConfigError::UnknownLevel(other.to_string())),
        }
    }
}

/// Process-wide logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level emitted when `RUST_LOG` is not set.
    pub level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: Level::Info }
    }
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Calling this more than once
/// is harmless; only the first subscriber is installed.
pub fn init(config: &LogConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init()
    {
        tracing::debug!(error = %err, "tracing subscriber already installed, keeping it");
    }
}

// ---------------------------------------------------------------------------
// LogFields
// ---------------------------------------------------------------------------

/// Correlation fields read off a request context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogFields<'a> {
    pub request_id: Option<&'a str>,
    pub user_id: Option<&'a str>,
    pub elapsed_ms: Option<u64>,
}

impl<'a> LogFields<'a> {
    #[must_use]
    pub fn from_context(ctx: &'a RequestContext) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = ctx.elapsed().map(|d| d.as_millis() as u64);
        Self {
            request_id: ctx.request_id().map(|id| id.as_str()),
            user_id: ctx.user_id().map(|id| id.as_str()),
            elapsed_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// ContextLog
// ---------------------------------------------------------------------------

/// Logging sink that accepts `(context, level, message)`.
///
/// Implementors only provide [`ContextLog::log`]. The level helpers are
/// `#[track_caller]`, so `caller` is the line that called `info`, `error`, ...
pub trait ContextLog: Send + Sync {
    /// Whether entries at `level` would be recorded.
    fn enabled(&self, _level: Level) -> bool {
        true
    }

    fn log(
        &self,
        ctx: &RequestContext,
        level: Level,
        message: &dyn fmt::Display,
        caller: &'static Location<'static>,
    );

    #[track_caller]
    fn debug(&self, ctx: &RequestContext, message: &dyn fmt::Display) {
        self.log(ctx, Level::Debug, message, Location::caller());
    }

    #[track_caller]
    fn info(&self, ctx: &RequestContext, message: &dyn fmt::Display) {
        self.log(ctx, Level::Info, message, Location::caller());
    }

    #[track_caller]
    fn warn(&self, ctx: &RequestContext, message: &dyn fmt::Display) {
        self.log(ctx, Level::Warn, message, Location::caller());
    }

    #[track_caller]
    fn error(&self, ctx: &RequestContext, message: &dyn fmt::Display) {
        self.log(ctx, Level::Error, message, Location::caller());
    }
}

/// [`ContextLog`] that emits `tracing` events.
#[derive(Debug, Clone)]
pub struct TracingLog {
    min_level: Level,
}

impl TracingLog {
    #[must_use]
    pub fn new(config: &LogConfig) -> Self {
        Self {
            min_level: config.level,
        }
    }
}

impl Default for TracingLog {
    fn default() -> Self {
        Self::new(&LogConfig::default())
    }
}

impl ContextLog for TracingLog {
    fn enabled(&self, level: Level) -> bool {
        level >= self.min_level
    }

    fn log(
        &self,
        ctx: &RequestContext,
        level: Level,
        message: &dyn fmt::Display,
        caller: &'static Location<'static>,
    ) {
        if !self.enabled(level) {
            return;
        }

        let fields = LogFields::from_context(ctx);
        let caller = format!("{}:{}", caller.file(), caller.line());

        macro_rules! emit {
            ($macro:ident) => {
                tracing::$macro!(
                    request_id = fields.request_id,
                    user_id = fields.user_id,
                    elapsed_ms = fields.elapsed_ms,
                    caller = %caller,
                    "{message}"
                )
            };
        }

        match level {
            Level::Debug => emit!(debug),
            Level::Info => emit!(info),
            Level::Warn => emit!(warn),
            Level::Error => emit!(error),
        }
    }
}
