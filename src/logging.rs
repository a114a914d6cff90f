//! Logging setup for the container runtime
//!
//! The library emits structured `tracing` events (target `"spindle"`) at
//! registration, scope entry, bind, resolve, and teardown sites. This
//! module wires up a subscriber for applications that do not bring their
//! own.
//!
//! # Features
//!
//! - `logging` - emit events (default)
//! - `logging-json` - JSON subscriber output, for production
//! - `logging-pretty` - colourful subscriber output, for development
//!
//! # Example
//!
//! ```rust,ignore
//! use spindle::logging;
//!
//! logging::init_pretty();
//!
//! // or configured explicitly:
//! logging::builder()
//!     .trace()
//!     .spindle_only()
//!     .compact()
//!     .init();
//! ```

#[cfg(feature = "logging")]
use tracing::Level;

/// Subscriber output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON lines, for aggregation pipelines
    #[default]
    Json,
    /// Human-readable multi-line output with colours
    Pretty,
    /// Single-line output
    Compact,
}

/// Fluent subscriber configuration.
#[cfg(feature = "logging")]
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    with_file: bool,
    with_line_number: bool,
    with_thread_ids: bool,
}

#[cfg(feature = "logging")]
impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Json,
            target: None,
            with_file: false,
            with_line_number: false,
            with_thread_ids: false,
        }
    }
}

#[cfg(feature = "logging")]
impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Lower the minimum level to TRACE (per-resolve events).
    pub fn trace(mut self) -> Self {
        self.level = Level::TRACE;
        self
    }

    /// Set the minimum level to DEBUG.
    pub fn debug(mut self) -> Self {
        self.level = Level::DEBUG;
        self
    }

    /// Raise the minimum level to INFO.
    pub fn info(mut self) -> Self {
        self.level = Level::INFO;
        self
    }

    /// Only show events from one target.
    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Only show this crate's events.
    pub fn spindle_only(self) -> Self {
        self.with_target_filter("spindle")
    }

    /// Include file names in output.
    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    /// Include line numbers in output.
    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    /// Include thread ids in output; useful under the parallel scope
    /// mode.
    pub fn with_thread_ids(mut self) -> Self {
        self.with_thread_ids = true;
        self
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    /// Install the global subscriber.
    ///
    /// Requires `logging-json` or `logging-pretty`; without either this
    /// is a no-op so callers can leave the call in place.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn init(self) {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let filter = match self.target {
            Some(target) => EnvFilter::new(format!("{}={}", target, self.level)),
            None => EnvFilter::new(self.level.to_string()),
        };

        let base = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_thread_ids(self.with_thread_ids)
            .with_target(true);

        let registry = tracing_subscriber::registry().with(filter);
        match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => registry.with(base.json()).init(),
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => registry.with(base).init(),
            LogFormat::Pretty => registry.with(base.pretty()).init(),
            LogFormat::Compact => registry.with(base.compact()).init(),
        }
    }

    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn init(self) {
        // No subscriber features enabled; events still flow to whatever
        // subscriber the application installs.
    }
}

/// Start a [`LoggingBuilder`].
#[cfg(feature = "logging")]
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// Install the default subscriber: JSON when `logging-json` is enabled,
/// pretty otherwise.
#[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
pub fn init() {
    #[cfg(feature = "logging-json")]
    builder().json().init();
    #[cfg(all(feature = "logging-pretty", not(feature = "logging-json")))]
    builder().pretty().init();
}

#[cfg(all(feature = "logging", not(any(feature = "logging-json", feature = "logging-pretty"))))]
pub fn init() {}

/// Install a JSON subscriber at DEBUG.
#[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
pub fn init_json() {
    builder().json().debug().init();
}

/// Install a pretty subscriber at DEBUG.
#[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
pub fn init_pretty() {
    builder().pretty().debug().init();
}
