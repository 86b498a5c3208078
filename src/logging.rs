//! Log initialization shared by the demo driver, tests and benches.

use colored::Color::{Green, Red, Yellow};
use logforth::append::{Stderr, Stdout};
use logforth::diagnostic::ThreadLocalDiagnostic;
use logforth::filter::env_filter::EnvFilterBuilder;
use logforth::layout::TextLayout;
use std::sync::Once;

static INIT: Once = Once::new();

/// Where log records go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogOutput {
    #[default]
    Stderr,
    Stdout,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "info,topk_sampler=debug".
    /// `RUST_LOG` wins when set.
    pub level: String,
    pub output: LogOutput,
    /// Color the level names (info=green, warn=yellow, error=red).
    pub colored: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stderr,
            colored: true,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn no_color(mut self) -> Self {
        self.colored = false;
        self
    }
}

/// Dependencies that stay at warn unless the directive names them.
const QUIET_MODULES: [(&str, &str); 1] = [("cudarc", "warn")];

fn with_quiet_modules(mut filter: String) -> String {
    for (module, level) in QUIET_MODULES {
        if filter.contains(&format!("{module}=")) {
            continue;
        }
        if !filter.is_empty() {
            filter.push(',');
        }
        filter.push_str(&format!("{module}={level}"));
    }
    filter
}

fn colored_layout() -> TextLayout {
    TextLayout::default()
        .info_color(Green)
        .warn_color(Yellow)
        .error_color(Red)
}

/// Install the global logger. Only the first call has any effect.
pub fn init(config: LoggingConfig) {
    INIT.call_once(|| {
        let LoggingConfig {
            level,
            output,
            colored,
        } = config;

        let filter = EnvFilterBuilder::from_env_or("RUST_LOG", with_quiet_modules(level)).build();
        let layout = colored.then(colored_layout);

        let builder = logforth::starter_log::builder();
        let builder = match output {
            LogOutput::Stdout => {
                let mut appender = Stdout::default();
                if let Some(layout) = layout {
                    appender = appender.with_layout(layout);
                }
                builder.dispatch(|d| {
                    d.filter(filter)
                        .diagnostic(ThreadLocalDiagnostic::default())
                        .append(appender)
                })
            }
            LogOutput::Stderr => {
                let mut appender = Stderr::default();
                if let Some(layout) = layout {
                    appender = appender.with_layout(layout);
                }
                builder.dispatch(|d| {
                    d.filter(filter)
                        .diagnostic(ThreadLocalDiagnostic::default())
                        .append(appender)
                })
            }
        };
        builder.apply();
    });
}

/// Plain stderr logging at `level`, for tests and benches.
pub fn init_stderr(level: &str) {
    init(LoggingConfig::new(level).no_color());
}

pub fn init_default() {
    init(LoggingConfig::default());
}
