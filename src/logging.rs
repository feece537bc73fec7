use std::io::stderr;
use std::sync::Mutex;

use serde::Deserialize;
use slog::o;
use slog::Drain;
use slog::FnValue;
use slog::IgnoreResult;
use slog::Logger;
use slog::Never;
use slog::OwnedKVList;
use slog::Record;
use slog::SendSyncRefUnwindSafeDrain;
use slog::SendSyncUnwindSafeDrain;
use slog_async::Async;
use slog_json::Json;
use slog_term::FullFormat;
use slog_term::TermDecorator;

/// Alternative implementation of slog's [`LevelFilter`] with `Ok == ()`.
///
/// The default [`LevelFilter`] implementation wraps `D::Ok` into an [`Option`].
/// This makes it impossible to wrap a filtering drain into a [`Logger`].
///
/// [`LevelFilter`]: slog/struct.LevelFilter.html
/// [`Logger`]: slog/struct.Logger.html
/// [`Option`]: core/option/enum.Option.html
#[derive(Debug, Clone)]
struct LevelFilter<D: Drain>(pub D, pub ::slog::Level);
impl<D: Drain> Drain for LevelFilter<D> {
    type Ok = ();
    type Err = D::Err;
    fn log(&self, record: &Record, logger_values: &OwnedKVList) -> Result<Self::Ok, Self::Err> {
        if record.level().is_at_least(self.1) {
            self.0.log(record, logger_values)?;
        }
        Ok(())
    }
}

/// Enumerate valid log verbosity levels.
#[derive(clap::ValueEnum, Clone, Default, Eq, PartialEq, Hash, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

impl From<LogLevel> for ::slog::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Critical => ::slog::Level::Critical,
            LogLevel::Error => ::slog::Level::Error,
            LogLevel::Warning => ::slog::Level::Warning,
            LogLevel::Info => ::slog::Level::Info,
            LogLevel::Debug => ::slog::Level::Debug,
        }
    }
}

/// List of supported logging drains.
#[derive(Clone, Default, Eq, PartialEq, Hash, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingDrain {
    /// Log JSON objects to standard error.
    Json,

    /// Log human readable lines to standard error.
    #[default]
    Terminal,
}

/// Logging configuration options.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Flush logs asynchronously.
    #[serde(default = "Config::default_async", rename = "async")]
    pub flush_async: bool,

    /// The drain to send logs to.
    #[serde(default)]
    pub drain: LoggingDrain,

    /// The minimum logging level.
    #[serde(default)]
    pub level: LogLevel,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            flush_async: Config::default_async(),
            drain: LoggingDrain::default(),
            level: LogLevel::default(),
        }
    }
}

impl Config {
    fn default_async() -> bool {
        false
    }
}

/// Converts a [`Drain`] into a [`Logger`] setting global tags.
///
/// [`Drain`]: slog/trait.Drain.html
/// [`Logger`]: slog/struct.Logger.html
fn into_logger<D>(drain: D) -> Logger
where
    D: SendSyncUnwindSafeDrain<Ok = (), Err = Never>,
    D: 'static + SendSyncRefUnwindSafeDrain<Err = Never, Ok = ()>,
{
    Logger::root(
        drain,
        o!(
            "version" => env!("CARGO_PKG_VERSION"),
            "module" => FnValue(|rinfo: &Record| rinfo.module()),
        ),
    )
}

/// Optionally wrap the drain into an [`Async`] drain.
///
/// [`Async`]: slog_async/struct.Async.html
fn config_async<D>(config: &Config, drain: D) -> Logger
where
    D: SendSyncUnwindSafeDrain<Ok = (), Err = Never>,
    D: 'static + SendSyncRefUnwindSafeDrain<Err = Never, Ok = ()>,
{
    if config.flush_async {
        into_logger(Async::new(drain).build().ignore_res())
    } else {
        into_logger(drain)
    }
}

/// Creates a [`Logger`] based on the given configuration.
///
/// [`Logger`]: slog/struct.Logger.html
pub fn configure(config: &Config) -> Logger {
    let level = config.level.clone().into();
    match config.drain {
        LoggingDrain::Json => {
            let drain = Mutex::new(Json::default(stderr())).map(IgnoreResult::new);
            config_async(config, LevelFilter(drain, level))
        }
        LoggingDrain::Terminal => {
            let decorator = TermDecorator::new().stderr().build();
            let drain = FullFormat::new(decorator).build();
            let drain = Mutex::new(drain).map(IgnoreResult::new);
            config_async(config, LevelFilter(drain, level))
        }
    }
}
