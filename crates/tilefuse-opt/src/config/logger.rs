use std::{
    fmt::Display,
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::PathBuf,
};

/// Configuration for the pass logger.
///
/// Several sinks can be active at the same time.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LoggerConfig {
    /// Path to the log file, if file logging is enabled.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Whether to append to the log file (true) or overwrite it (false). Defaults to true.
    #[serde(default = "append_default")]
    pub append: bool,

    /// Whether to log to standard output.
    #[serde(default)]
    pub stdout: bool,

    /// Whether to log to standard error.
    #[serde(default)]
    pub stderr: bool,

    /// Forward messages to the `log` crate at this level.
    #[serde(default)]
    pub log: Option<LogCrateLevel>,

    /// What the pass reports.
    #[serde(default)]
    pub level: TransformLogLevel,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            file: None,
            append: true,
            stdout: false,
            stderr: false,
            log: None,
            level: TransformLogLevel::default(),
        }
    }
}

fn append_default() -> bool {
    true
}

/// Log levels using the `log` crate.
#[derive(
    Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize, Hash, PartialEq, Eq,
)]
pub enum LogCrateLevel {
    #[default]
    #[serde(rename = "info")]
    Info,

    #[serde(rename = "debug")]
    Debug,

    #[serde(rename = "trace")]
    Trace,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    serde::Serialize,
    serde::Deserialize,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
)]
pub enum TransformLogLevel {
    #[default]
    #[serde(rename = "disabled")]
    Disabled,

    /// One line per rewritten matmul.
    #[serde(rename = "basic")]
    Basic,

    /// Also print the emitted loop nest.
    #[serde(rename = "full")]
    Full,
}

#[derive(Debug)]
enum LoggerKind {
    File(BufWriter<File>),
    Stdout,
    Stderr,
    Log(LogCrateLevel),
}

impl LoggerKind {
    fn log<S: Display>(&mut self, msg: &S) {
        match self {
            LoggerKind::File(writer) => {
                if let Err(err) = writeln!(writer, "{msg}") {
                    log::warn!("Failed to write to the tilefuse log file: {err}");
                }
            }
            LoggerKind::Stdout => println!("{msg}"),
            LoggerKind::Stderr => eprintln!("{msg}"),
            LoggerKind::Log(level) => match level {
                LogCrateLevel::Info => log::info!("{msg}"),
                LogCrateLevel::Debug => log::debug!("{msg}"),
                LogCrateLevel::Trace => log::trace!("{msg}"),
            },
        }
    }
}

/// Writes pass reports to every sink of a [`LoggerConfig`].
#[derive(Debug)]
pub struct Logger {
    loggers: Vec<LoggerKind>,
    level: TransformLogLevel,
}

impl Logger {
    pub fn new(config: &LoggerConfig) -> Self {
        let mut loggers = Vec::new();

        if let Some(path) = &config.file {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .append(config.append)
                .truncate(!config.append)
                .open(path);
            match file {
                Ok(file) => loggers.push(LoggerKind::File(BufWriter::new(file))),
                Err(err) => log::warn!("Unable to open log file {}: {err}", path.display()),
            }
        }
        if config.stdout {
            loggers.push(LoggerKind::Stdout);
        }
        if config.stderr {
            loggers.push(LoggerKind::Stderr);
        }
        if let Some(level) = config.log {
            loggers.push(LoggerKind::Log(level));
        }

        Self {
            loggers,
            level: config.level,
        }
    }

    /// Whether anything would be written at `level`.
    pub fn enabled(&self, level: TransformLogLevel) -> bool {
        level != TransformLogLevel::Disabled && self.level >= level && !self.loggers.is_empty()
    }

    /// Logs `msg` when the configured level includes `level`.
    pub fn log<S: Display>(&mut self, level: TransformLogLevel, msg: &S) {
        if !self.enabled(level) {
            return;
        }
        for logger in self.loggers.iter_mut() {
            logger.log(msg);
        }
    }

    pub fn flush(&mut self) {
        for logger in self.loggers.iter_mut() {
            if let LoggerKind::File(writer) = logger {
                if let Err(err) = writer.flush() {
                    log::warn!("Failed to flush the tilefuse log file: {err}");
                }
            }
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.flush();
    }
}
