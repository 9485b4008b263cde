use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, LazyLock, Mutex, RwLock, Weak};

static GLOBAL_LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INSTANCES: LazyLock<Mutex<Vec<Weak<LoggerInner>>>> =
    LazyLock::new(|| Mutex::new(Vec::new()));
/// Capture handler handed to loggers created after `set_user_log_handler`.
static GLOBAL_USER_LOG_HANDLER: RwLock<Option<SharedLogHandler>> = RwLock::new(None);

type SharedLogHandler = Arc<dyn Fn(&Logger, LogLevel, &str) + Send + Sync + 'static>;

/// Named logger used by each component of the crate.
///
/// Every instance starts at the global level and forwards to the [`log`] facade
/// with its name as the target, so the host application decides where records
/// end up. A user handler can be installed on top to capture records.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    pub fn new(name: impl Into<String>) -> Self {
        let inner = Arc::new(LoggerInner::new(name.into()));
        track_instance(&inner);
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_u8(self.inner.log_level.load(Ordering::SeqCst))
    }

    pub fn set_log_level<L>(&self, level: L) -> Result<(), LogError>
    where
        L: IntoLogLevel,
    {
        let level = level.into_log_level()?;
        self.inner.log_level.store(level as u8, Ordering::SeqCst);
        Ok(())
    }

    pub fn set_log_handler<F>(&self, handler: F)
    where
        F: Fn(&Logger, LogLevel, &str) + Send + Sync + 'static,
    {
        *self
            .inner
            .log_handler
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(handler);
    }

    pub fn reset_log_handler(&self) {
        *self
            .inner
            .log_handler
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = default_log_handler_arc();
    }

    pub fn user_log_handler(&self) -> Option<SharedLogHandler> {
        self.inner
            .user_log_handler
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_user_log_handler(&self, handler: Option<SharedLogHandler>) {
        *self
            .inner
            .user_log_handler
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = handler;
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.dispatch(LogLevel::Debug, message);
    }

    pub fn log(&self, message: impl fmt::Display) {
        self.dispatch(LogLevel::Verbose, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.dispatch(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.dispatch(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.dispatch(LogLevel::Error, message);
    }

    fn dispatch(&self, level: LogLevel, message: impl fmt::Display) {
        let message = message.to_string();
        if let Some(handler) = self.user_log_handler() {
            handler(self, level, &message);
        }
        let handler = self
            .inner
            .log_handler
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        handler(self, level, &message);
    }

    fn from_inner(inner: Arc<LoggerInner>) -> Self {
        Self { inner }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.inner.name)
            .field("level", &self.log_level())
            .finish()
    }
}

struct LoggerInner {
    name: String,
    log_level: AtomicU8,
    log_handler: RwLock<SharedLogHandler>,
    user_log_handler: RwLock<Option<SharedLogHandler>>,
}

impl LoggerInner {
    fn new(name: String) -> Self {
        let level = GLOBAL_LOG_LEVEL.load(Ordering::SeqCst);
        Self {
            name,
            log_level: AtomicU8::new(level),
            log_handler: RwLock::new(default_log_handler_arc()),
            user_log_handler: RwLock::new(None),
        }
    }
}

fn track_instance(inner: &Arc<LoggerInner>) {
    let mut instances = INSTANCES
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let handler = GLOBAL_USER_LOG_HANDLER
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    *inner
        .user_log_handler
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = handler;
    instances.push(Arc::downgrade(inner));
}

fn default_log_handler_arc() -> SharedLogHandler {
    Arc::new(default_log_handler)
}

fn default_log_handler(logger: &Logger, level: LogLevel, message: &str) {
    if level < logger.log_level() {
        return;
    }
    if let Some(facade_level) = level.facade_level() {
        log::log!(target: logger.name(), facade_level, "{message}");
    }
}

fn with_instances<F>(mut f: F)
where
    F: FnMut(Logger),
{
    let mut instances = INSTANCES
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut i = 0;
    while i < instances.len() {
        match instances[i].upgrade() {
            Some(inner) => {
                f(Logger::from_inner(inner));
                i += 1;
            }
            None => {
                instances.swap_remove(i);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Verbose = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Silent = 5,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Silent => "silent",
        }
    }

    fn facade_level(self) -> Option<log::Level> {
        match self {
            LogLevel::Debug | LogLevel::Verbose => Some(log::Level::Debug),
            LogLevel::Info => Some(log::Level::Info),
            LogLevel::Warn => Some(log::Level::Warn),
            LogLevel::Error => Some(log::Level::Error),
            LogLevel::Silent => None,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Verbose,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Silent,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

impl FromStr for LogLevel {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "verbose" => Ok(LogLevel::Verbose),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "silent" => Ok(LogLevel::Silent),
            other => Err(LogError::InvalidLogLevel(other.to_string())),
        }
    }
}

pub trait IntoLogLevel {
    fn into_log_level(self) -> Result<LogLevel, LogError>;
}

impl IntoLogLevel for LogLevel {
    fn into_log_level(self) -> Result<LogLevel, LogError> {
        Ok(self)
    }
}

impl IntoLogLevel for &str {
    fn into_log_level(self) -> Result<LogLevel, LogError> {
        LogLevel::from_str(self)
    }
}

impl IntoLogLevel for String {
    fn into_log_level(self) -> Result<LogLevel, LogError> {
        LogLevel::from_str(&self)
    }
}

/// Record handed to a user log handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub logger_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    InvalidLogLevel(String),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::InvalidLogLevel(level) => {
                write!(f, "Invalid value \"{level}\" assigned to `log_level`")
            }
        }
    }
}

impl std::error::Error for LogError {}

/// Sets the level of every live logger and of loggers created afterwards.
pub fn set_log_level<L>(level: L) -> Result<(), LogError>
where
    L: IntoLogLevel,
{
    let level = level.into_log_level()?;
    GLOBAL_LOG_LEVEL.store(level as u8, Ordering::SeqCst);
    with_instances(|logger| {
        let _ = logger.set_log_level(level);
    });
    Ok(())
}

/// Installs (or with `None`, removes) a capture handler on every logger,
/// including the ones created afterwards.
///
/// `min_level` overrides each logger's own threshold for the captured records.
pub fn set_user_log_handler<F>(callback: Option<F>, min_level: Option<LogLevel>)
where
    F: Fn(LogRecord) + Send + Sync + 'static,
{
    let handler = callback.map(|callback| {
        let handler: SharedLogHandler =
            Arc::new(move |instance: &Logger, level: LogLevel, message: &str| {
                let threshold = min_level.unwrap_or_else(|| instance.log_level());
                if level < threshold {
                    return;
                }
                callback(LogRecord {
                    level,
                    message: message.to_owned(),
                    logger_name: instance.name().to_owned(),
                });
            });
        handler
    });
    *GLOBAL_USER_LOG_HANDLER
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = handler.clone();
    with_instances(|logger| logger.set_user_log_handler(handler.clone()));
}

#[cfg(test)]
static TEST_GUARD: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));
