//! Executor configuration.
use std::{borrow::Cow, env::var, fmt, str::FromStr, time::Duration};

use crate::{postgres::Oid, registry};

/// Protocol dialect preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(rename_all = "snake_case"))]
pub enum QueryMode {
    /// Every statement travels as a simple query with inlined parameters.
    Simple,
    /// Extended dialect only for statements with parameters.
    ExtendedForPrepared,
    /// Extended dialect for every statement.
    #[default]
    Extended,
}

/// Automatic savepoint policy inside an open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(rename_all = "snake_case"))]
pub enum AutoSave {
    /// Never set a savepoint, a statement error fails the whole transaction.
    #[default]
    Never,
    /// Set a savepoint before every statement and roll back to it on error.
    Always,
    /// Set a savepoint before every statement, roll back only for errors that heal on retry.
    Conservative,
}

/// Executor configuration.
///
/// See field documentation for defaults.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(default))]
pub struct Config {
    /// Protocol dialect, default [`QueryMode::Extended`].
    pub query_mode: QueryMode,
    /// Savepoint policy, default [`AutoSave::Never`].
    pub autosave: AutoSave,
    /// Release the automatic savepoint after a successful statement, default `false`.
    pub cleanup_savepoints: bool,
    /// Maximum nested automatic savepoints, default `1000`.
    pub max_savepoints: u32,
    /// Executions before a statement is prepared under a server-side name, default `5`.
    ///
    /// Zero disables named statements.
    pub prepare_threshold: u32,
    /// Capacity of the statement cache, default `256`.
    pub statement_cache_size: usize,
    /// Drop server-side statement names on `DEALLOCATE ALL` or `DISCARD ALL`, default `true`.
    pub flush_cache_on_deallocate: bool,
    /// Fetch size used by forward cursors when the caller gives zero, default `0` (no limit).
    pub default_fetch_size: u32,
    /// Learn the fetch size of forward cursors from observed row size, default `false`.
    pub adaptive_fetch: bool,
    /// Lower bound of the adaptive fetch size, default `1`.
    pub adaptive_fetch_minimum: u32,
    /// Upper bound of the adaptive fetch size, default `10000`.
    pub adaptive_fetch_maximum: u32,
    /// Bytes one adaptive fetch round trip aims at, default 1 MiB.
    pub adaptive_fetch_target_bytes: u64,
    /// Estimated unread reply bytes before a batch forces a sync, default `64000`.
    pub max_buffered_recv_bytes: usize,
    /// Bound on every read waiting for the server, default none.
    pub network_timeout: Option<Duration>,
    /// Types the client sends in binary.
    pub binary_send_oids: Vec<Oid>,
    /// Types the server may return in binary.
    pub binary_receive_oids: Vec<Oid>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            query_mode: QueryMode::Extended,
            autosave: AutoSave::Never,
            cleanup_savepoints: false,
            max_savepoints: 1000,
            prepare_threshold: 5,
            statement_cache_size: 256,
            flush_cache_on_deallocate: true,
            default_fetch_size: 0,
            adaptive_fetch: false,
            adaptive_fetch_minimum: 1,
            adaptive_fetch_maximum: 10000,
            adaptive_fetch_target_bytes: 1024 * 1024,
            max_buffered_recv_bytes: 64000,
            network_timeout: None,
            binary_send_oids: registry::DEFAULT_SEND.to_vec(),
            binary_receive_oids: registry::DEFAULT_RECEIVE.to_vec(),
        }
    }
}

/// Recognized option keys, the environment variable is the key uppercased with `PGEXEC_` prefix.
const KEYS: &[&str] = &[
    "query_mode",
    "autosave",
    "cleanup_savepoints",
    "max_savepoints",
    "prepare_threshold",
    "statement_cache_size",
    "flush_cache_on_deallocate",
    "default_fetch_size",
    "adaptive_fetch",
    "adaptive_fetch_minimum",
    "adaptive_fetch_maximum",
    "adaptive_fetch_target_bytes",
    "max_buffered_recv_bytes",
    "network_timeout",
    "binary_send_oids",
    "binary_receive_oids",
];

impl Config {
    /// Retrieve configuration from environment variable.
    ///
    /// Options are first read from the query part of `DATABASE_URL`, e.g.
    /// `postgres://localhost/app?prepare_threshold=0&autosave=always`, then every
    /// `PGEXEC_<OPTION>` variable overrides its option, e.g. `PGEXEC_QUERY_MODE=simple`.
    pub fn from_env() -> Result<Config, ParseError> {
        let mut config = match var("DATABASE_URL") {
            Ok(url) => match url.split_once('?') {
                Some((_, query)) => Config::parse(query)?,
                None => Config::default(),
            },
            Err(_) => Config::default(),
        };

        for key in KEYS {
            if let Ok(value) = var(format!("PGEXEC_{}", key.to_ascii_uppercase())) {
                config.set(key, &value)?;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse config from `key=value&key=value` option string.
    ///
    /// A full url is also accepted, in which case only its query part is read. Unknown keys
    /// are ignored.
    pub fn parse(options: &str) -> Result<Config, ParseError> {
        let options = match options.split_once('?') {
            Some((_, query)) => query,
            None if options.contains("://") => "",
            None => options,
        };

        let mut config = Config::default();
        for pair in options.split('&').filter(|e| !e.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(ParseError::new(format!("option `{pair}` has no value")));
            };
            config.set(key.trim(), value.trim())?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set one option by its key, unknown key is ignored.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ParseError> {
        fn num<T: FromStr>(key: &str, value: &str) -> Result<T, ParseError> {
            value.parse().map_err(|_| ParseError::new(format!("invalid number for `{key}`: {value}")))
        }

        fn boolean(key: &str, value: &str) -> Result<bool, ParseError> {
            match value {
                "true" | "1" | "on" | "yes" => Ok(true),
                "false" | "0" | "off" | "no" => Ok(false),
                _ => Err(ParseError::new(format!("invalid boolean for `{key}`: {value}"))),
            }
        }

        fn oids(key: &str, value: &str) -> Result<Vec<Oid>, ParseError> {
            value
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(|e| num(key, e))
                .collect()
        }

        match key {
            "query_mode" => self.query_mode = value.parse()?,
            "autosave" => self.autosave = value.parse()?,
            "cleanup_savepoints" => self.cleanup_savepoints = boolean(key, value)?,
            "max_savepoints" => self.max_savepoints = num(key, value)?,
            "prepare_threshold" => self.prepare_threshold = num(key, value)?,
            "statement_cache_size" => self.statement_cache_size = num(key, value)?,
            "flush_cache_on_deallocate" => self.flush_cache_on_deallocate = boolean(key, value)?,
            "default_fetch_size" => self.default_fetch_size = num(key, value)?,
            "adaptive_fetch" => self.adaptive_fetch = boolean(key, value)?,
            "adaptive_fetch_minimum" => self.adaptive_fetch_minimum = num(key, value)?,
            "adaptive_fetch_maximum" => self.adaptive_fetch_maximum = num(key, value)?,
            "adaptive_fetch_target_bytes" => self.adaptive_fetch_target_bytes = num(key, value)?,
            "max_buffered_recv_bytes" => self.max_buffered_recv_bytes = num(key, value)?,
            "network_timeout" => {
                // seconds, zero disables
                let secs: u64 = num(key, value)?;
                self.network_timeout = (secs != 0).then(|| Duration::from_secs(secs));
            },
            "binary_send_oids" => self.binary_send_oids = oids(key, value)?,
            "binary_receive_oids" => self.binary_receive_oids = oids(key, value)?,
            _ => {
                crate::common::debug!("ignoring unknown option `{key}`");
            },
        }
        Ok(())
    }

    /// Check the relation between options.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.adaptive_fetch_minimum == 0 {
            return Err(ParseError::new("adaptive_fetch_minimum must be at least 1"));
        }
        if self.adaptive_fetch_minimum > self.adaptive_fetch_maximum {
            return Err(ParseError::new("adaptive_fetch_minimum is above adaptive_fetch_maximum"));
        }
        if self.statement_cache_size == 0 {
            return Err(ParseError::new("statement_cache_size must be at least 1"));
        }
        if self.max_savepoints == 0 {
            return Err(ParseError::new("max_savepoints must be at least 1"));
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl FromStr for QueryMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(Self::Simple),
            "extended_for_prepared" | "extendedForPrepared" => Ok(Self::ExtendedForPrepared),
            "extended" => Ok(Self::Extended),
            _ => Err(ParseError::new(format!("unknown query mode `{s}`"))),
        }
    }
}

impl FromStr for AutoSave {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(Self::Never),
            "always" => Ok(Self::Always),
            "conservative" => Ok(Self::Conservative),
            _ => Err(ParseError::new(format!("unknown autosave policy `{s}`"))),
        }
    }
}

/// Error when parsing config.
pub struct ParseError {
    pub(crate) reason: Cow<'static, str>,
}

impl ParseError {
    pub(crate) fn new(reason: impl Into<Cow<'static, str>>) -> ParseError {
        Self { reason: reason.into() }
    }
}

impl std::error::Error for ParseError { }

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            return f.write_str(&self.reason)
        }
        write!(f, "failed to parse config: {}", self.reason)
    }
}

impl fmt::Debug for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
