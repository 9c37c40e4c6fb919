use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::calendar::{parse_date, parse_year};
use crate::model::{Day, Season};

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, io::Error),
    MissingValue { line: usize, key: String },
    UnknownKey { line: usize, key: String },
    InvalidValue { line: usize, key: String, value: String },
    Missing(&'static str),
    InvalidSeason(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "cannot read {}: {e}", path.display()),
            ConfigError::MissingValue { line, key } => {
                write!(f, "line {line}: key '{key}' has no value")
            }
            ConfigError::UnknownKey { line, key } => write!(f, "line {line}: unknown key '{key}'"),
            ConfigError::InvalidValue { line, key, value } => {
                write!(f, "line {line}: invalid value '{value}' for '{key}'")
            }
            ConfigError::Missing(key) => write!(f, "missing required key '{key}'"),
            ConfigError::InvalidSeason(msg) => write!(f, "invalid season: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Read and validate the season file.
pub fn load_season(path: &Path) -> Result<Season, ConfigError> {
    let text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    parse_season(&text)
}

/// Parse `key = value` lines. Separators are spaces and `=`; lines starting
/// with `#` and blank lines are skipped.
pub fn parse_season(text: &str) -> Result<Season, ConfigError> {
    let mut rows: Option<u32> = None;
    let mut cols: Option<u32> = None;
    let mut start: Option<(Day, i32)> = None;
    let mut end: Option<(Day, i32)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let mut tokens = raw.split([' ', '=', '\t', '\r']).filter(|t| !t.is_empty());
        let Some(key) = tokens.next() else { continue };
        if key.starts_with('#') {
            continue;
        }
        let value = tokens.next().ok_or_else(|| ConfigError::MissingValue {
            line,
            key: key.to_string(),
        })?;
        let invalid = || ConfigError::InvalidValue {
            line,
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "start" | "end" => {
                let day = parse_date(value, None).ok_or_else(invalid)?;
                let year = parse_year(value).ok_or_else(invalid)?;
                if key == "start" {
                    start = Some((day, year));
                } else {
                    end = Some((day, year));
                }
            }
            "rows" | "cols" => {
                let n: u32 = value.parse().map_err(|_| invalid())?;
                if n == 0 {
                    return Err(invalid());
                }
                if key == "rows" {
                    rows = Some(n);
                } else {
                    cols = Some(n);
                }
            }
            _ => {
                return Err(ConfigError::UnknownKey {
                    line,
                    key: key.to_string(),
                });
            }
        }
    }

    let rows = rows.ok_or(ConfigError::Missing("rows"))?;
    let cols = cols.ok_or(ConfigError::Missing("cols"))?;
    let (start, year) = start.ok_or(ConfigError::Missing("start"))?;
    let (end, end_year) = end.ok_or(ConfigError::Missing("end"))?;

    if end_year != year {
        return Err(ConfigError::InvalidSeason("start and end must fall in the same year"));
    }
    if start > end {
        return Err(ConfigError::InvalidSeason("start is after end"));
    }
    if rows.checked_mul(cols).is_none() {
        return Err(ConfigError::InvalidSeason("grid too large"));
    }

    Ok(Season { rows, cols, year, start, end })
}

/// Process-level settings, taken from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub config_path: PathBuf,
    pub data_path: PathBuf,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub log_file: Option<PathBuf>,
    pub autosave: Option<Duration>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|s| s.parse().ok())
        }

        Self {
            bind: std::env::var("LIDO_BIND").unwrap_or_else(|_| "0.0.0.0".into()),
            port: var("LIDO_PORT").unwrap_or(12345),
            config_path: std::env::var("LIDO_CONFIG")
                .unwrap_or_else(|_| "./config".into())
                .into(),
            data_path: std::env::var("LIDO_DATA")
                .unwrap_or_else(|_| "./data".into())
                .into(),
            max_connections: var("LIDO_MAX_CONNECTIONS").unwrap_or(10),
            metrics_port: var("LIDO_METRICS_PORT"),
            log_file: std::env::var("LIDO_LOG_FILE").ok().map(PathBuf::from),
            autosave: var::<u64>("LIDO_AUTOSAVE_SECS")
                .filter(|&s| s > 0)
                .map(Duration::from_secs),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
