use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::model::*;

#[derive(Debug)]
pub enum PersistError {
    Io(io::Error),
    /// The file has fewer lines than the grid has umbrellas.
    MissingLine(usize),
    Malformed { line: usize, reason: &'static str },
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistError::Io(e) => write!(f, "database I/O error: {e}"),
            PersistError::MissingLine(line) => write!(f, "line {line}: missing"),
            PersistError::Malformed { line, reason } => write!(f, "line {line}: {reason}"),
        }
    }
}

impl std::error::Error for PersistError {}

impl From<io::Error> for PersistError {
    fn from(e: io::Error) -> Self {
        PersistError::Io(e)
    }
}

/// Encode one resource as `count lockUser lockDay [user start end]*count`.
pub fn encode_record(rs: &ResourceState) -> String {
    let (holder, day) = rs.claim.map_or((0, 0), |c| (c.holder, c.day));
    let mut line = format!("{} {holder} {day}", rs.reservations.len());
    for r in &rs.reservations {
        line.push_str(&format!(" {} {} {}", r.owner, r.span.start, r.span.end));
    }
    line
}

/// Decode one record line (1-based `line` for diagnostics).
pub fn decode_record(text: &str, line: usize, season: &Season) -> Result<ResourceState, PersistError> {
    let malformed = |reason| PersistError::Malformed { line, reason };
    let mut tokens = text.split_whitespace();
    let mut next = |reason| tokens.next().ok_or_else(|| malformed(reason));

    let count: usize = next("missing count")?
        .parse()
        .map_err(|_| malformed("invalid count"))?;
    let holder: UserId = next("missing lock user")?
        .parse()
        .map_err(|_| malformed("invalid lock user"))?;
    let lock_day: Day = next("missing lock day")?
        .parse()
        .map_err(|_| malformed("invalid lock day"))?;

    let mut reservations = Vec::with_capacity(count);
    for _ in 0..count {
        let owner: UserId = next("too few fields")?
            .parse()
            .map_err(|_| malformed("invalid user"))?;
        let start: Day = next("too few fields")?
            .parse()
            .map_err(|_| malformed("invalid start"))?;
        let end: Day = next("too few fields")?
            .parse()
            .map_err(|_| malformed("invalid end"))?;
        let span = Span::new(start, end);
        if !span.is_ordered() {
            return Err(malformed("reservation starts after it ends"));
        }
        if !season.span().contains_span(&span) {
            return Err(malformed("reservation outside season"));
        }
        reservations.push(Reservation { owner, span });
    }
    if next("").is_ok() {
        return Err(malformed("too many fields"));
    }

    let claim = (holder != 0).then_some(Claim { holder, day: lock_day });
    let rs = ResourceState { reservations, claim };
    if !rs.is_well_formed() {
        return Err(malformed("reservations unsorted or overlapping"));
    }
    Ok(rs)
}

/// Flat-file store: one line per umbrella, in index order.
///
/// Writes go to `<path>.tmp`, are fsynced, then renamed over `path`.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }

    /// Load every resource of `season`. A missing file yields an empty table.
    pub fn load(&self, season: &Season) -> Result<Vec<ResourceState>, PersistError> {
        let count = season.resource_count();
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!("{} not found, starting with an empty database", self.path.display());
                return Ok(vec![ResourceState::new(); count]);
            }
            Err(e) => return Err(e.into()),
        };

        let mut lines = BufReader::new(file).lines();
        let mut states = Vec::with_capacity(count);
        for idx in 0..count {
            let line = idx + 1;
            let text = lines.next().ok_or(PersistError::MissingLine(line))??;
            states.push(decode_record(&text, line, season)?);
        }
        tracing::info!("database loaded from {} ({count} umbrellas)", self.path.display());
        Ok(states)
    }

    /// Write every resource and atomically replace the data file.
    pub fn save<'a>(&self, resources: impl IntoIterator<Item = &'a ResourceState>) -> io::Result<()> {
        let tmp_path = self.temp_path();
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for rs in resources {
            writeln!(writer, "{}", encode_record(rs))?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp_path, &self.path)
    }
}
