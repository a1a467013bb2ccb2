// module history
//
// append only record of blob digests shipped in prior archives, used to
// compute the blob delta of the next archive

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::fs;

use crate::error::handler::*;

pub const HISTORY_DIR: &str = "history";
const HISTORY_NAME_PREFIX: &str = ".history-";

// the first ever run has no history - callers need to tell that apart
// from an io failure
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryError {
    Empty(String),
    Retrieve(String),
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HistoryError::Empty(msg) => write!(f, "{}", msg),
            HistoryError::Retrieve(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error for HistoryError {}

#[derive(Debug, Clone)]
pub struct History {
    history_dir: String,
    before: Option<DateTime<Utc>>,
}

impl History {
    pub fn new(working_dir: &str, before: Option<DateTime<Utc>>) -> Result<History, MirrorError> {
        let history_dir = format!("{}/{}", working_dir, HISTORY_DIR);
        fs::create_dir_all(&history_dir)
            .map_err(|e| MirrorError::new(&format!("creating {} {}", history_dir, e)))?;
        Ok(History {
            history_dir,
            before,
        })
    }

    // newest history file older than the cutoff (newest overall when unset)
    fn history_file(&self) -> Result<String, HistoryError> {
        let entries = fs::read_dir(&self.history_dir)
            .map_err(|e| HistoryError::Retrieve(format!("reading {} {}", self.history_dir, e)))?;
        let mut latest: Option<(DateTime<Utc>, String)> = None;
        for entry in entries {
            let entry =
                entry.map_err(|e| HistoryError::Retrieve(format!("reading history entry {}", e)))?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stamp) = name.strip_prefix(HISTORY_NAME_PREFIX) else {
                continue;
            };
            let Ok(file_time) = DateTime::parse_from_rfc3339(stamp) else {
                continue;
            };
            let file_time = file_time.with_timezone(&Utc);
            if let Some(before) = self.before {
                if file_time >= before {
                    continue;
                }
            }
            match &latest {
                Some((latest_time, _)) if *latest_time >= file_time => {}
                _ => latest = Some((file_time, entry.path().display().to_string())),
            }
        }
        match latest {
            Some((_, path)) => Ok(path),
            None => Err(HistoryError::Empty(format!(
                "no history metadata found under {}",
                self.history_dir
            ))),
        }
    }

    pub fn read(&self) -> Result<HashSet<String>, HistoryError> {
        let file = self.history_file()?;
        let contents = fs::read_to_string(&file)
            .map_err(|e| HistoryError::Retrieve(format!("reading {} {}", file, e)))?;
        let mut blobs = HashSet::new();
        for line in contents.lines() {
            if !line.is_empty() {
                blobs.insert(line.to_string());
            }
        }
        Ok(blobs)
    }

    // writes the union of the current history and the new blobs to a fresh
    // timestamped file. the write goes to a temp name first and becomes
    // visible through a rename
    pub fn append(&self, blobs: &HashSet<String>) -> Result<HashSet<String>, HistoryError> {
        let mut merged = match self.read() {
            Ok(existing) => existing,
            Err(HistoryError::Empty(_)) => HashSet::new(),
            Err(e) => return Err(e),
        };
        for blob in blobs.iter() {
            merged.insert(blob.clone());
        }

        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let file = format!("{}/{}{}", self.history_dir, HISTORY_NAME_PREFIX, stamp);
        let temp = format!("{}.tmp", file);
        let mut sorted: Vec<&String> = merged.iter().collect();
        sorted.sort();
        let mut contents = String::new();
        for blob in sorted.iter() {
            contents.push_str(blob);
            contents.push('\n');
        }
        fs::write(&temp, contents)
            .map_err(|e| HistoryError::Retrieve(format!("writing {} {}", temp, e)))?;
        fs::rename(&temp, &file)
            .map_err(|e| HistoryError::Retrieve(format!("renaming {} {}", temp, e)))?;
        Ok(merged)
    }
}
