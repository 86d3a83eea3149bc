/*! Engine error kinds.

Builder and compactor failures are converted into a failed task state by
the runner; [Error::BadInput] is reported to the caller and never retried;
[Error::CorruptSegment] quarantines the offending segment.
!*/
use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    /// Query or document fails preconditions (too short, empty after
    /// normalization).
    BadInput(String),
    /// Magic/version mismatch, checksum mismatch, unsorted postings.
    CorruptSegment(String),
    /// Compaction cannot read a doc's original text.
    MissingSource(String),
    /// Incremental build attempted with a different MinHash/LSH shape
    /// than the existing index.
    ConfigMismatch(String),
    /// I/O-ish failures worth a retry (lock contention, rename races).
    Transient(String),
    /// Deadline exceeded; partial results were returned.
    Cancelled,
    Custom(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::Json(e)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Error {
        Error::Custom(s)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io: {}", e),
            Error::Json(e) => write!(f, "json: {}", e),
            Error::BadInput(s) => write!(f, "bad input: {}", s),
            Error::CorruptSegment(s) => write!(f, "corrupt segment: {}", s),
            Error::MissingSource(s) => write!(f, "missing source: {}", s),
            Error::ConfigMismatch(s) => write!(f, "config mismatch: {}", s),
            Error::Transient(s) => write!(f, "transient: {}", s),
            Error::Cancelled => write!(f, "cancelled"),
            Error::Custom(s) => write!(f, "{}", s),
        }
    }
}

impl Error {
    /// Task-catalog message, bounded so a stack of causes can't blow up
    /// the queue files.
    pub fn task_message(&self) -> String {
        let mut msg = self.to_string();
        if msg.len() > 2000 {
            msg.truncate(2000);
        }
        msg
    }
}
