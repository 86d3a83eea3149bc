/*! JSONL corpus records.

One record per line: `{"doc_id": "...", "text": "...", ...}`. Unknown
fields are tolerated. `.gz` sources are decompressed on the fly.
!*/
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusRecord {
    pub doc_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// Line-by-line reader over a corpus file.
pub struct CorpusReader {
    lines: std::io::Lines<BufReader<Box<dyn Read + Send>>>,
    path: PathBuf,
    line_no: usize,
}

impl CorpusReader {
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        let reader: Box<dyn Read + Send> = if path.extension().map_or(false, |e| e == "gz") {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            path: path.to_path_buf(),
            line_no: 0,
        })
    }
}

impl Iterator for CorpusReader {
    type Item = Result<CorpusRecord, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line_no += 1;
            match self.lines.next()? {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Some(serde_json::from_str(&line).map_err(|e| {
                        Error::BadInput(format!(
                            "{:?} line {}: {}",
                            self.path, self.line_no, e
                        ))
                    }));
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Append one record to a JSONL corpus (the ingest system of record).
pub fn append_record(path: &Path, record: &CorpusRecord) -> Result<(), Error> {
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    f.write_all(&line)?;
    f.sync_all()?;
    Ok(())
}
