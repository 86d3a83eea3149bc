/*! Corpus I/O.

Reading of JSONL corpora (optionally gzipped) and the atomic-replace file
writes used for every published JSON artifact.
!*/
mod atomic;
mod corpus;

pub use atomic::write_atomic;
pub use atomic::write_json_atomic;
pub use corpus::append_record;
pub use corpus::CorpusReader;
pub use corpus::CorpusRecord;
