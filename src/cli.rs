//! Command line arguments and parameters management/parsing.
use std::path::PathBuf;

use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "plagio",
    about = "Shingle-based similarity indexing and search engine"
)]
/// Holds every command that is callable by the `plagio` command.
pub enum Plagio {
    #[structopt(about = "Build one segment bundle from a JSONL corpus")]
    IndexBuilder(IndexBuilder),
    #[structopt(about = "Search all ready segments of a shard")]
    Search(Search),
    #[structopt(about = "Run ingest/build/compact workers")]
    Worker(Worker),
    #[structopt(about = "Run one compaction round")]
    Compact(Compact),
    #[structopt(about = "Catalog and queue summary")]
    Status(Status),
}

#[derive(Debug, StructOpt)]
/// Standalone segment build: corpus in, segment files out.
/// Exit code 0 means the three segment files were written and fsynced;
/// any failure removes partial files and exits non-zero.
pub struct IndexBuilder {
    #[structopt(parse(from_os_str), help = "corpus.jsonl (or .jsonl.gz)")]
    pub corpus: PathBuf,
    #[structopt(parse(from_os_str), help = "output segment directory")]
    pub out_dir: PathBuf,
}

#[derive(Debug, StructOpt)]
/// Query command and parameters.
pub struct Search {
    #[structopt(parse(from_os_str), help = "engine root directory")]
    pub root: PathBuf,
    #[structopt(long, help = "query text")]
    pub query: Option<String>,
    #[structopt(long, parse(from_os_str), help = "file with the query text")]
    pub file: Option<PathBuf>,
    #[structopt(short = "s", long, default_value = "0", help = "shard to search")]
    pub shard: u16,
    #[structopt(short = "t", long, default_value = "5", help = "number of hits to return")]
    pub top: usize,
    #[structopt(long, help = "deadline in milliseconds")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, StructOpt)]
/// Worker command and parameters.
pub struct Worker {
    #[structopt(parse(from_os_str), help = "engine root directory")]
    pub root: PathBuf,
    #[structopt(short = "j", long, help = "worker threads. Default is the CPU count.")]
    pub threads: Option<usize>,
    #[structopt(long, help = "drain the queue once and exit")]
    pub once: bool,
}

#[derive(Debug, StructOpt)]
/// Compaction command and parameters.
pub struct Compact {
    #[structopt(parse(from_os_str), help = "engine root directory")]
    pub root: PathBuf,
    #[structopt(short = "s", long, default_value = "0", help = "shard to compact")]
    pub shard: u16,
    #[structopt(short = "l", long, help = "source level. Default: every eligible level.")]
    pub level: Option<u8>,
    #[structopt(long, help = "rebuild the L5 monolith instead")]
    pub monolith: bool,
}

#[derive(Debug, StructOpt)]
/// Status command.
pub struct Status {
    #[structopt(parse(from_os_str), help = "engine root directory")]
    pub root: PathBuf,
}
