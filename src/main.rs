use std::fs::File;
use std::io::Read;
use std::sync::atomic::AtomicBool;

use log::LevelFilter;
use structopt::StructOpt;

use plagio::cli;
use plagio::engine::Engine;
use plagio::error::Error;
use plagio::io::CorpusReader;
use plagio::queue::TaskRunner;
use plagio::search::Deadline;
use plagio::segment::SegmentBuilder;

#[macro_use]
extern crate log;

fn main() -> Result<(), Error> {
    // set default log level to info
    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_env("RUST_LOG");
    builder.init();

    let opt = cli::Plagio::from_args();
    debug!("cli args\n{:#?}", opt);

    match opt {
        cli::Plagio::IndexBuilder(b) => {
            let records: Vec<_> = CorpusReader::from_path(&b.corpus)?
                .collect::<Result<Vec<_>, Error>>()?;
            info!("building segment from {} corpus records", records.len());
            let cfg = plagio::config::EngineConfig::from_env();
            let builder = SegmentBuilder::new(&cfg.index)?;
            let outcome = builder.build(&records, &b.out_dir)?;
            info!(
                "segment ready: docs={}, post9={}, post13={}, skipped={}",
                outcome.stats.n_docs,
                outcome.stats.k9,
                outcome.stats.k13,
                outcome.skipped.len()
            );
        }

        cli::Plagio::Search(s) => {
            let text = match (s.query, s.file) {
                (Some(q), _) => q,
                (None, Some(path)) => {
                    let mut buf = String::new();
                    File::open(path)?.read_to_string(&mut buf)?;
                    buf
                }
                (None, None) => {
                    return Err(Error::BadInput(
                        "either --query or --file is required".to_string(),
                    ))
                }
            };
            let engine = Engine::open(&s.root)?;
            let deadline = s
                .timeout_ms
                .map(Deadline::in_millis)
                .unwrap_or_else(Deadline::none);
            let response = engine.search(s.shard, &text, s.top, &deadline)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        cli::Plagio::Worker(w) => {
            let engine = Engine::open(&w.root)?;
            let runner = TaskRunner::new(&engine);
            if w.once {
                let n = runner.run_pending();
                info!("processed {} tasks", n);
            } else {
                let threads = w.threads.unwrap_or_else(|| engine.config().worker_threads);
                let stop = AtomicBool::new(false);
                runner.run_loop(threads, &stop);
            }
        }

        cli::Plagio::Compact(c) => {
            let engine = Engine::open(&c.root)?;
            let promoted = if c.monolith {
                engine.rebuild_monolith(c.shard)?
            } else {
                match c.level {
                    Some(level) => engine.compact_level(c.shard, level)?,
                    None => engine.compact_eligible(c.shard)?,
                }
            };
            info!("promoted {} docs", promoted);
        }

        cli::Plagio::Status(s) => {
            let engine = Engine::open(&s.root)?;
            println!("{}", serde_json::to_string_pretty(&engine.status())?);
        }
    };
    Ok(())
}
