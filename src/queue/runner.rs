/*! Task runner.

A bounded pool of plain worker threads drains the queue. Each worker
claims one task at a time (rename-lock, so workers never collide),
executes it against the engine, and marks it done or failed. Unhandled
errors become a failed task with the error text embedded; operators
requeue manually.
!*/
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{error, info};

use crate::engine::Engine;
use crate::queue::task::TaskType;

const IDLE_POLL: Duration = Duration::from_millis(500);

pub struct TaskRunner<'a> {
    engine: &'a Engine,
}

impl<'a> TaskRunner<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    fn handle_one(&self) -> bool {
        let claimed = match self.engine.queue().claim_any(&TaskType::POLL_ORDER) {
            Some(c) => c,
            None => return false,
        };
        let kind = claimed.task.task_type;
        match self.engine.run_task(&claimed.task) {
            Ok(()) => {
                info!("[worker] {} done", kind.dir_name());
                if let Err(e) = self.engine.queue().complete(claimed) {
                    error!("[worker] could not complete {}: {}", kind.dir_name(), e);
                }
            }
            Err(e) => {
                error!("[worker] {} failed: {}", kind.dir_name(), e);
                let msg = e.task_message();
                if let Err(e2) = self.engine.queue().fail(claimed, &msg) {
                    error!("[worker] could not park failed task: {}", e2);
                }
            }
        }
        true
    }

    /// Drain everything currently queued on the calling thread. Returns
    /// the number of tasks processed.
    pub fn run_pending(&self) -> usize {
        let mut n = 0;
        while self.handle_one() {
            n += 1;
        }
        n
    }

    /// Worker pool: `threads` workers poll until `stop` is raised.
    pub fn run_loop(&self, threads: usize, stop: &AtomicBool) {
        let threads = threads.max(1);
        info!("[worker] starting {} worker threads", threads);
        std::thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| {
                    while !stop.load(Ordering::Relaxed) {
                        if !self.handle_one() {
                            std::thread::sleep(IDLE_POLL);
                        }
                    }
                });
            }
        });
    }
}
