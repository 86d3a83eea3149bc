/*! Durable file-based work queue.

FIFO per task type under `queue/<task_type>/`. Claiming renames
`job_*.json` to `job_*.lock`; the rename is atomic, so concurrent
workers pull distinct tasks without coordination — a loser of the race
just moves on to the next file (skip-locked). Failure renames the lock
to `job_*.failed` with the error text embedded; operators requeue
manually.
!*/
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use glob::glob;
use log::{debug, warn};

use crate::error::Error;
use crate::queue::task::{ClaimedTask, Task, TaskType};

pub struct WorkQueue {
    root: PathBuf,
    seq: AtomicU64,
}

impl WorkQueue {
    pub fn open(root: &Path) -> Result<Self, Error> {
        for t in TaskType::POLL_ORDER {
            std::fs::create_dir_all(root.join(t.dir_name()))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            seq: AtomicU64::new(0),
        })
    }

    fn kind_dir(&self, t: TaskType) -> PathBuf {
        self.root.join(t.dir_name())
    }

    fn sorted_jobs(&self, t: TaskType, suffix: &str) -> Vec<PathBuf> {
        let pattern = format!("{}/job_*.{}", self.kind_dir(t).display(), suffix);
        let mut out: Vec<PathBuf> = match glob(&pattern) {
            Ok(paths) => paths.filter_map(Result::ok).collect(),
            Err(e) => {
                warn!("bad queue glob {}: {}", pattern, e);
                Vec::new()
            }
        };
        out.sort();
        out
    }

    /// Enqueue a task; visible to claimers once the rename lands.
    pub fn enqueue(&self, task: Task) -> Result<PathBuf, Error> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "job_{:020}_{:06}_{}",
            task.created_at,
            seq,
            std::process::id()
        );
        let dir = self.kind_dir(task.task_type);
        let tmp = dir.join(format!("{}.tmp", name));
        let dst = dir.join(format!("{}.json", name));
        std::fs::write(&tmp, serde_json::to_vec(&task)?)?;
        std::fs::rename(&tmp, &dst)?;
        Ok(dst)
    }

    /// Claim the oldest pending task of one type, if any.
    pub fn claim(&self, t: TaskType) -> Option<ClaimedTask> {
        for path in self.sorted_jobs(t, "json") {
            let lock_path = path.with_extension("lock");
            // the rename is the lock: only one claimer wins
            if std::fs::rename(&path, &lock_path).is_err() {
                continue;
            }
            match std::fs::read(&lock_path)
                .map_err(Error::from)
                .and_then(|bytes| serde_json::from_slice::<Task>(&bytes).map_err(Error::from))
            {
                Ok(task) => {
                    debug!("claimed {:?}", lock_path);
                    return Some(ClaimedTask { task, lock_path });
                }
                Err(e) => {
                    warn!("unreadable task {:?}: {}; marking failed", lock_path, e);
                    let _ = std::fs::rename(&lock_path, lock_path.with_extension("failed"));
                }
            }
        }
        None
    }

    /// Claim the next task following the given polling order.
    pub fn claim_any(&self, order: &[TaskType]) -> Option<ClaimedTask> {
        order.iter().find_map(|t| self.claim(*t))
    }

    pub fn complete(&self, claimed: ClaimedTask) -> Result<(), Error> {
        std::fs::remove_file(&claimed.lock_path)?;
        Ok(())
    }

    /// Park the task as `.failed` with the error text embedded
    /// (truncated to the catalog bound).
    pub fn fail(&self, claimed: ClaimedTask, error: &str) -> Result<(), Error> {
        let mut task = claimed.task;
        task.attempts += 1;
        let mut msg = error.to_string();
        msg.truncate(2000);
        task.last_error = Some(msg);
        let failed_path = claimed.lock_path.with_extension("failed");
        std::fs::write(&failed_path, serde_json::to_vec(&task)?)?;
        std::fs::remove_file(&claimed.lock_path)?;
        Ok(())
    }

    /// Manual requeue of every failed task of one type.
    pub fn requeue_failed(&self, t: TaskType) -> Result<usize, Error> {
        let mut n = 0;
        for path in self.sorted_jobs(t, "failed") {
            std::fs::rename(&path, path.with_extension("json"))?;
            n += 1;
        }
        Ok(n)
    }

    pub fn pending_count(&self, t: TaskType) -> usize {
        self.sorted_jobs(t, "json").len()
    }

    pub fn failed_count(&self, t: TaskType) -> usize {
        self.sorted_jobs(t, "failed").len()
    }
}
