//! Background task supervisor.
//!
//! Risk analysis runs after the primary response, never on it. The
//! supervisor keeps a live handle to every scheduled unit of work until it
//! completes, so nothing is torn down mid-flight; the wrapper removes its
//! own handle and logs terminal failures with the session and flow IDs
//! instead of propagating them.
//!
//! Outside a tokio runtime (synchronous callers, tests) the work runs
//! inline on a throwaway current-thread runtime: the observable behavior is
//! identical, only the non-blocking property is lost.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

type TaskMap = Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>;

pub struct TaskSupervisor {
    tasks: TaskMap,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule `work` to run independently of the caller. Returns the task
    /// ID once the work has been handed off (or, in the inline fallback,
    /// completed).
    pub fn schedule<F>(&self, session_id: &str, flow_id: Uuid, work: F) -> Uuid
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let task_id = Uuid::new_v4();
        let session_id = session_id.to_string();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let tasks = Arc::clone(&self.tasks);
                // Hold the map lock across the spawn so the wrapper's removal
                // cannot run before this insertion.
                let mut map = lock_tasks(&tasks);
                let tasks_for_wrapper = Arc::clone(&self.tasks);
                let join = handle.spawn(async move {
                    if let Err(e) = work.await {
                        error!(
                            session_id = %session_id,
                            flow_id = %flow_id,
                            error = %e,
                            "background analysis failed"
                        );
                    }
                    lock_tasks(&tasks_for_wrapper).remove(&task_id);
                });
                map.insert(task_id, join);
                debug!(task_id = %task_id, flow_id = %flow_id, "scheduled background analysis");
            }
            Err(_) => {
                warn!(
                    session_id = %session_id,
                    flow_id = %flow_id,
                    "no async runtime available, running analysis inline"
                );
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => {
                        if let Err(e) = rt.block_on(work) {
                            error!(
                                session_id = %session_id,
                                flow_id = %flow_id,
                                error = %e,
                                "inline analysis failed"
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "could not build inline runtime"),
                }
            }
        }

        task_id
    }

    /// Number of retained, not-yet-finished units of work.
    pub fn in_flight(&self) -> usize {
        lock_tasks(&self.tasks).len()
    }

    /// Await every retained unit of work. Called at shutdown so in-flight
    /// analysis is accounted for rather than torn down.
    pub async fn drain(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut map = lock_tasks(&self.tasks);
                map.drain().map(|(_, h)| h).collect()
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    // Cancellation during shutdown is expected; panics are not
                    if e.is_panic() {
                        error!(error = %e, "background task panicked");
                    }
                }
            }
        }
    }
}

fn lock_tasks(tasks: &TaskMap) -> std::sync::MutexGuard<'_, HashMap<Uuid, JoinHandle<()>>> {
    tasks.lock().unwrap_or_else(|e| e.into_inner())
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
