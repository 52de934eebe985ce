use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::value::Value;

/// Result of an asynchronous task: values for the awaiting script, or an
/// error message raised in it.
pub type TaskOutcome = Result<Vec<Value>, String>;

type Job = Box<dyn FnOnce() -> TaskOutcome + Send>;

struct TaskInner {
    description: String,
    job: Mutex<Option<Job>>,
    outcome: Mutex<Option<TaskOutcome>>,
}

/// Work the embedder performs while a call is paused on `await`.
///
/// The task travels to the embedder with the paused continuation. Whoever
/// runs it (possibly on another thread) stores the outcome, and the
/// `await` frame reads it when the call is resumed.
#[derive(Clone)]
pub struct AsyncTask(Arc<TaskInner>);

impl AsyncTask {
    pub fn new(
        description: impl Into<String>,
        job: impl FnOnce() -> TaskOutcome + Send + 'static,
    ) -> Self {
        Self::build(description.into(), Some(Box::new(job)), None)
    }

    /// A task without a job; the embedder completes it with
    /// [`complete`](Self::complete).
    pub fn pending(description: impl Into<String>) -> Self {
        Self::build(description.into(), None, None)
    }

    pub fn completed(description: impl Into<String>, outcome: TaskOutcome) -> Self {
        Self::build(description.into(), None, Some(outcome))
    }

    fn build(description: String, job: Option<Job>, outcome: Option<TaskOutcome>) -> Self {
        AsyncTask(Arc::new(TaskInner {
            description,
            job: Mutex::new(job),
            outcome: Mutex::new(outcome),
        }))
    }

    pub fn description(&self) -> &str {
        &self.0.description
    }

    /// Run the job, if it has not run yet, and store its outcome.
    pub fn execute(&self) {
        let job = self.0.job.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(job) = job {
            tracing::debug!(task = %self.0.description, "executing async task");
            let outcome = job();
            self.complete(outcome);
        }
    }

    pub fn complete(&self, outcome: TaskOutcome) {
        *self.outcome_slot() = Some(outcome);
    }

    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.outcome_slot().clone()
    }

    pub fn is_complete(&self) -> bool {
        self.outcome_slot().is_some()
    }

    fn outcome_slot(&self) -> MutexGuard<'_, Option<TaskOutcome>> {
        self.0.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartialEq for AsyncTask {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for AsyncTask {}

impl Hash for AsyncTask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for AsyncTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTask")
            .field("description", &self.0.description)
            .field("complete", &self.is_complete())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_runs_the_job_once() {
        let task = AsyncTask::new("answer", || Ok(vec![Value::Int(42)]));
        assert!(!task.is_complete());
        task.execute();
        task.execute();
        assert_eq!(task.outcome(), Some(Ok(vec![Value::Int(42)])));
    }

    #[test]
    fn pending_tasks_are_completed_by_hand() {
        let task = AsyncTask::pending("later");
        task.execute();
        assert!(task.outcome().is_none());
        task.complete(Err("boom".into()));
        assert_eq!(task.outcome(), Some(Err("boom".to_string())));
    }
}
