// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task executor.
//!
//! A fixed pool of workers pulls tasks from an unbounded FIFO queue. A task
//! is any `Send` future resolving to `Result<Value>`; the optional callback
//! runs on the same worker once the task finishes. Status is kept in a
//! process-local table keyed by task id and is lost on restart.
//!
//! The synchronous path waits on a one-shot signal with no timeout: a task
//! that never finishes blocks its caller indefinitely.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Callback invoked on the worker with the final status.
pub type TaskCallback = Box<dyn FnOnce(&TaskStatus) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Running,
    Done,
}

/// Status of a submitted task.
///
/// `error` holds the message of a task that returned an error, `exception`
/// the message of a task that panicked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

impl TaskStatus {
    fn running() -> Self {
        Self {
            status: TaskState::Running,
            result: None,
            error: None,
            exception: None,
        }
    }

    fn done() -> Self {
        Self {
            status: TaskState::Done,
            ..Self::running()
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskState::Done
    }
}

struct Job {
    task_id: String,
    future: BoxFuture<'static, Result<Value>>,
    callback: Option<TaskCallback>,
    completion: Option<oneshot::Sender<TaskStatus>>,
}

type TaskTable = Arc<RwLock<HashMap<String, TaskStatus>>>;

/// Fixed-size worker pool over an unbounded queue.
pub struct TaskExecutor {
    sender: std::sync::Mutex<Option<mpsc::UnboundedSender<Job>>>,
    tasks: TaskTable,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor").finish_non_exhaustive()
    }
}

impl TaskExecutor {
    /// Start `workers` workers (at least one) on the current runtime.
    pub fn new(workers: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let tasks: TaskTable = Arc::new(RwLock::new(HashMap::new()));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let receiver = receiver.clone();
                let tasks = tasks.clone();
                tokio::spawn(async move {
                    debug!(worker, "Task worker started");
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else { break };
                        run_job(job, &tasks).await;
                    }
                    debug!(worker, "Task worker stopped");
                })
            })
            .collect();

        info!(workers = workers.max(1), "Task executor started");
        Self {
            sender: std::sync::Mutex::new(Some(sender)),
            tasks,
            workers: Mutex::new(handles),
        }
    }

    /// Queue a task and return its id immediately.
    pub async fn add_task<F>(&self, task: F, callback: Option<TaskCallback>) -> Result<String>
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        self.submit(task.boxed(), callback, None).await
    }

    /// Queue a task and wait for it to finish.
    pub async fn add_task_sync<F>(&self, task: F, callback: Option<TaskCallback>) -> Result<TaskStatus>
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(task.boxed(), callback, Some(tx)).await?;
        rx.await.map_err(|_| Error::ExecutorClosed)
    }

    /// Status of a task submitted during this process lifetime.
    pub async fn get_task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// Stop accepting tasks, let the workers drain the queue, then join them.
    pub async fn shutdown(&self) {
        let sender = match self.sender.lock() {
            Ok(mut sender) => sender.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);

        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Task worker ended abnormally");
            }
        }
        info!("Task executor stopped");
    }

    async fn submit(
        &self,
        future: BoxFuture<'static, Result<Value>>,
        callback: Option<TaskCallback>,
        completion: Option<oneshot::Sender<TaskStatus>>,
    ) -> Result<String> {
        let sender = match self.sender.lock() {
            Ok(sender) => sender.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
        .ok_or(Error::ExecutorClosed)?;

        let task_id = Uuid::new_v4().to_string();
        self.tasks
            .write()
            .await
            .insert(task_id.clone(), TaskStatus::running());

        let job = Job {
            task_id: task_id.clone(),
            future,
            callback,
            completion,
        };
        if sender.send(job).is_err() {
            self.tasks.write().await.remove(&task_id);
            return Err(Error::ExecutorClosed);
        }
        debug!(task_id = %task_id, "Task queued");
        Ok(task_id)
    }
}

async fn run_job(job: Job, tasks: &TaskTable) {
    let Job {
        task_id,
        future,
        callback,
        completion,
    } = job;

    let mut status = TaskStatus::done();
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(value)) => status.result = Some(value),
        Ok(Err(e)) => {
            debug!(task_id = %task_id, error = %e, "Task failed");
            status.error = Some(e.to_string());
        }
        Err(panic) => {
            let message = panic_message(panic);
            error!(task_id = %task_id, panic = %message, "Task panicked");
            status.exception = Some(message);
        }
    }

    tasks.write().await.insert(task_id.clone(), status.clone());

    if let Some(callback) = callback
        && let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(&status)))
    {
        error!(task_id = %task_id, panic = %panic_message(panic), "Task callback panicked");
    }

    if let Some(completion) = completion {
        let _ = completion.send(status);
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
