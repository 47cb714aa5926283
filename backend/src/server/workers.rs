//! Background tasks: the outbox dispatcher and the feedback consumer.
//!
//! Both run independently of RPC handling and stop at the next safe point
//! once the shared token is cancelled.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::domain::{EventDispatcher, FeedbackConsumer};

/// Running workers and the token that stops them.
pub struct WorkerHandles {
    shutdown: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl WorkerHandles {
    /// Number of running workers.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel every worker and wait for each to finish its current unit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for (name, task) in self.tasks {
            match task.await {
                Ok(()) => info!(worker = name, "worker stopped"),
                Err(err) => error!(worker = name, error = %err, "worker terminated abnormally"),
            }
        }
    }
}

/// Spawn the consumer and, when enabled, the dispatcher.
pub fn spawn_workers(
    dispatcher: Option<EventDispatcher>,
    consumer: FeedbackConsumer,
    shutdown: CancellationToken,
) -> WorkerHandles {
    let mut tasks = Vec::with_capacity(2);

    if let Some(dispatcher) = dispatcher {
        let token = shutdown.child_token();
        tasks.push((
            "event-dispatcher",
            tokio::spawn(async move { dispatcher.run(token).await }),
        ));
    } else {
        info!("event dispatcher disabled on this instance");
    }

    let token = shutdown.child_token();
    tasks.push((
        "feedback-consumer",
        tokio::spawn(async move { consumer.run(token).await }),
    ));

    WorkerHandles { shutdown, tasks }
}
