use crate::completion::CompletionHandler;
use crate::queue::JobQueue;
use crate::worker::{self, ConsumerConfig, WorkMessage};
use anyhow::Error;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::*;

/// Tally of what the consumer did with the deliveries it saw.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub handled: u64,
    pub job_failures: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    pub queue_errors: u64,
}

impl ConsumerStats {
    fn record(&mut self, msg: &WorkMessage) {
        match msg {
            WorkMessage::Handled(_) => self.handled += 1,
            WorkMessage::JobFailed(..) => self.job_failures += 1,
            WorkMessage::Requeued(..) => self.requeued += 1,
            WorkMessage::DeadLettered(..) => self.dead_lettered += 1,
            WorkMessage::QueueError(_) => self.queue_errors += 1,
        }
    }
}

/// Consumes worker results until `cancel_token` fires.
pub async fn serve(
    cancel_token: CancellationToken,
    config: ConsumerConfig,
    queue: Arc<dyn JobQueue>,
    handler: CompletionHandler,
) -> Result<ConsumerStats, Error> {
    let (send_to_server, mut recv_from_worker) = mpsc::unbounded_channel::<WorkMessage>();

    let mut workers = vec![];
    for index in 0..config.workers {
        let send_to_server = send_to_server.clone();
        let cancel_token = cancel_token.clone();
        let queue = queue.clone();
        let handler = handler.clone();
        let join_handle = tokio::spawn(
            async move {
                worker::start(cancel_token, config, queue, handler, send_to_server).await;
            }
            .instrument(info_span!("worker", index)),
        );
        workers.push(join_handle);
    }
    drop(send_to_server);

    let mut stats = ConsumerStats::default();
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Server Cancelled");
                break;
            },
            chan_msg = recv_from_worker.recv() => {
                match chan_msg {
                    None => {
                        debug!("Worker channel closed unexpectedly, exiting");
                        cancel_token.cancel();
                        break;
                    },
                    Some(msg) => {
                        match &msg {
                            WorkMessage::Handled(id) => debug!(message = "Handled result", delivery_id = id),
                            WorkMessage::JobFailed(id, error) => info!(message = "Conversion failed", delivery_id = id, error = %error),
                            WorkMessage::Requeued(id, error) => warn!(message = "Result requeued", delivery_id = id, error = %error),
                            WorkMessage::DeadLettered(id, error) => error!(message = "Result dead-lettered", delivery_id = id, error = %error),
                            WorkMessage::QueueError(error) => error!(message = "Queue error", error = %error),
                        }
                        stats.record(&msg);
                    },
                }
            }
        }
    }

    // Wait for all workers to complete
    futures::future::join_all(workers)
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    // Reports sent between cancellation and worker exit
    while let Ok(msg) = recv_from_worker.try_recv() {
        stats.record(&msg);
    }

    info!(?stats, "Server stopped.");

    Ok(stats)
}
