use crate::completion::CompletionHandler;
use crate::queue::{Delivery, JobQueue};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::mpsc::UnboundedSender, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::*;

#[derive(Debug)]
pub enum WorkMessage {
    /// Result applied, delivery acknowledged.
    Handled(i64),
    /// Worker reported a failed conversion; recorded and acknowledged.
    JobFailed(i64, String),
    Requeued(i64, String),
    DeadLettered(i64, String),
    QueueError(Error),
}

/// What to do with a delivery once the handler has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
    DeadLetter,
}

pub fn disposition(result: &Result<()>, attempts: i32, max_deliveries: i32) -> Disposition {
    match result {
        Ok(()) | Err(Error::CompressWorker(_)) => Disposition::Ack,
        Err(Error::InvalidResponse(_)) => Disposition::DeadLetter,
        Err(_) if attempts >= max_deliveries => Disposition::DeadLetter,
        Err(_) => Disposition::Requeue,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumerConfig {
    pub workers: u16,
    pub max_deliveries: i32,
    pub poll_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            workers: 3,
            max_deliveries: 5,
            poll_interval: Duration::from_millis(500),
        }
    }
}

pub async fn start(
    cancel_token: CancellationToken,
    config: ConsumerConfig,
    queue: Arc<dyn JobQueue>,
    handler: CompletionHandler,
    send_to_server: UnboundedSender<WorkMessage>,
) {
    loop {
        let fetched = tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Worker Cancelled");
                break;
            },
            fetched = queue.fetch() => fetched,
        };

        let report = match fetched {
            Ok(Some(delivery)) => process(&cancel_token, config, &*queue, &handler, delivery).await,
            Ok(None) => {
                idle(&cancel_token, config.poll_interval).await;
                continue;
            }
            Err(err) => {
                error!(message = "Error fetching result", error = %err);
                idle(&cancel_token, config.poll_interval).await;
                WorkMessage::QueueError(err)
            }
        };

        if send_to_server.send(report).is_err() {
            debug!("Server channel closed, exiting");
            break;
        }
    }
    info!("Worker stopped.");
}

async fn idle(cancel_token: &CancellationToken, poll_interval: Duration) {
    tokio::select! {
        _ = cancel_token.cancelled() => {},
        _ = sleep(poll_interval) => {},
    }
}

#[instrument(skip_all, fields(delivery_id = delivery.id, attempts = delivery.attempts))]
async fn process(
    cancel_token: &CancellationToken,
    config: ConsumerConfig,
    queue: &dyn JobQueue,
    handler: &CompletionHandler,
    delivery: Delivery,
) -> WorkMessage {
    let result = handler
        .handle_completion(cancel_token, &delivery.payload)
        .await;

    let settled = match disposition(&result, delivery.attempts, config.max_deliveries) {
        Disposition::Ack => queue.ack(&delivery).await,
        Disposition::Requeue => queue.nack(&delivery, true).await,
        Disposition::DeadLetter => queue.nack(&delivery, false).await,
    };
    if let Err(err) = settled {
        error!(message = "Can't settle delivery", error = %err);
        return WorkMessage::QueueError(err);
    }

    match result {
        Ok(()) => WorkMessage::Handled(delivery.id),
        Err(Error::CompressWorker(msg)) => {
            debug!(message = "Worker reported failure", error = %msg);
            WorkMessage::JobFailed(delivery.id, msg)
        }
        Err(err) => {
            let msg = err.to_string();
            match disposition(&Err(err), delivery.attempts, config.max_deliveries) {
                Disposition::Requeue => {
                    warn!(message = "Result requeued", error = %msg);
                    WorkMessage::Requeued(delivery.id, msg)
                }
                _ => {
                    error!(message = "Result dead-lettered", error = %msg);
                    WorkMessage::DeadLettered(delivery.id, msg)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid() -> Error {
        Error::InvalidResponse(serde_json::from_str::<u8>("x").unwrap_err())
    }

    #[test]
    fn handled_and_worker_failures_are_acked() {
        assert_eq!(disposition(&Ok(()), 1, 5), Disposition::Ack);
        assert_eq!(
            disposition(&Err(Error::CompressWorker("boom".into())), 1, 5),
            Disposition::Ack
        );
    }

    #[test]
    fn malformed_payload_is_dead_lettered_immediately() {
        assert_eq!(disposition(&Err(invalid()), 1, 5), Disposition::DeadLetter);
    }

    #[test]
    fn store_failures_retry_until_limit() {
        let err = || Err(Error::persistence("down"));
        assert_eq!(disposition(&err(), 1, 3), Disposition::Requeue);
        assert_eq!(disposition(&err(), 2, 3), Disposition::Requeue);
        assert_eq!(disposition(&err(), 3, 3), Disposition::DeadLetter);
    }
}
