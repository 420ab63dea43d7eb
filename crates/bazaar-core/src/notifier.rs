use bazaar_models::chat::OfflineMessageNotice;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);
const OFFLINE_MESSAGE_PATH: &str = "/api/chat-email/offline-message";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("notification service returned status {0}")]
    Status(u16),
}

/// Producer half of the offline notification queue.
#[derive(Clone)]
pub struct OfflineNotifier {
    tx: Option<mpsc::Sender<OfflineMessageNotice>>,
}

impl OfflineNotifier {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OfflineMessageNotice>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queues one notice without waiting. Returns whether it was accepted.
    pub fn dispatch(&self, notice: OfflineMessageNotice) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        let recipient_id = notice.recipient_id;
        match tx.try_send(notice) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(recipient_id, "offline notification not queued: {e}");
                false
            }
        }
    }
}

/// Drains the queue and POSTs each notice once, with bounded concurrency.
pub struct NotificationWorker {
    http: reqwest::Client,
    endpoint: String,
    in_flight: Arc<Semaphore>,
}

impl NotificationWorker {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        max_in_flight: usize,
    ) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), OFFLINE_MESSAGE_PATH),
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
        })
    }

    pub fn spawn(self, mut rx: mpsc::Receiver<OfflineMessageNotice>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(notice) = rx.recv().await {
                let Ok(permit) = self.in_flight.clone().acquire_owned().await else {
                    break;
                };
                let http = self.http.clone();
                let endpoint = self.endpoint.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = send_notice(&http, &endpoint, &notice).await {
                        tracing::warn!(
                            recipient_id = notice.recipient_id,
                            chat_id = notice.chat_id,
                            "offline notification failed: {e}"
                        );
                    } else {
                        tracing::debug!(
                            recipient_id = notice.recipient_id,
                            chat_id = notice.chat_id,
                            "offline notification sent"
                        );
                    }
                });
            }
            tracing::debug!("notification worker stopped");
        })
    }
}

async fn send_notice(
    http: &reqwest::Client,
    endpoint: &str,
    notice: &OfflineMessageNotice,
) -> Result<(), NotifyError> {
    let response = http.post(endpoint).json(notice).send().await?;
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(NotifyError::Status(status.as_u16()))
    }
}
