//! Per-user event serialization.
//!
//! Each user with pending events gets one worker task and one queue, so a
//! user's events run in arrival order while different users proceed
//! concurrently. A worker retires after sitting idle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::channels::{IncomingMessage, MessageStream};

use super::engine::ConversationEngine;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

type Workers = Mutex<HashMap<String, mpsc::UnboundedSender<IncomingMessage>>>;

#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<ConversationEngine>,
    workers: Arc<Workers>,
    idle_timeout: Duration,
}

impl Dispatcher {
    pub fn new(engine: Arc<ConversationEngine>) -> Self {
        Self {
            engine,
            workers: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Queue an event behind the user's earlier events.
    pub fn dispatch(&self, msg: IncomingMessage) {
        let mut workers = lock(&self.workers);
        let msg = match workers.get(&msg.user_id) {
            Some(tx) => match tx.send(msg) {
                Ok(()) => return,
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };

        let user_id = msg.user_id.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is alive in this scope.
        let _ = tx.send(msg);
        workers.insert(user_id.clone(), tx);
        tokio::spawn(run_worker(
            self.engine.clone(),
            self.workers.clone(),
            user_id,
            rx,
            self.idle_timeout,
        ));
    }

    /// Feed every event from `stream` until it ends.
    pub async fn run(&self, mut stream: MessageStream) {
        while let Some(msg) = stream.next().await {
            self.dispatch(msg);
        }
        tracing::info!("Message stream ended");
    }

    pub fn active_workers(&self) -> usize {
        lock(&self.workers).len()
    }
}

fn lock(workers: &Workers) -> MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<IncomingMessage>>> {
    workers.lock().unwrap_or_else(|e| e.into_inner())
}

async fn run_worker(
    engine: Arc<ConversationEngine>,
    workers: Arc<Workers>,
    user_id: String,
    mut rx: mpsc::UnboundedReceiver<IncomingMessage>,
    idle_timeout: Duration,
) {
    tracing::debug!(user_id = %user_id, "Worker started");
    loop {
        let msg = match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(_) => {
                // Retire only if nothing slipped in; dispatch sends under
                // the same lock.
                let mut map = lock(&workers);
                match rx.try_recv() {
                    Ok(msg) => {
                        drop(map);
                        msg
                    }
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                        map.remove(&user_id);
                        break;
                    }
                }
            }
        };
        engine.handle(msg).await;
    }
    tracing::debug!(user_id = %user_id, "Worker retired");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::test_support::harness;

    #[tokio::test]
    async fn events_for_one_user_are_handled_in_order() {
        let h = harness().await;
        let engine = Arc::new(ConversationEngine::new(h.deps.clone()));
        let dispatcher = Dispatcher::new(engine).with_idle_timeout(Duration::from_millis(50));

        dispatcher.dispatch(IncomingMessage::new("test", "1", "/help"));
        dispatcher.dispatch(IncomingMessage::new("test", "1", "/cancel"));
        dispatcher.dispatch(IncomingMessage::new("test", "2", "/help"));
        assert_eq!(dispatcher.active_workers(), 2);

        tokio::time::timeout(Duration::from_secs(5), async {
            while dispatcher.active_workers() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let sent = h.channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        let user_one: Vec<&str> = sent
            .iter()
            .filter(|(address, _)| address == "1")
            .map(|(_, r)| r.content.as_str())
            .collect();
        assert_eq!(
            user_one,
            vec![
                crate::presentation::render::HELP_TEXT,
                crate::presentation::render::NOTHING_TO_CANCEL
            ]
        );
    }
}
