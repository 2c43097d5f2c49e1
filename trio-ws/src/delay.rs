use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

/// Backoff before a rejected message is offered again.
const RETRY_DELAY: Duration = Duration::from_secs(1);

struct Pending {
    due: Instant,
    retries_left: u32,
    payload: Vec<u8>,
}

/// Scheduled-callback queue. Payloads are opaque bytes; the single
/// consumer retires a message by returning true, or sends it back for
/// another attempt (up to its retry budget) by returning false. Delivery
/// order is best-effort by due time.
pub struct DelayQueue {
    pending: Mutex<Vec<Pending>>,
    notify: Notify,
}

impl DelayQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(DelayQueue {
            pending: Mutex::new(Vec::new()),
            notify: Notify::new(),
        })
    }

    pub fn enqueue(&self, payload: Vec<u8>, delay: Duration, retries: u32) {
        self.locked().push(Pending {
            due: Instant::now() + delay,
            retries_left: retries,
            payload,
        });
        self.notify.notify_one();
    }

    /// Messages not yet retired, due or not.
    pub fn pending(&self) -> usize {
        self.locked().len()
    }

    /// Spawn the single consumer loop.
    pub fn start_consume<F, Fut>(self: Arc<Self>, handler: F) -> JoinHandle<()>
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        tokio::spawn(async move {
            loop {
                let next_due = {
                    let pending = self.locked();
                    pending.iter().map(|msg| msg.due).min()
                };

                match next_due {
                    None => self.notify.notified().await,
                    Some(due) if due > Instant::now() => {
                        tokio::select! {
                            _ = sleep_until(due) => {}
                            _ = self.notify.notified() => {}
                        }
                    }
                    Some(_) => {
                        let message = {
                            let mut pending = self.locked();
                            let now = Instant::now();
                            let next = pending
                                .iter()
                                .enumerate()
                                .filter(|(_, msg)| msg.due <= now)
                                .min_by_key(|(_, msg)| msg.due)
                                .map(|(index, _)| index);
                            next.map(|index| pending.swap_remove(index))
                        };

                        if let Some(mut message) = message {
                            let handled = handler(message.payload.clone()).await;
                            if !handled && message.retries_left > 0 {
                                message.retries_left -= 1;
                                message.due = Instant::now() + RETRY_DELAY;
                                self.locked().push(message);
                            }
                        }
                    }
                }
            }
        })
    }

    fn locked(&self) -> MutexGuard<'_, Vec<Pending>> {
        self.pending.lock().unwrap_or_else(|err| err.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{advance, sleep};

    #[tokio::test(start_paused = true)]
    async fn delivers_after_the_delay() {
        let queue = DelayQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let _consumer = queue.clone().start_consume(move |payload| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(payload);
                true
            }
        });

        queue.enqueue(b"tick".to_vec(), Duration::from_secs(5), 0);
        sleep(Duration::from_secs(4)).await;
        assert!(seen.lock().unwrap().is_empty());

        sleep(Duration::from_secs(2)).await;
        assert_eq!(seen.lock().unwrap().as_slice(), &[b"tick".to_vec()]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn requeues_until_retries_are_spent() {
        let queue = DelayQueue::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        let _consumer = queue.clone().start_consume(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                false
            }
        });

        queue.enqueue(b"stubborn".to_vec(), Duration::from_millis(10), 3);
        sleep(Duration::from_secs(10)).await;

        // first delivery plus three retries
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_messages_deliver_first() {
        let queue = DelayQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let _consumer = queue.clone().start_consume(move |payload| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(payload);
                true
            }
        });

        queue.enqueue(b"late".to_vec(), Duration::from_secs(9), 0);
        queue.enqueue(b"early".to_vec(), Duration::from_secs(3), 0);
        advance(Duration::from_secs(10)).await;
        sleep(Duration::from_millis(50)).await;

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[b"early".to_vec(), b"late".to_vec()]
        );
    }
}
