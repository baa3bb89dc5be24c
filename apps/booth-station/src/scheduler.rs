use std::time::Duration;

use tokio::{sync::mpsc, task::JoinHandle};

/// Delivers inputs back to an actor inbox after a delay.
#[derive(Debug)]
pub struct Scheduler<T> {
    inbox: mpsc::UnboundedSender<T>,
}

impl<T> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inbox: self.inbox.clone(),
        }
    }
}

impl<T: Send + 'static> Scheduler<T> {
    pub fn new(inbox: mpsc::UnboundedSender<T>) -> Self {
        Self { inbox }
    }

    pub fn schedule(&self, delay: Duration, input: T) -> ScheduledTask {
        let inbox = self.inbox.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inbox.send(input);
        });
        ScheduledTask { handle }
    }
}

/// A pending scheduled input. Cancelled on [`ScheduledTask::cancel`] or drop.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn cancel(self) {}
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::tokio_timeout_test(paused)]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(tx);
        let started = tokio::time::Instant::now();
        let _task = scheduler.schedule(Duration::from_millis(1500), "cooldown");

        assert_eq!(rx.recv().await, Some("cooldown"));
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn cancelled_task_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(tx);
        scheduler.schedule(Duration::from_secs(1), 1).cancel();
        let dropped = scheduler.schedule(Duration::from_secs(1), 2);
        drop(dropped);
        let _kept = scheduler.schedule(Duration::from_secs(2), 3);

        assert_eq!(rx.recv().await, Some(3));
    }
}
