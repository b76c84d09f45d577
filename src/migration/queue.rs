use std::{
    collections::VecDeque,
    sync::Mutex,
};

use tokio::sync::{watch, Notify};

use crate::data_model::JobPriority;

#[derive(Debug, thiserror::Error)]
#[error("ready queue is at capacity ({0})")]
pub struct QueueFull(pub usize);

#[derive(Default)]
struct Bands {
    high: VecDeque<String>,
    normal: VecDeque<String>,
    low: VecDeque<String>,
}

impl Bands {
    fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    fn pop(&mut self) -> Option<String> {
        self.high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }
}

/// Priority-ordered ready queue for job ids: high before normal before low,
/// FIFO within a band. The hard capacity is the engine's backpressure
/// valve; hitting it fails job submission with OVERLOADED upstream.
pub struct ReadyQueue {
    bands: Mutex<Bands>,
    capacity: usize,
    notify: Notify,
}

impl ReadyQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            bands: Mutex::new(Bands::default()),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, job_id: String, priority: JobPriority) -> Result<(), QueueFull> {
        {
            let mut bands = self.bands.lock().expect("ready queue lock poisoned");
            if bands.len() >= self.capacity {
                return Err(QueueFull(self.capacity));
            }
            match priority {
                JobPriority::High => bands.high.push_back(job_id),
                JobPriority::Normal => bands.normal.push_back(job_id),
                JobPriority::Low => bands.low.push_back(job_id),
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Next job id in priority/FIFO order; None once shutdown is signalled.
    pub async fn pop(&self, shutdown_rx: &mut watch::Receiver<()>) -> Option<String> {
        loop {
            // Register for notification before checking the queue, so a
            // push between the check and the await cannot be missed.
            let notified = self.notify.notified();
            if let Some(job_id) = self.bands.lock().expect("ready queue lock poisoned").pop() {
                // Wake another waiter in case several pushes raced in.
                self.notify.notify_one();
                return Some(job_id);
            }
            tokio::select! {
                _ = notified => {}
                _ = shutdown_rx.changed() => return None,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.bands.lock().expect("ready queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
