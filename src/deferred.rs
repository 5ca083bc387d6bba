//! Tasks scheduled to run at a later simulated time.
//!
//! Tasks can be posted from anywhere through a `TaskSender`, but they only run
//! when the owning system drains the queue, which happens on the simulation
//! thread.

use log::trace;

use crate::particle_system::EmitterId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredTask {
    /// Disable the emitter and park it in the pool again.
    ReturnToPool(EmitterId),
}

#[derive(Debug, Clone, Copy)]
struct Scheduled {
    due: f32,
    task: DeferredTask,
}

/// Cloneable handle for posting tasks. Safe to use from other threads.
#[derive(Debug, Clone)]
pub struct TaskSender {
    tx: crossbeam_channel::Sender<Scheduled>,
}

impl TaskSender {
    /// Runs `task` at the first drain at or after run time `due`.
    pub fn post(&self, due: f32, task: DeferredTask) {
        // The receiver lives as long as the queue, so a send error only means
        // the system is gone and nothing would run the task anyway.
        let _ = self.tx.send(Scheduled { due, task });
    }
}

#[derive(Debug)]
pub struct DeferredQueue {
    tx: crossbeam_channel::Sender<Scheduled>,
    rx: crossbeam_channel::Receiver<Scheduled>,
    pending: Vec<Scheduled>,
}

impl Default for DeferredQueue {
    fn default() -> Self {
        DeferredQueue::new()
    }
}

impl DeferredQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Scheduled>();
        DeferredQueue {
            tx,
            rx,
            pending: Vec::new(),
        }
    }

    pub fn sender(&self) -> TaskSender {
        TaskSender {
            tx: self.tx.clone(),
        }
    }

    pub fn schedule(&mut self, due: f32, task: DeferredTask) {
        self.pending.push(Scheduled { due, task });
    }

    /// Number of tasks not yet run, including ones still in the channel.
    pub fn len(&self) -> usize {
        self.pending.len() + self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns every task due at `now`, earliest first. Tasks
    /// with equal due times keep their posting order.
    pub fn take_due(&mut self, now: f32) -> Vec<DeferredTask> {
        self.pending.extend(self.rx.try_iter());
        if self.pending.is_empty() {
            return Vec::new();
        }
        let (mut due, rest): (Vec<Scheduled>, Vec<Scheduled>) =
            self.pending.drain(..).partition(|s| s.due <= now);
        self.pending = rest;
        due.sort_by(|a, b| a.due.total_cmp(&b.due));
        if !due.is_empty() {
            trace!("{} deferred tasks due at {}", due.len(), now);
        }
        due.into_iter().map(|s| s.task).collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        while self.rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle_system::SystemId;

    fn id(serial: u32) -> EmitterId {
        EmitterId::new(SystemId(0), serial)
    }

    #[test]
    fn only_due_tasks_run() {
        let mut queue = DeferredQueue::new();
        queue.schedule(1.0, DeferredTask::ReturnToPool(id(1)));
        queue.schedule(0.5, DeferredTask::ReturnToPool(id(0)));
        assert!(queue.take_due(0.25).is_empty());
        assert_eq!(queue.take_due(0.5), vec![DeferredTask::ReturnToPool(id(0))]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.take_due(2.0), vec![DeferredTask::ReturnToPool(id(1))]);
        assert!(queue.is_empty());
    }

    #[test]
    fn due_tasks_run_in_time_order() {
        let mut queue = DeferredQueue::new();
        queue.schedule(0.3, DeferredTask::ReturnToPool(id(3)));
        queue.schedule(0.1, DeferredTask::ReturnToPool(id(1)));
        queue.schedule(0.2, DeferredTask::ReturnToPool(id(2)));
        let order: Vec<_> = queue.take_due(1.0);
        assert_eq!(
            order,
            vec![
                DeferredTask::ReturnToPool(id(1)),
                DeferredTask::ReturnToPool(id(2)),
                DeferredTask::ReturnToPool(id(3)),
            ]
        );
    }

    #[test]
    fn tasks_posted_from_another_thread() {
        let mut queue = DeferredQueue::new();
        let sender = queue.sender();
        std::thread::spawn(move || sender.post(0.0, DeferredTask::ReturnToPool(id(4))))
            .join()
            .unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.take_due(0.0), vec![DeferredTask::ReturnToPool(id(4))]);
    }

    #[test]
    fn clear_drops_everything() {
        let mut queue = DeferredQueue::new();
        queue.schedule(0.0, DeferredTask::ReturnToPool(id(0)));
        queue.sender().post(0.0, DeferredTask::ReturnToPool(id(1)));
        queue.clear();
        assert!(queue.take_due(10.0).is_empty());
    }
}
