//! Periodic background tasks

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Function run on every tick
pub type TaskFn = Box<dyn FnMut() + Send>;

/// When a task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    interval: Duration,
}

impl Schedule {
    /// Run immediately, then once per `interval`
    pub fn every(interval: Duration) -> Self {
        Schedule { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Handle to a running task; dropping it stops the task
pub struct TaskHandle {
    name: String,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the task and wait for a tick in progress to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the task as well
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Task {} panicked", self.name);
            }
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start `f` on a background thread according to `schedule`
pub fn spawn(name: &str, schedule: Schedule, mut f: TaskFn) -> io::Result<TaskHandle> {
    let (stop, stopped) = mpsc::channel::<()>();

    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || loop {
            f();

            match stopped.recv_timeout(schedule.interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        })?;

    log::debug!("Started task {} every {:?}", name, schedule.interval);

    Ok(TaskHandle {
        name: name.to_string(),
        stop: Some(stop),
        thread: Some(thread),
    })
}
