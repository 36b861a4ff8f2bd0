use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::flagpole::{Flag, Flagpole};

/// A named loop thread stopped through its flagpole's STOP flag.
///
/// Dropping the worker raises STOP and joins the thread, unless the drop
/// happens on the worker thread itself.
#[derive(Debug)]
pub struct Worker {
    name: String,
    pole: Arc<Flagpole>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn<F>(name: impl Into<String>, pole: Arc<Flagpole>, body: F) -> io::Result<Self>
    where
        F: FnOnce(Arc<Flagpole>) + Send + 'static,
    {
        let name = name.into();
        let loop_pole = Arc::clone(&pole);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(loop_pole))?;
        log::debug!("started worker {name}");
        Ok(Self {
            name,
            pole,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pole(&self) -> &Arc<Flagpole> {
        &self.pole
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.pole.raise(Flag::STOP);
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            log::error!("worker {} panicked", self.name);
        } else {
            log::debug!("stopped worker {}", self.name);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::Worker;
    use crate::flagpole::{Flag, Flagpole};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn stop_joins_loop() {
        let turns = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&turns);
        let worker = Worker::spawn("test-loop", Arc::new(Flagpole::new()), move |pole| {
            while !pole.wait(&[Flag::new(1)]).stopped() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
        assert_eq!(worker.name(), "test-loop");
        worker.stop();
        assert_eq!(turns.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drop_raises_stop() {
        let pole = Arc::new(Flagpole::new());
        {
            let _worker = Worker::spawn("drop-loop", Arc::clone(&pole), |pole| {
                pole.wait(&[]);
            })
            .unwrap();
        }
        assert!(pole.stopped());
    }
}
