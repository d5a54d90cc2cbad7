//! Single-threaded sequential executor that owns the GPU context.
//!
//! ```text
//!   caller threads ──post()──▶ ┌───────────── worker thread ─────────────┐
//!   camera backend ──post()──▶ │ factory → on_start → task, task, … →    │
//!                               │ Quit → on_stop → exit                   │
//!                               └─────────────────────────────────────────┘
//! ```
//!
//! Worker state is built on the worker itself so it never has to be `Send`;
//! only the tasks travelling through the queue do.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::LoopError;

/// Lifecycle hooks run on the worker around the task stream.
pub trait Lifecycle: Sized + 'static {
    /// Runs once before any task. Returning an error aborts start-up.
    fn on_start(&mut self, handle: &LoopHandle<Self>) -> Result<(), String>;
    /// Runs exactly once, as the final action of the worker.
    fn on_stop(&mut self);
}

pub type Task<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

enum Message<S> {
    Run(Task<S>),
    RunAt(Instant, Task<S>),
    Idle(Sender<bool>),
    Quit,
}

/// Cloneable sender side of the loop.
pub struct LoopHandle<S> {
    sender: Sender<Message<S>>,
    quitting: Arc<AtomicBool>,
}

impl<S> Clone for LoopHandle<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            quitting: self.quitting.clone(),
        }
    }
}

impl<S: 'static> LoopHandle<S> {
    /// Enqueues `task`. Returns false once teardown has begun; such tasks
    /// never run.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        if !self.is_alive() {
            return false;
        }
        self.sender.send(Message::Run(Box::new(task))).is_ok()
    }

    /// Runs `task` once `delay` has elapsed, in deadline order.
    pub fn post_delayed<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        if !self.is_alive() {
            return false;
        }
        let deadline = Instant::now() + delay;
        self.sender
            .send(Message::RunAt(deadline, Box::new(task)))
            .is_ok()
    }

    /// Requests teardown. Only the first call enqueues anything.
    pub fn quit(&self) {
        if self.quitting.swap(true, Ordering::SeqCst) {
            tracing::trace!("render loop already quitting");
            return;
        }
        let _ = self.sender.send(Message::Quit);
    }

    pub fn is_alive(&self) -> bool {
        !self.quitting.load(Ordering::SeqCst)
    }

    /// Blocks until the worker finds its queue empty. Delayed tasks that have
    /// not come due are not waited for.
    pub fn wait_idle(&self) -> Result<(), LoopError> {
        loop {
            let (tx, rx) = bounded(1);
            self.sender
                .send(Message::Idle(tx))
                .map_err(|_| LoopError::Disconnected)?;
            match rx.recv() {
                Ok(true) => return Ok(()),
                Ok(false) => continue,
                Err(_) => return Err(LoopError::Disconnected),
            }
        }
    }
}

/// Owner of the worker thread. Dropping it quits and joins the worker.
pub struct RenderLoop<S: 'static> {
    handle: LoopHandle<S>,
    join_handle: Option<JoinHandle<()>>,
}

impl<S: Lifecycle> RenderLoop<S> {
    /// Spawns the worker, builds its state with `factory`, and waits for
    /// `on_start` to finish.
    pub fn spawn<F>(name: &str, factory: F) -> Result<Self, LoopError>
    where
        F: FnOnce(LoopHandle<S>) -> Result<S, String> + Send + 'static,
    {
        let (sender, receiver) = unbounded();
        let handle = LoopHandle {
            sender,
            quitting: Arc::new(AtomicBool::new(false)),
        };
        let (ready_tx, ready_rx) = bounded(1);
        let worker_handle = handle.clone();
        let join_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_worker(worker_handle, receiver, factory, ready_tx))
            .map_err(LoopError::Spawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::debug!(thread = name, "render loop started");
                Ok(Self {
                    handle,
                    join_handle: Some(join_handle),
                })
            }
            Ok(Err(message)) => {
                let _ = join_handle.join();
                Err(LoopError::Startup(message))
            }
            Err(_) => {
                let _ = join_handle.join();
                Err(LoopError::Panicked)
            }
        }
    }
}

impl<S: 'static> RenderLoop<S> {
    pub fn handle(&self) -> &LoopHandle<S> {
        &self.handle
    }

    /// Waits for the worker to terminate. Does not request termination.
    pub fn join(mut self) -> Result<(), LoopError> {
        match self.join_handle.take() {
            Some(handle) => handle.join().map_err(|_| LoopError::Panicked),
            None => Ok(()),
        }
    }
}

impl<S: 'static> Drop for RenderLoop<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            self.handle.quit();
            let _ = handle.join();
        }
    }
}

struct Delayed<S> {
    deadline: Instant,
    seq: u64,
    task: Task<S>,
}

impl<S> PartialEq for Delayed<S> {
    fn eq(&self, other: &Self) -> bool {
        (self.deadline, self.seq) == (other.deadline, other.seq)
    }
}

impl<S> Eq for Delayed<S> {}

impl<S> PartialOrd for Delayed<S> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<S> Ord for Delayed<S> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

fn run_worker<S, F>(
    handle: LoopHandle<S>,
    receiver: Receiver<Message<S>>,
    factory: F,
    ready_tx: Sender<Result<(), String>>,
) where
    S: Lifecycle,
    F: FnOnce(LoopHandle<S>) -> Result<S, String>,
{
    let mut state = match factory(handle.clone()) {
        Ok(state) => state,
        Err(message) => {
            let _ = ready_tx.send(Err(message));
            return;
        }
    };
    if let Err(message) = state.on_start(&handle) {
        tracing::error!(error = %message, "render loop start-up failed");
        let _ = ready_tx.send(Err(message));
        return;
    }
    let _ = ready_tx.send(Ok(()));
    // The worker's own clone would keep the channel open forever.
    drop(handle);

    let mut timers: BinaryHeap<Reverse<Delayed<S>>> = BinaryHeap::new();
    let mut seq = 0u64;

    loop {
        while timers
            .peek()
            .map(|Reverse(next)| next.deadline <= Instant::now())
            .unwrap_or(false)
        {
            if let Some(Reverse(due)) = timers.pop() {
                (due.task)(&mut state);
            }
        }

        let message = match timers.peek() {
            Some(Reverse(next)) => match receiver.recv_deadline(next.deadline) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match receiver.recv() {
                Ok(message) => message,
                Err(_) => break,
            },
        };

        match message {
            Message::Run(task) => task(&mut state),
            Message::RunAt(deadline, task) => {
                seq += 1;
                timers.push(Reverse(Delayed {
                    deadline,
                    seq,
                    task,
                }));
            }
            Message::Idle(reply) => {
                let _ = reply.send(receiver.is_empty());
            }
            Message::Quit => break,
        }
    }

    state.on_stop();
    let discarded = receiver.try_iter().count() + timers.len();
    if discarded > 0 {
        tracing::debug!(discarded, "dropped tasks queued behind render loop teardown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Probe {
        log: Vec<u32>,
        stops: Arc<AtomicUsize>,
        seen: Sender<Vec<u32>>,
    }

    impl Lifecycle for Probe {
        fn on_start(&mut self, _handle: &LoopHandle<Self>) -> Result<(), String> {
            self.log.push(0);
            Ok(())
        }

        fn on_stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            let _ = self.seen.send(self.log.clone());
        }
    }

    fn spawn_probe() -> (RenderLoop<Probe>, Arc<AtomicUsize>, Receiver<Vec<u32>>) {
        let stops = Arc::new(AtomicUsize::new(0));
        let (seen_tx, seen_rx) = unbounded();
        let counter = stops.clone();
        let render_loop = RenderLoop::spawn("probe", move |_| {
            Ok(Probe {
                log: Vec::new(),
                stops: counter,
                seen: seen_tx,
            })
        })
        .expect("spawn");
        (render_loop, stops, seen_rx)
    }

    #[test]
    fn runs_tasks_in_fifo_order_after_start() {
        let (render_loop, _stops, seen) = spawn_probe();
        for value in 1..=5 {
            render_loop.handle().post(move |probe: &mut Probe| probe.log.push(value));
        }
        render_loop.handle().quit();
        render_loop.join().unwrap();
        assert_eq!(seen.recv().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn quit_is_idempotent_and_stops_once() {
        let (render_loop, stops, _seen) = spawn_probe();
        let handle = render_loop.handle().clone();
        handle.quit();
        handle.quit();
        assert!(!handle.is_alive());
        render_loop.join().unwrap();
        handle.quit();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tasks_after_quit_are_discarded() {
        let (render_loop, _stops, seen) = spawn_probe();
        let handle = render_loop.handle().clone();
        handle.quit();
        assert!(!handle.post(|probe: &mut Probe| probe.log.push(99)));
        render_loop.join().unwrap();
        assert_eq!(seen.recv().unwrap(), vec![0]);
    }

    #[test]
    fn delayed_tasks_run_in_deadline_order() {
        let (render_loop, _stops, seen) = spawn_probe();
        let handle = render_loop.handle().clone();
        handle.post_delayed(Duration::from_millis(30), |probe: &mut Probe| probe.log.push(2));
        handle.post_delayed(Duration::from_millis(5), |probe: &mut Probe| probe.log.push(1));
        std::thread::sleep(Duration::from_millis(80));
        handle.wait_idle().unwrap();
        handle.quit();
        render_loop.join().unwrap();
        assert_eq!(seen.recv().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn start_failure_is_reported_without_stop() {
        struct Broken;
        impl Lifecycle for Broken {
            fn on_start(&mut self, _handle: &LoopHandle<Self>) -> Result<(), String> {
                Err("no display".into())
            }
            fn on_stop(&mut self) {
                panic!("on_stop must not run after a failed start");
            }
        }
        let err = RenderLoop::spawn("broken", |_| Ok(Broken)).err().expect("startup error");
        assert!(matches!(err, LoopError::Startup(message) if message == "no display"));
    }

    #[test]
    fn dropping_the_loop_tears_down() {
        let (render_loop, stops, _seen) = spawn_probe();
        drop(render_loop);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }
}
