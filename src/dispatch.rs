//! Marshalling of work and results onto the caller's thread.
//!
//! The caller owns a [`DispatchQueue`] and pumps it from its own event loop.
//! The worker only ever holds a [`Dispatcher`], so nothing the caller owns is
//! touched from the background thread.
use crate::cancel::CancellationToken;
use crate::engine::events::{SearchEvent, SolutionEvent};
use crate::error::{LocatorError, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

type Task = Box<dyn FnOnce() + Send + 'static>;

pub enum Dispatched {
    Search(SearchEvent),
    Solution(SolutionEvent),
    Task(Task),
}

/// Caller-side consumer of engine events.
pub trait EventHandler {
    fn on_search_event(&mut self, event: SearchEvent);

    fn on_solution_event(&mut self, _event: SolutionEvent) {}
}

/// Sending half, cloned into the worker.
#[derive(Clone)]
pub struct Dispatcher {
    tx: Sender<Dispatched>,
    owner: ThreadId,
}

/// Receiving half. Lives on the thread that created it.
pub struct DispatchQueue {
    rx: Receiver<Dispatched>,
}

/// Create a dispatcher bound to the current thread.
pub fn channel() -> (Dispatcher, DispatchQueue) {
    let (tx, rx) = unbounded();
    (
        Dispatcher {
            tx,
            owner: thread::current().id(),
        },
        DispatchQueue { rx },
    )
}

impl Dispatcher {
    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub fn post_search(&self, event: SearchEvent) -> Result<()> {
        self.tx
            .send(Dispatched::Search(event))
            .map_err(|_| LocatorError::Dispatch)
    }

    pub fn post_solution(&self, event: SolutionEvent) -> Result<()> {
        self.tx
            .send(Dispatched::Solution(event))
            .map_err(|_| LocatorError::Dispatch)
    }

    /// Run `f` on the owner thread and hand its result back.
    ///
    /// Called from the owner thread itself, `f` runs inline so a thread can
    /// never end up waiting for a task queued to its own loop.
    pub fn invoke<R, F>(&self, f: F) -> Result<PendingOp<R>>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        if self.is_owner_thread() {
            // `rx` is alive in the returned op, so this cannot fail.
            let _ = tx.send(f());
            return Ok(PendingOp { rx });
        }

        let task: Task = Box::new(move || {
            // A dropped receiver means the waiter gave up.
            let _ = tx.send(f());
        });
        self.tx
            .send(Dispatched::Task(task))
            .map_err(|_| LocatorError::Dispatch)?;
        Ok(PendingOp { rx })
    }
}

/// Result of a task handed to the owner thread.
pub struct PendingOp<R> {
    rx: Receiver<R>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum WaitOutcome<R> {
    Completed(R),
    /// The waiter gave up because its token was cancelled.
    Cancelled,
    /// The task was dropped without running (queue torn down).
    Abandoned,
}

impl<R> PendingOp<R> {
    pub fn try_take(&self) -> Option<R> {
        self.rx.try_recv().ok()
    }

    /// Wait in `poll` sized slices, giving up once any of `cancel` trips.
    pub fn wait(self, cancel: &[&CancellationToken], poll: Duration) -> WaitOutcome<R> {
        loop {
            match self.rx.recv_timeout(poll) {
                Ok(value) => return WaitOutcome::Completed(value),
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.iter().any(|token| token.is_cancelled()) {
                        return WaitOutcome::Cancelled;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return WaitOutcome::Abandoned,
            }
        }
    }
}

impl DispatchQueue {
    /// Handle everything queued so far without blocking. Returns the number of
    /// items handled.
    pub fn pump(&self, handler: &mut dyn EventHandler) -> usize {
        let mut handled = 0;
        loop {
            match self.rx.try_recv() {
                Ok(item) => {
                    Self::handle(item, handler);
                    handled += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return handled,
            }
        }
    }

    /// Block up to `timeout` for the first item, then drain the rest.
    pub fn pump_timeout(&self, handler: &mut dyn EventHandler, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => {
                Self::handle(item, handler);
                1 + self.pump(handler)
            }
            Err(_) => 0,
        }
    }

    /// Pump until `done` reports true or `timeout` elapses. Returns whether
    /// `done` was reached.
    pub fn pump_until<H, F>(&self, handler: &mut H, timeout: Duration, mut done: F) -> bool
    where
        H: EventHandler,
        F: FnMut(&H) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while !done(handler) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(Duration::from_millis(50));
            self.pump_timeout(handler, slice);
        }
        true
    }

    fn handle(item: Dispatched, handler: &mut dyn EventHandler) {
        match item {
            Dispatched::Search(event) => handler.on_search_event(event),
            Dispatched::Solution(event) => handler.on_solution_event(event),
            Dispatched::Task(task) => task(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::Progress;

    #[derive(Default)]
    struct Recorder {
        search: Vec<SearchEvent>,
        solution: Vec<SolutionEvent>,
    }

    impl EventHandler for Recorder {
        fn on_search_event(&mut self, event: SearchEvent) {
            self.search.push(event);
        }

        fn on_solution_event(&mut self, event: SolutionEvent) {
            self.solution.push(event);
        }
    }

    #[test]
    fn test_events_arrive_in_order() {
        let (dispatcher, queue) = channel();
        let worker = dispatcher.clone();
        thread::spawn(move || {
            worker.post_search(SearchEvent::Progress(Progress::Percent(10))).unwrap();
            worker.post_solution(SolutionEvent::SolutionUnloading).unwrap();
            worker.post_search(SearchEvent::Finished).unwrap();
        })
        .join()
        .unwrap();

        let mut recorder = Recorder::default();
        assert_eq!(queue.pump(&mut recorder), 3);
        assert_eq!(
            recorder.search,
            vec![
                SearchEvent::Progress(Progress::Percent(10)),
                SearchEvent::Finished
            ]
        );
        assert_eq!(recorder.solution, vec![SolutionEvent::SolutionUnloading]);
    }

    #[test]
    fn test_invoke_runs_on_owner_thread() {
        let (dispatcher, queue) = channel();
        let owner = thread::current().id();
        let worker = dispatcher.clone();

        let handle = thread::spawn(move || {
            let op = worker.invoke(move || thread::current().id()).unwrap();
            op.wait(&[&CancellationToken::new()], Duration::from_millis(10))
        });

        let mut recorder = Recorder::default();
        let mut outcome = None;
        for _ in 0..200 {
            queue.pump_timeout(&mut recorder, Duration::from_millis(10));
            if handle.is_finished() {
                outcome = Some(handle.join().unwrap());
                break;
            }
        }
        assert_eq!(outcome, Some(WaitOutcome::Completed(owner)));
    }

    #[test]
    fn test_invoke_inline_on_owner() {
        let (dispatcher, _queue) = channel();
        let op = dispatcher.invoke(|| 42).unwrap();
        assert_eq!(op.try_take(), Some(42));
    }

    #[test]
    fn test_wait_gives_up_when_cancelled() {
        let (dispatcher, _queue) = channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = thread::spawn(move || {
            let op = dispatcher.invoke(|| 1).unwrap();
            op.wait(&[&cancel], Duration::from_millis(5))
        })
        .join()
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[test]
    fn test_post_fails_after_queue_dropped() {
        let (dispatcher, queue) = channel();
        drop(queue);
        assert!(dispatcher.post_search(SearchEvent::Finished).is_err());
    }
}
