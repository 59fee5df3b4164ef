//! Host task queue.
//!
//! Promises never run continuations themselves; they hand jobs to a
//! [`TaskQueue`]. [`EventLoop`] is the bundled host: a FIFO job queue plus
//! macrotask timers driven by a background timer thread.

use crate::config::{EventLoopConfig, Scheduling};
use crate::core::{EvalError, Value, value_to_string};
use crate::error::JSError;
use crate::js_promise::{Deferred, Promise, RejectFunction, RejectionWatch, ResolveFunction};
use crate::timer_thread::{TimerCommand, spawn_timer_thread};
use crossbeam_channel::{Receiver, Sender};
use std::cell::{Cell, OnceCell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce()>;

pub trait TaskQueue {
    /// Run `job` in a later turn. Jobs enqueued from the same turn must run
    /// in enqueue order.
    fn enqueue(&self, job: Job);

    /// Called when a promise is rejected while nothing observes it.
    fn track_rejection(&self, _rejection: RejectionWatch) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollResult {
    /// A task was executed.
    Executed,
    /// No task was ready, but timers are pending; the nearest is due in the given duration.
    Wait(Duration),
    /// Nothing queued and no timers pending.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(usize);

struct TimerThreadHandle {
    cmd_tx: Sender<TimerCommand>,
    expired_rx: Receiver<usize>,
}

struct Timer {
    when: Instant,
    job: Job,
}

struct EventLoopInner {
    config: EventLoopConfig,
    jobs: RefCell<VecDeque<(usize, Job)>>,
    timers: RefCell<HashMap<usize, Timer>>,
    ready_timers: RefCell<VecDeque<usize>>,
    timer_thread: OnceCell<TimerThreadHandle>,
    task_counter: Cell<usize>,
    next_timer_id: Cell<usize>,
    /// Advanced once per idle pass of `run_until_idle`.
    tick: Cell<usize>,
    pending_unhandled: RefCell<Vec<(RejectionWatch, usize)>>,
    unhandled: RefCell<Vec<Value>>,
}

impl EventLoopInner {
    fn next_task_id(&self) -> usize {
        let id = self.task_counter.get();
        self.task_counter.set(id + 1);
        id
    }

    fn push_job(&self, job: Job) {
        let task_id = self.next_task_id();
        let mut jobs = self.jobs.borrow_mut();
        jobs.push_back((task_id, job));
        log::trace!("queue_task: id={task_id} queue_len after push = {}", jobs.len());
    }

    fn timer_thread(&self) -> Result<&TimerThreadHandle, JSError> {
        if let Some(handle) = self.timer_thread.get() {
            return Ok(handle);
        }
        let (cmd_tx, expired_rx) = spawn_timer_thread().map_err(|e| JSError::TimerThread { message: e.to_string() })?;
        Ok(self.timer_thread.get_or_init(move || TimerThreadHandle { cmd_tx, expired_rx }))
    }

    /// On failure the job is moved to the job queue before the error is returned.
    fn schedule_timer(&self, delay: Duration, job: Job) -> Result<TimerId, JSError> {
        let handle = match self.timer_thread() {
            Ok(handle) => handle,
            Err(err) => {
                log::warn!("schedule_timer: {err}, running the job from the job queue");
                self.push_job(job);
                return Err(err);
            }
        };
        let id = self.next_timer_id.get();
        self.next_timer_id.set(id + 1);
        let when = Instant::now() + delay;
        self.timers.borrow_mut().insert(id, Timer { when, job });

        if let Err(e) = handle.cmd_tx.send(TimerCommand::Schedule { id, when }) {
            log::warn!("schedule_timer: timer thread unavailable, running timer {id} as a job: {e:?}");
            if let Some(timer) = self.timers.borrow_mut().remove(&id) {
                self.push_job(timer.job);
            }
            return Err(JSError::TimerThread { message: e.to_string() });
        }
        log::trace!("schedule_timer: id={id} delay={delay:?}");
        Ok(TimerId(id))
    }

    fn drain_expired(&self) {
        if let Some(handle) = self.timer_thread.get() {
            while let Ok(id) = handle.expired_rx.try_recv() {
                self.ready_timers.borrow_mut().push_back(id);
            }
        }
    }

    fn wait_for_timer(&self, nearest: Duration) {
        match self.timer_thread.get() {
            Some(handle) => {
                if let Ok(id) = handle.expired_rx.recv_timeout(nearest + self.config.max_idle_wait) {
                    self.ready_timers.borrow_mut().push_back(id);
                }
            }
            None => std::thread::sleep(nearest),
        }
    }

    fn process_pending_unhandled(&self) {
        let tick = self.tick.get() + 1;
        self.tick.set(tick);
        let grace = self.config.unhandled_grace_ticks;

        let mut reported = Vec::new();
        self.pending_unhandled.borrow_mut().retain(|(watch, inserted)| match watch.is_handled() {
            Some(true) => false,
            _ if tick < inserted.saturating_add(grace) => true,
            _ => {
                reported.push(watch.reason().clone());
                false
            }
        });

        for reason in &reported {
            log::warn!("Unhandled promise rejection: {}", value_to_string(reason));
        }
        self.unhandled.borrow_mut().extend(reported);
    }
}

impl TaskQueue for EventLoopInner {
    fn enqueue(&self, job: Job) {
        match self.config.scheduling {
            Scheduling::Microtask => self.push_job(job),
            Scheduling::Macrotask => {
                if let Err(err) = self.schedule_timer(Duration::ZERO, job) {
                    log::trace!("enqueue: {err}, job fell back to the job queue");
                }
            }
        }
    }

    fn track_rejection(&self, rejection: RejectionWatch) {
        if !self.config.report_unhandled_rejections {
            return;
        }
        log::trace!("track_rejection: promise id={} at tick {}", rejection.promise_id(), self.tick.get());
        self.pending_unhandled.borrow_mut().push((rejection, self.tick.get()));
    }
}

/// Single-threaded host event loop. Cloning yields another handle to the
/// same loop.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<EventLoopInner>,
}

impl Default for EventLoop {
    fn default() -> Self {
        EventLoop::new()
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EventLoop {{ jobs: {}, timers: {}, tick: {} }}",
            self.inner.jobs.borrow().len(),
            self.inner.timers.borrow().len(),
            self.inner.tick.get()
        )
    }
}

impl EventLoop {
    pub fn new() -> Self {
        EventLoop::with_config(EventLoopConfig::default())
    }

    pub fn with_config(config: EventLoopConfig) -> Self {
        EventLoop {
            inner: Rc::new(EventLoopInner {
                config,
                jobs: RefCell::new(VecDeque::new()),
                timers: RefCell::new(HashMap::new()),
                ready_timers: RefCell::new(VecDeque::new()),
                timer_thread: OnceCell::new(),
                task_counter: Cell::new(1),
                next_timer_id: Cell::new(1),
                tick: Cell::new(0),
                pending_unhandled: RefCell::new(Vec::new()),
                unhandled: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &EventLoopConfig {
        &self.inner.config
    }

    /// The queue handle promises are constructed with.
    pub fn queue(&self) -> Rc<dyn TaskQueue> {
        self.inner.clone()
    }

    pub fn new_promise<F>(&self, executor: F) -> Promise
    where
        F: FnOnce(ResolveFunction, RejectFunction) -> Result<(), EvalError>,
    {
        Promise::new(self.queue(), executor)
    }

    pub fn deferred(&self) -> Deferred {
        Promise::deferred(self.queue())
    }

    pub fn resolved(&self, value: impl Into<Value>) -> Promise {
        Promise::resolved(self.queue(), value)
    }

    pub fn rejected(&self, reason: impl Into<Value>) -> Promise {
        Promise::rejected(self.queue(), reason)
    }

    /// Run `job` once, no earlier than `delay` from now.
    ///
    /// If the timer thread is unavailable the error is returned and `job`
    /// runs from the job queue instead.
    pub fn set_timeout<F>(&self, delay: Duration, job: F) -> Result<TimerId, JSError>
    where
        F: FnOnce() + 'static,
    {
        self.inner.schedule_timer(delay, Box::new(job))
    }

    /// Cancel a timer that has not run yet. Returns whether it was pending.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        let removed = self.inner.timers.borrow_mut().remove(&id.0).is_some();
        if removed && let Some(handle) = self.inner.timer_thread.get() {
            if let Err(e) = handle.cmd_tx.send(TimerCommand::Cancel(id.0)) {
                log::warn!("clear_timeout: failed to notify timer thread: {e:?}");
            }
        }
        removed
    }

    /// Queued jobs plus timers that have not fired yet.
    pub fn pending_tasks(&self) -> usize {
        self.inner.jobs.borrow().len() + self.inner.timers.borrow().len()
    }

    /// Execute at most one task: queued jobs first, then expired timers.
    pub fn poll_event_loop(&self) -> PollResult {
        self.inner.drain_expired();

        let next = self.inner.jobs.borrow_mut().pop_front();
        if let Some((task_id, job)) = next {
            log::trace!("poll_event_loop: running job id={task_id}");
            job();
            return PollResult::Executed;
        }

        loop {
            let ready = self.inner.ready_timers.borrow_mut().pop_front();
            let Some(id) = ready else { break };
            // Cleared timers may still be reported by the timer thread.
            let timer = self.inner.timers.borrow_mut().remove(&id);
            if let Some(timer) = timer {
                log::trace!("poll_event_loop: running timer id={id}");
                (timer.job)();
                return PollResult::Executed;
            }
        }

        let now = Instant::now();
        let nearest = self.inner.timers.borrow().values().map(|t| t.when.saturating_duration_since(now)).min();
        match nearest {
            Some(wait) => PollResult::Wait(wait),
            None => PollResult::Empty,
        }
    }

    /// Run until no job or timer is left, blocking on the timer thread while
    /// only timers remain. Ends with an unhandled-rejection pass. Returns the
    /// number of tasks executed.
    pub fn run_until_idle(&self) -> usize {
        let mut executed = 0;
        loop {
            match self.poll_event_loop() {
                PollResult::Executed => executed += 1,
                PollResult::Wait(wait) => self.inner.wait_for_timer(wait),
                PollResult::Empty => break,
            }
        }
        self.inner.process_pending_unhandled();
        log::debug!("run_until_idle: executed {executed} tasks, tick={}", self.inner.tick.get());
        executed
    }

    /// Reasons of rejections reported as unhandled since the last call.
    pub fn take_unhandled_rejections(&self) -> Vec<Value> {
        std::mem::take(&mut *self.inner.unhandled.borrow_mut())
    }
}
