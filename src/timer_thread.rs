use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::thread;
use std::time::Instant;

#[derive(Debug)]
pub enum TimerCommand {
    Schedule { id: usize, when: Instant },
    Cancel(usize),
}

/// Deadlines owned by the timer thread.
#[derive(Debug, Default)]
struct Deadlines {
    // min-heap of (deadline, id); ties fire in id order
    heap: BinaryHeap<Reverse<(Instant, usize)>>,
    scheduled: HashSet<usize>,
    canceled: HashSet<usize>,
}

impl Deadlines {
    fn schedule(&mut self, id: usize, when: Instant) {
        self.scheduled.insert(id);
        self.heap.push(Reverse((when, id)));
    }

    /// Ids that already expired are not in the heap any more and are ignored.
    fn cancel(&mut self, id: usize) {
        if self.scheduled.contains(&id) {
            self.canceled.insert(id);
        }
    }

    /// Pop the next id due at `now`, skipping canceled entries.
    fn pop_expired(&mut self, now: Instant) -> Option<usize> {
        while let Some(Reverse((when, id))) = self.heap.peek().copied() {
            if when > now {
                return None;
            }
            self.heap.pop();
            self.scheduled.remove(&id);
            if !self.canceled.remove(&id) {
                return Some(id);
            }
        }
        None
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((when, _))| *when)
    }
}

/// Spawn the timer thread and return `(cmd_sender, expired_receiver)`.
///
/// The thread owns only ids and deadlines; callbacks stay on the event-loop
/// thread. It exits once every command sender is dropped.
pub fn spawn_timer_thread() -> std::io::Result<(Sender<TimerCommand>, Receiver<usize>)> {
    let (cmd_tx, cmd_rx) = unbounded::<TimerCommand>();
    let (expired_tx, expired_rx) = unbounded::<usize>();

    thread::Builder::new().name("promise-timer-thread".to_string()).spawn(move || {
        let mut deadlines = Deadlines::default();

        loop {
            while let Some(id) = deadlines.pop_expired(Instant::now()) {
                if let Err(e) = expired_tx.send(id) {
                    log::warn!("timer thread: event loop went away, dropping timer {id}: {e:?}");
                    return;
                }
            }

            let cmd = match deadlines.next_deadline() {
                Some(when) => match cmd_rx.recv_timeout(when.saturating_duration_since(Instant::now())) {
                    Ok(cmd) => cmd,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match cmd_rx.recv() {
                    Ok(cmd) => cmd,
                    Err(_) => break,
                },
            };

            match cmd {
                TimerCommand::Schedule { id, when } => deadlines.schedule(id, when),
                TimerCommand::Cancel(id) => deadlines.cancel(id),
            }
        }
        log::trace!("timer thread: command channel closed, exiting");
    })?;

    Ok((cmd_tx, expired_rx))
}
