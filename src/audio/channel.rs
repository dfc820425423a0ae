use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use super::command::Command;

/// Maximum number of queued commands before producers block.
const QUEUE_CAPACITY: usize = 128;

/// Synchronization surface between producer threads (UI/controller) and the
/// audio-loop thread.
///
/// A bounded FIFO of [`Command`]s guarded by a mutex and two condition
/// variables, plus two flags readable without the lock: `play` mirrors
/// whether the loop is inside a song, and `exit` is monotonic. Once set it
/// never clears, and every blocked producer or consumer wakes up.
pub struct CommandQueue {
    queue: Mutex<VecDeque<Command>>,
    not_empty: Condvar,
    not_full: Condvar,
    play: AtomicBool,
    exit: AtomicBool,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            play: AtomicBool::new(false),
            exit: AtomicBool::new(false),
        }
    }

    /// Pushes a command, blocking while the queue is full. Commands are never
    /// dropped; after exit has been signalled the push is discarded since the
    /// consumer is gone.
    pub fn enqueue(&self, cmd: Command) {
        let mut queue = self.queue.lock().unwrap();
        while queue.len() >= QUEUE_CAPACITY {
            if self.exit.load(Ordering::Acquire) {
                return;
            }
            queue = self.not_full.wait(queue).unwrap();
        }
        if self.exit.load(Ordering::Acquire) {
            return;
        }
        queue.push_back(cmd);
        self.not_empty.notify_all();
    }

    /// Blocks until a command is available or exit is signalled. Returns
    /// `None` exactly once exit has been observed; exit is sticky, so no
    /// command is ever returned afterwards.
    pub fn dequeue(&self) -> Option<Command> {
        let mut queue = self.queue.lock().unwrap();
        loop {
            if self.exit.load(Ordering::Acquire) {
                return None;
            }
            if let Some(cmd) = queue.pop_front() {
                self.not_full.notify_all();
                return Some(cmd);
            }
            queue = self.not_empty.wait(queue).unwrap();
        }
    }

    /// Non-blocking variant used between decode chunks.
    pub fn try_dequeue(&self) -> Option<Command> {
        if self.exit.load(Ordering::Acquire) {
            return None;
        }
        let mut queue = self.queue.lock().unwrap();
        let cmd = queue.pop_front();
        if cmd.is_some() {
            self.not_full.notify_all();
        }
        cmd
    }

    /// Signals every blocked thread to exit. Irreversible.
    pub fn notify_exit(&self) {
        self.exit.store(true, Ordering::Release);
        let _guard = self.queue.lock().unwrap();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_exiting(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }

    pub fn set_playing(&self, playing: bool) {
        self.play.store(playing, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        self.play.load(Ordering::Acquire)
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
