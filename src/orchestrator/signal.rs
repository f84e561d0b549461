use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Cooperative control signal. Pause never kills in-flight subprocesses;
/// the invoker's deadline is the only reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    None,
    Pause,
    Cancel,
}

impl From<u8> for Signal {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Pause,
            2 => Self::Cancel,
            _ => Self::None,
        }
    }
}

impl From<Signal> for u8 {
    fn from(s: Signal) -> Self {
        match s {
            Signal::None => 0,
            Signal::Pause => 1,
            Signal::Cancel => 2,
        }
    }
}

/// Shared handle for signalling a running orchestrator from another task.
#[derive(Clone, Default)]
pub struct SignalHandler {
    signal: Arc<AtomicU8>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, signal: Signal) {
        self.signal.store(signal.into(), Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.send(Signal::Pause);
    }

    pub fn cancel(&self) {
        self.send(Signal::Cancel);
    }

    pub fn clear(&self) {
        self.signal.store(0, Ordering::SeqCst);
    }

    pub fn check(&self) -> Signal {
        Signal::from(self.signal.load(Ordering::SeqCst))
    }

    pub fn has_signal(&self) -> bool {
        self.check() != Signal::None
    }
}
