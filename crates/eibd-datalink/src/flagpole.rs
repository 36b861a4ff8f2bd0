use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// One bit on a [`Flagpole`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Flag(u8);

impl Flag {
    /// Cancellation bit every loop watches.
    pub const STOP: Flag = Flag(0);

    /// Bit `bit` (0..=63). Bit 0 is [`Flag::STOP`].
    pub const fn new(bit: u8) -> Self {
        Self(bit & 63)
    }

    const fn mask(self) -> u64 {
        1u64 << self.0
    }
}

/// Snapshot of raised flags returned by the wait calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Raised(u64);

impl Raised {
    pub const fn contains(self, flag: Flag) -> bool {
        self.0 & flag.mask() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn stopped(self) -> bool {
        self.contains(Flag::STOP)
    }
}

fn mask_of(flags: &[Flag]) -> u64 {
    flags.iter().fold(0, |acc, f| acc | f.mask())
}

/// Mutex-guarded bitmask plus condition variable.
///
/// Flags are levels: a raised flag stays raised until someone lowers or
/// takes it. Waiters are woken on every change.
#[derive(Debug, Default)]
pub struct Flagpole {
    bits: Mutex<u64>,
    changed: Condvar,
}

impl Flagpole {
    pub fn new() -> Self {
        Self::default()
    }

    fn bits(&self) -> MutexGuard<'_, u64> {
        self.bits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn raise(&self, flag: Flag) {
        let mut bits = self.bits();
        *bits |= flag.mask();
        self.changed.notify_all();
    }

    pub fn lower(&self, flag: Flag) {
        let mut bits = self.bits();
        *bits &= !flag.mask();
        self.changed.notify_all();
    }

    pub fn raised(&self, flag: Flag) -> bool {
        *self.bits() & flag.mask() != 0
    }

    /// Observes and clears `flag` in one step.
    pub fn take(&self, flag: Flag) -> bool {
        let mut bits = self.bits();
        let was = *bits & flag.mask() != 0;
        *bits &= !flag.mask();
        was
    }

    pub fn stopped(&self) -> bool {
        self.raised(Flag::STOP)
    }

    /// Blocks until any of `flags` (or STOP) is raised.
    pub fn wait(&self, flags: &[Flag]) -> Raised {
        let mask = mask_of(flags) | Flag::STOP.mask();
        let mut bits = self.bits();
        while *bits & mask == 0 {
            bits = self
                .changed
                .wait(bits)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Raised(*bits & mask)
    }

    /// Like [`Flagpole::wait`]; returns an empty set on timeout.
    pub fn wait_timeout(&self, flags: &[Flag], timeout: Duration) -> Raised {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until(flags, deadline),
            None => self.wait(flags),
        }
    }

    pub fn wait_until(&self, flags: &[Flag], deadline: Instant) -> Raised {
        let mask = mask_of(flags) | Flag::STOP.mask();
        let mut bits = self.bits();
        loop {
            if *bits & mask != 0 {
                return Raised(*bits & mask);
            }
            let now = Instant::now();
            if now >= deadline {
                return Raised::default();
            }
            bits = self
                .changed
                .wait_timeout(bits, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Flag, Flagpole};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    const DATA: Flag = Flag::new(1);
    const OTHER: Flag = Flag::new(2);

    #[test]
    fn raise_and_lower() {
        let pole = Flagpole::new();
        assert!(!pole.raised(DATA));
        pole.raise(DATA);
        assert!(pole.raised(DATA));
        assert!(!pole.raised(OTHER));
        pole.lower(DATA);
        assert!(!pole.raised(DATA));
    }

    #[test]
    fn take_clears() {
        let pole = Flagpole::new();
        pole.raise(DATA);
        assert!(pole.take(DATA));
        assert!(!pole.take(DATA));
    }

    #[test]
    fn wait_times_out_empty() {
        let pole = Flagpole::new();
        let start = Instant::now();
        let raised = pole.wait_timeout(&[DATA], Duration::from_millis(30));
        assert!(raised.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wait_wakes_on_raise_from_other_thread() {
        let pole = Arc::new(Flagpole::new());
        let raiser = Arc::clone(&pole);
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            raiser.raise(OTHER);
        });
        let raised = pole.wait_timeout(&[DATA, OTHER], Duration::from_secs(5));
        assert!(raised.contains(OTHER));
        assert!(!raised.contains(DATA));
        t.join().unwrap();
    }

    #[test]
    fn stop_always_wakes() {
        let pole = Flagpole::new();
        pole.raise(Flag::STOP);
        let raised = pole.wait(&[DATA]);
        assert!(raised.stopped());
        assert!(pole.stopped());
    }
}
