//! Completion signal a procedure fires when it is done
//!
//! `Runtime::run` hands one to the launch closure; the last codelet of the
//! pipeline lists it as an external target (`Codelet::signal_to`). The
//! caller blocks on it until it fires or the launch closure fails.

use codeflow_core::{SchedError, SchedResult, Signal};

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct State {
    fired: bool,
    error: Option<SchedError>,
}

impl State {
    fn done(&self) -> bool {
        self.fired || self.error.is_some()
    }

    fn outcome(&self) -> SchedResult<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct FinalSignal {
    state: Mutex<State>,
    cv: Condvar,
}

impl FinalSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Report that the procedure could not be built
    pub fn fail(&self, err: SchedError) {
        let mut st = self.state();
        if st.error.is_none() {
            st.error = Some(err);
        }
        self.cv.notify_all();
    }

    pub fn is_fired(&self) -> bool {
        self.state().fired
    }

    /// Block until the signal fires or the launch fails
    pub fn wait(&self) -> SchedResult<()> {
        let mut st = self.state();
        while !st.done() {
            st = self.cv.wait(st).unwrap_or_else(|e| e.into_inner());
        }
        st.outcome()
    }

    /// Like `wait`, giving up with `SchedError::Timeout` after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> SchedResult<()> {
        let st = self.state();
        let (st, res) = self
            .cv
            .wait_timeout_while(st, timeout, |st| !st.done())
            .unwrap_or_else(|e| e.into_inner());
        if res.timed_out() && !st.done() {
            return Err(SchedError::Timeout);
        }
        st.outcome()
    }
}

impl Signal for FinalSignal {
    fn dec_dep(&self) {
        self.state().fired = true;
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_returns_after_fire() {
        let sig = Arc::new(FinalSignal::new());
        let s = sig.clone();
        let t = thread::spawn(move || s.dec_dep());
        sig.wait().unwrap();
        t.join().unwrap();
        assert!(sig.is_fired());
    }

    #[test]
    fn test_fail_wakes_waiter_with_error() {
        let sig = Arc::new(FinalSignal::new());
        let s = sig.clone();
        let t = thread::spawn(move || s.fail(SchedError::InvalidProcedure("empty".into())));
        assert_eq!(sig.wait(), Err(SchedError::InvalidProcedure("empty".into())));
        t.join().unwrap();
        assert!(!sig.is_fired());
    }

    #[test]
    fn test_wait_timeout() {
        let sig = FinalSignal::new();
        assert_eq!(sig.wait_timeout(Duration::from_millis(10)), Err(SchedError::Timeout));
        sig.dec_dep();
        assert_eq!(sig.wait_timeout(Duration::from_millis(10)), Ok(()));
    }
}
