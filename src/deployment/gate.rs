use parking_lot::Mutex;

#[derive(Debug, Default)]
struct GateState {
    running: bool,
    rerun_requested: bool,
}

/// Single-flight admission for a deployment's scans.
///
/// Only one scan runs at a time. A request arriving while one runs is
/// coalesced into a single follow-up pass performed by the running caller.
/// If that caller bails out early the request stays pending and the next
/// caller to enter performs it.
#[derive(Debug, Default)]
pub(crate) struct ScanGate {
    state: Mutex<GateState>,
}

impl ScanGate {
    /// Claim the gate, or flag a rerun and return `None` if a scan is running.
    pub(crate) fn try_enter(&self) -> Option<ScanTicket<'_>> {
        let mut state = self.state.lock();
        if state.running {
            state.rerun_requested = true;
            return None;
        }
        state.running = true;
        Some(ScanTicket {
            gate: self,
            released: false,
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state.lock().running
    }
}

/// Held by the caller performing scans; releases the gate on drop.
#[derive(Debug)]
pub(crate) struct ScanTicket<'a> {
    gate: &'a ScanGate,
    released: bool,
}

impl ScanTicket<'_> {
    /// Consume a pending rerun request, or release the gate if there is none.
    ///
    /// Both happen under one lock so a request cannot slip in between.
    pub(crate) fn rerun_or_release(&mut self) -> bool {
        let mut state = self.gate.state.lock();
        if std::mem::take(&mut state.rerun_requested) {
            return true;
        }
        state.running = false;
        self.released = true;
        false
    }
}

impl Drop for ScanTicket<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.gate.state.lock().running = false;
        }
    }
}
