use parking_lot::{Condvar, Mutex};

/// A reusable barrier for a fixed number of parties. The last party to arrive runs the release
/// action before any party is let through, so everything the action does is visible to all
/// parties once `wait` returns.
#[derive(Debug)]
pub struct PhasedBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
}

impl PhasedBarrier {
    pub fn new(parties: usize) -> Self {
        assert!(parties > 0, "A barrier needs at least one party");
        PhasedBarrier {
            parties,
            state: Mutex::new(BarrierState::default()),
            cvar: Condvar::new(),
        }
    }

    /// Blocks until all parties have arrived. Returns true for the party which ran `on_release`.
    pub fn wait<F: FnOnce()>(&self, on_release: F) -> bool {
        let mut state = self.state.lock();
        let generation = state.generation;
        state.arrived += 1;

        if state.arrived == self.parties {
            on_release();
            state.arrived = 0;
            state.generation = generation.wrapping_add(1);
            self.cvar.notify_all();
            true
        } else {
            while generation == state.generation {
                self.cvar.wait(&mut state);
            }
            false
        }
    }
}
