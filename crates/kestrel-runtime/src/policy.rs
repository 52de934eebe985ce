/// Decides when running code should pause at a checkpoint.
///
/// Compiled code registers ticks at every scheduler checkpoint and asks
/// whether to yield; answering `true` pauses the call with a `Preempt`
/// payload.
pub trait SchedulingPolicy {
    fn register_ticks(&mut self, ticks: u32);

    fn should_yield(&mut self) -> bool;
}

/// Never pauses at checkpoints.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverYield;

impl SchedulingPolicy for NeverYield {
    fn register_ticks(&mut self, _ticks: u32) {}

    fn should_yield(&mut self) -> bool {
        false
    }
}

/// Pauses once `quantum` ticks have been registered, then starts counting
/// again.
#[derive(Clone, Copy, Debug)]
pub struct TickQuantum {
    quantum: u64,
    used: u64,
}

impl TickQuantum {
    pub fn new(quantum: u64) -> Self {
        Self {
            quantum: quantum.max(1),
            used: 0,
        }
    }

    pub fn used(&self) -> u64 {
        self.used
    }
}

impl SchedulingPolicy for TickQuantum {
    fn register_ticks(&mut self, ticks: u32) {
        self.used = self.used.saturating_add(ticks as u64);
    }

    fn should_yield(&mut self) -> bool {
        if self.used >= self.quantum {
            self.used = 0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantum_resets_after_yielding() {
        let mut policy = TickQuantum::new(3);
        let mut yields = Vec::new();
        for _ in 0..7 {
            policy.register_ticks(1);
            yields.push(policy.should_yield());
        }
        assert_eq!(yields, [false, false, true, false, false, true, false]);
        assert_eq!(policy.used(), 1);
    }
}
