//! Timestep predicates deciding when the balancer runs.

/// Decides whether an operation runs at a given timestep.
///
/// Must be deterministic in `timestep`: every process evaluates it
/// independently and all must agree.
pub trait Trigger: Send {
    /// Whether to fire at `timestep`.
    fn compute(&self, timestep: u64) -> bool;
}

impl<F> Trigger for F
where
    F: Fn(u64) -> bool + Send,
{
    fn compute(&self, timestep: u64) -> bool {
        self(timestep)
    }
}

/// Fires every `period` steps, offset by `phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Periodic {
    /// Steps between firings (0 never fires)
    pub period: u64,
    /// First firing step
    pub phase: u64,
}

impl Periodic {
    /// Every `period` steps starting at 0.
    pub fn new(period: u64) -> Self {
        Self { period, phase: 0 }
    }

    /// Every `period` steps starting at `phase`.
    pub fn with_phase(period: u64, phase: u64) -> Self {
        Self { period, phase }
    }
}

impl Trigger for Periodic {
    fn compute(&self, timestep: u64) -> bool {
        self.period != 0 && timestep >= self.phase && (timestep - self.phase) % self.period == 0
    }
}

/// Fires only at the given step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct On(pub u64);

impl Trigger for On {
    fn compute(&self, timestep: u64) -> bool {
        timestep == self.0
    }
}

/// Fires at every step strictly after the given one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct After(pub u64);

impl Trigger for After {
    fn compute(&self, timestep: u64) -> bool {
        timestep > self.0
    }
}

/// Fires at every step strictly before the given one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Before(pub u64);

impl Trigger for Before {
    fn compute(&self, timestep: u64) -> bool {
        timestep < self.0
    }
}
