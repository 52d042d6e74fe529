//! Kernel configuration: a builder in the same style as `aika`'s
//! `HybridConfig`, adapted to the Time Warp kernel's parameters.
use crate::KernelError;

/// Which local-GVT collection algorithm a node runs (§4.G). Both exist
/// because they differ in progress guarantees, not just performance: the
/// asynchronous variant never blocks a worker, while the synchronous
/// variant gives a precise per-cycle cutover at the cost of a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GvtMode {
    /// Atomic flag + counter; workers never block.
    Async,
    /// Two-phase barrier; workers pause between phases.
    Sync,
}

/// Kernel-wide configuration, built incrementally and validated once before
/// the simulation starts.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub num_lps: usize,
    pub num_workers: usize,
    pub max_sim_time: u64,
    pub checkpoint_period: u64,
    pub gvt_period_ms: u64,
    pub gvt_mode: GvtMode,
    pub state_arena_size: usize,
    pub anti_msg_arena_size: usize,
    pub statistics_file: Option<String>,
}

impl KernelConfig {
    /// Create a new configuration for `num_lps` logical processes spread
    /// across `num_workers` worker threads. Every other field must be
    /// supplied explicitly before [`KernelConfig::validate`] will accept it.
    pub fn new(num_lps: usize, num_workers: usize) -> Self {
        Self {
            num_lps,
            num_workers,
            max_sim_time: 0,
            checkpoint_period: 0,
            gvt_period_ms: 0,
            gvt_mode: GvtMode::Async,
            state_arena_size: 0,
            anti_msg_arena_size: 0,
            statistics_file: None,
        }
    }

    /// Configure the simulated time horizon. Corresponds to the host
    /// binary's `--max-sim-time` CLI flag.
    pub fn with_time_bound(mut self, max_sim_time: u64) -> Self {
        self.max_sim_time = max_sim_time;
        self
    }

    /// Configure the state-save period `P` (`--state-period`): save every
    /// `P` processed events per LP, `P = 1` meaning always.
    pub fn with_checkpoint_period(mut self, period: u64) -> Self {
        self.checkpoint_period = period;
        self
    }

    /// Configure the GVT collection cadence (`--gvt-period-ms`) and which
    /// local-collection algorithm to run.
    pub fn with_gvt_cycle(mut self, period_ms: u64, mode: GvtMode) -> Self {
        self.gvt_period_ms = period_ms;
        self.gvt_mode = mode;
        self
    }

    /// Configure the per-LP checkpoint/anti-message-log pre-allocation
    /// hints used by the state manager and output manager respectively
    /// (`Vec::with_capacity`, not a hard cap -- see `DESIGN.md` for why
    /// these aren't backed by `mesocarp::logging::journal::Journal` the way
    /// the teacher's own per-agent logs are).
    pub fn with_arenas(mut self, state_arena_size: usize, anti_msg_arena_size: usize) -> Self {
        self.state_arena_size = state_arena_size;
        self.anti_msg_arena_size = anti_msg_arena_size;
        self
    }

    /// Configure the statistics output path (`--statistics-file`).
    pub fn with_statistics_file(mut self, path: impl Into<String>) -> Self {
        self.statistics_file = Some(path.into());
        self
    }

    /// Validate that all required fields have been configured.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.num_lps == 0 {
            return Err(KernelError::ConfigError("num_lps must be positive".to_string()));
        }
        if self.num_workers == 0 {
            return Err(KernelError::ConfigError("num_workers must be positive".to_string()));
        }
        if self.max_sim_time == 0 {
            return Err(KernelError::ConfigError("max_sim_time must be positive".to_string()));
        }
        if self.checkpoint_period == 0 {
            return Err(KernelError::ConfigError(
                "checkpoint_period must be set (1 means always-save)".to_string(),
            ));
        }
        if self.gvt_period_ms == 0 {
            return Err(KernelError::ConfigError("gvt_period_ms must be set".to_string()));
        }
        if self.state_arena_size == 0 {
            return Err(KernelError::ConfigError("state_arena_size must be set".to_string()));
        }
        if self.anti_msg_arena_size == 0 {
            return Err(KernelError::ConfigError("anti_msg_arena_size must be set".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unconfigured_defaults() {
        let cfg = KernelConfig::new(4, 2);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_fully_configured() {
        let cfg = KernelConfig::new(4, 2)
            .with_time_bound(1_000)
            .with_checkpoint_period(1)
            .with_gvt_cycle(50, GvtMode::Async)
            .with_arenas(1 << 16, 1 << 12)
            .with_statistics_file("stats.json");
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.gvt_mode, GvtMode::Async);
    }
}
