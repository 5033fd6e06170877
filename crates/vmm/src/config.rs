//! Boot-time configuration of the virtual memory subsystem.
//!
//! The configuration is fixed when the [`VirtualMemoryManager`](crate::VirtualMemoryManager)
//! is created and never changes afterwards.

use core::{fmt, str::FromStr};

use thiserror::Error;

/// Page replacement policy used when the frame table runs out of free frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Evict frames in the order of a cursor that advances on every eviction.
    #[default]
    Fifo,
    /// Second chance: referenced frames get their bit cleared and are skipped once.
    Clock,
    /// Uniformly random choice among allocated frames.
    Random,
}

impl EvictionPolicy {
    /// Returns the lowercase name of the policy.
    pub const fn name(self) -> &'static str {
        match self {
            EvictionPolicy::Fifo => "fifo",
            EvictionPolicy::Clock => "clock",
            EvictionPolicy::Random => "random",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown policy name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expected one of: fifo, clock, random")]
pub struct UnknownPolicy;

impl FromStr for EvictionPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fifo" | "FIFO" => Ok(EvictionPolicy::Fifo),
            "clock" | "CLOCK" | "second-chance" => Ok(EvictionPolicy::Clock),
            "random" | "RANDOM" => Ok(EvictionPolicy::Random),
            _ => Err(UnknownPolicy),
        }
    }
}

/// Configuration of the virtual memory subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Number of physical frames in main memory.
    pub num_frames: usize,
    /// Victim selection policy for the frame table.
    pub eviction_policy: EvictionPolicy,
    /// Load pages on first access instead of populating the whole address space up front.
    pub demand_loading: bool,
    /// Number of slots in the translation cache.
    pub tlb_capacity: usize,
    /// Skip the swap write for pages that are unmodified and already have a swap image.
    pub skip_clean_writeback: bool,
    /// Seed for the random replacement policy.
    pub random_seed: u64,
}

impl VmConfig {
    /// Returns a copy of this configuration using the given policy.
    pub const fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Returns a copy of this configuration with the given number of frames.
    pub const fn with_frames(mut self, num_frames: usize) -> Self {
        self.num_frames = num_frames;
        self
    }

    /// Returns a copy of this configuration with demand loading switched on or off.
    pub const fn with_demand_loading(mut self, demand_loading: bool) -> Self {
        self.demand_loading = demand_loading;
        self
    }

    /// Returns a copy of this configuration with the given translation cache capacity.
    pub const fn with_tlb_capacity(mut self, tlb_capacity: usize) -> Self {
        self.tlb_capacity = tlb_capacity;
        self
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            num_frames: 32,
            eviction_policy: EvictionPolicy::Fifo,
            demand_loading: true,
            tlb_capacity: 4,
            skip_clean_writeback: false,
            random_seed: 0x5EED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_policy_names() {
        assert_eq!("fifo".parse(), Ok(EvictionPolicy::Fifo));
        assert_eq!("second-chance".parse(), Ok(EvictionPolicy::Clock));
        assert_eq!("RANDOM".parse(), Ok(EvictionPolicy::Random));
        assert_eq!("lru".parse::<EvictionPolicy>(), Err(UnknownPolicy));
    }

    #[test]
    fn builders_override_defaults() {
        let config = VmConfig::default()
            .with_frames(4)
            .with_policy(EvictionPolicy::Clock)
            .with_tlb_capacity(2)
            .with_demand_loading(false);
        assert_eq!(config.num_frames, 4);
        assert_eq!(config.eviction_policy, EvictionPolicy::Clock);
        assert_eq!(config.tlb_capacity, 2);
        assert!(!config.demand_loading);
        assert!(!config.skip_clean_writeback);
    }
}
