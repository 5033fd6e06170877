//! Paging statistics.

use core::fmt;

use crate::address_space::PageSource;

/// Counters kept by the virtual memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Statistics {
    /// Translations served by the translation cache.
    pub tlb_hits: u64,
    /// Translations that had to go through the fault handler.
    pub tlb_misses: u64,
    /// Pages brought into a frame.
    pub page_loads: u64,
    /// Page loads satisfied from a swap file.
    pub swap_ins: u64,
    /// Page loads filled from the executable image (or zero-filled).
    pub image_loads: u64,
    /// Frames taken away from their owner.
    pub evictions: u64,
    /// Pages written to a swap file.
    pub swap_outs: u64,
    /// Evictions that skipped the swap write because the page was clean.
    pub clean_evictions: u64,
}

impl Statistics {
    /// Fraction of translations served by the cache, between 0 and 1.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.tlb_hits + self.tlb_misses;
        if total == 0 {
            return 0.0;
        }
        self.tlb_hits as f64 / total as f64
    }

    pub(crate) fn record_load(&mut self, source: PageSource) {
        self.page_loads += 1;
        match source {
            PageSource::Swap => self.swap_ins += 1,
            PageSource::Image { .. } => self.image_loads += 1,
        }
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Translation cache: {} hits, {} misses ({:.2}% hit ratio)",
            self.tlb_hits,
            self.tlb_misses,
            self.hit_ratio() * 100.0
        )?;
        writeln!(
            f,
            "Paging: {} loads ({} from swap, {} from image), {} evictions",
            self.page_loads, self.swap_ins, self.image_loads, self.evictions
        )?;
        write!(
            f,
            "Swap: {} pages written, {} clean evictions skipped",
            self.swap_outs, self.clean_evictions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_ratio_of_idle_cache_is_zero() {
        assert_eq!(Statistics::default().hit_ratio(), 0.0);
    }

    #[test]
    fn display_reports_counters() {
        let stats = Statistics {
            tlb_hits: 3,
            tlb_misses: 1,
            swap_outs: 2,
            ..Statistics::default()
        };
        let text = stats.to_string();
        assert!(text.contains("3 hits, 1 misses (75.00% hit ratio)"));
        assert!(text.contains("2 pages written"));
    }
}
