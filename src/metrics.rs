//! Counters for the things worth watching in a long-lived graph: rollup
//! cache effectiveness, how often a query falls back to a full index scan
//! vs. a covered one, and how much work the reactive layer is doing per
//! mutation.

#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub rollup_cache_hits: u64,
    pub rollup_cache_misses: u64,
    pub index_scans: u64,
    pub index_scan_misses: u64,
    pub rollup_cascades: u64,
    pub view_dispatches: u64,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rollup_cache_hit_rate(&self) -> f64 {
        let total = self.rollup_cache_hits + self.rollup_cache_misses;
        if total == 0 {
            0.0
        } else {
            self.rollup_cache_hits as f64 / total as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn print_report(&self) {
        println!("\n=== Performance Metrics ===");
        println!("Rollup Cache Hits:     {}", self.rollup_cache_hits);
        println!("Rollup Cache Misses:   {}", self.rollup_cache_misses);
        println!(
            "Rollup Cache Hit Rate: {:.2}%",
            self.rollup_cache_hit_rate() * 100.0
        );
        println!("Index Scans:           {}", self.index_scans);
        println!("Index Scan Misses:     {}", self.index_scan_misses);
        println!("Rollup Cascades:       {}", self.rollup_cascades);
        println!("View Dispatches:       {}", self.view_dispatches);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_is_zero_with_no_samples() {
        let m = PerformanceMetrics::new();
        assert_eq!(m.rollup_cache_hit_rate(), 0.0);
    }

    #[test]
    fn hit_rate_reflects_recorded_hits_and_misses() {
        let mut m = PerformanceMetrics::new();
        m.rollup_cache_hits = 3;
        m.rollup_cache_misses = 1;
        assert_eq!(m.rollup_cache_hit_rate(), 0.75);
        m.reset();
        assert_eq!(m.rollup_cache_hit_rate(), 0.0);
    }
}
