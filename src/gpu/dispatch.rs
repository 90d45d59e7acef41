/// Threadgroup dispatch geometry tuning
///
/// The fastest workgroup shape for a kernel depends on the GPU, the kernel
/// and the access pattern, so it is measured instead of guessed. On the
/// first request for a pipeline key the optimizer benchmarks every
/// candidate geometry through a caller-supplied closure, keeps the one with
/// the lowest kernel time and caches it until `invalidate_all`.
///
/// Candidate order is part of the contract: on identical timings the
/// candidate generated first wins.

use std::collections::HashMap;

use super::timing::CommandBufferTimings;

/// Hardware limits relevant to workgroup shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadgroupPipelineLimits {
    /// SIMD width threads are scheduled in
    pub thread_execution_width: u32,
    /// Upper bound on `width * height`
    pub max_total_threads_per_threadgroup: u32,
    /// Per-axis workgroup size limits
    pub max_width: u32,
    pub max_height: u32,
}

impl ThreadgroupPipelineLimits {
    /// Limits with no per-axis restriction beyond the total
    pub fn new(thread_execution_width: u32, max_total_threads_per_threadgroup: u32) -> Self {
        Self {
            thread_execution_width,
            max_total_threads_per_threadgroup,
            max_width: max_total_threads_per_threadgroup,
            max_height: max_total_threads_per_threadgroup,
        }
    }

    pub fn with_axis_limits(mut self, max_width: u32, max_height: u32) -> Self {
        self.max_width = max_width;
        self.max_height = max_height;
        self
    }

    fn is_valid(&self) -> bool {
        self.thread_execution_width > 0
            && self.max_total_threads_per_threadgroup > 0
            && self.max_width > 0
            && self.max_height > 0
    }
}

/// 2D workgroup size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadgroupDispatchConfiguration {
    pub width: u32,
    pub height: u32,
}

impl ThreadgroupDispatchConfiguration {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn thread_count(&self) -> u32 {
        self.width * self.height
    }

    /// One SIMD group wide, as tall as the thread limit allows
    pub fn default_for(limits: &ThreadgroupPipelineLimits) -> Self {
        let seed = Self::new(
            limits.thread_execution_width,
            limits.max_total_threads_per_threadgroup / limits.thread_execution_width.max(1),
        );
        Self::clamped(seed, limits).unwrap_or(Self::new(1, 1))
    }

    /// Shrink an arbitrary geometry until it fits `limits`.
    ///
    /// Width is clamped first and aligned down to the execution width when
    /// it spans at least one SIMD group; height then takes what the thread
    /// budget leaves. Returns `None` only for invalid limits.
    pub fn clamped(configuration: Self, limits: &ThreadgroupPipelineLimits) -> Option<Self> {
        if !limits.is_valid() {
            return None;
        }

        let simd = limits.thread_execution_width;
        let mut width = configuration
            .width
            .max(1)
            .min(limits.max_total_threads_per_threadgroup)
            .min(limits.max_width);
        if width >= simd {
            width -= width % simd;
        }

        let height = configuration
            .height
            .min(limits.max_total_threads_per_threadgroup / width)
            .min(limits.max_height)
            .max(1);

        Some(Self::new(width, height))
    }

    /// Deterministic, de-duplicated candidate list, default first
    pub fn candidates(limits: &ThreadgroupPipelineLimits) -> Vec<Self> {
        let simd = limits.thread_execution_width.max(1);
        let total = limits.max_total_threads_per_threadgroup;
        let half = (simd / 2).max(1);
        let double = simd * 2;

        let seeds = [
            Self::default_for(limits),
            Self::new(simd, 1),
            Self::new(simd, 2),
            Self::new(simd, 4),
            Self::new(half, total / half),
            Self::new(double, total / double),
            Self::new(8, 8),
            Self::new(16, 16),
            Self::new(32, 32),
            Self::new(16, 8),
            Self::new(8, 16),
        ];

        let mut candidates: Vec<Self> = Vec::with_capacity(seeds.len());
        for seed in seeds {
            if let Some(candidate) = Self::clamped(seed, limits) {
                if !candidates.contains(&candidate) {
                    candidates.push(candidate);
                }
            }
        }
        candidates
    }

    /// Workgroup counts covering a `width` x `height` output
    pub fn workgroup_count(&self, width: u32, height: u32) -> (u32, u32) {
        (width.div_ceil(self.width), height.div_ceil(self.height))
    }
}

impl std::fmt::Display for ThreadgroupDispatchConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Benchmark-then-cache selection of dispatch geometry per pipeline key
#[derive(Debug, Default)]
pub struct ThreadgroupDispatchOptimizer {
    cache: HashMap<String, ThreadgroupDispatchConfiguration>,
}

impl ThreadgroupDispatchOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fastest geometry for `key`, benchmarking every candidate on first use.
    ///
    /// `benchmark` runs one real dispatch with the given geometry and
    /// returns its timings, or `None` if the dispatch failed. Failed
    /// candidates are skipped; if all fail the default geometry is returned
    /// and nothing is cached, so the next call tries again.
    pub fn configuration<F>(
        &mut self,
        key: &str,
        limits: &ThreadgroupPipelineLimits,
        label: &str,
        width: u32,
        height: u32,
        mut benchmark: F,
    ) -> ThreadgroupDispatchConfiguration
    where
        F: FnMut(ThreadgroupDispatchConfiguration) -> Option<CommandBufferTimings>,
    {
        if let Some(cached) = self.cache.get(key) {
            return *cached;
        }

        let candidates = ThreadgroupDispatchConfiguration::candidates(limits);
        log::info!(
            "⏱️  Tuning {} for {}x{}: {} candidate geometries",
            label,
            width,
            height,
            candidates.len()
        );

        let mut best: Option<(ThreadgroupDispatchConfiguration, CommandBufferTimings)> = None;
        for candidate in candidates {
            match benchmark(candidate) {
                Some(timings) => {
                    log::debug!("   {} → kernel {:?}", candidate, timings.kernel_time);
                    let faster = best
                        .map(|(_, fastest)| timings.kernel_time < fastest.kernel_time)
                        .unwrap_or(true);
                    if faster {
                        best = Some((candidate, timings));
                    }
                }
                None => log::warn!("⚠️  {} candidate {} failed", label, candidate),
            }
        }

        match best {
            Some((selected, timings)) => {
                log::info!("✅ {} uses {} ({:?} per dispatch)", label, selected, timings.kernel_time);
                self.cache.insert(key.to_string(), selected);
                selected
            }
            None => {
                let fallback = ThreadgroupDispatchConfiguration::default_for(limits);
                log::warn!("⚠️  Every {} candidate failed, falling back to {}", label, fallback);
                fallback
            }
        }
    }

    /// Cached selection for `key`, if any
    pub fn cached(&self, key: &str) -> Option<ThreadgroupDispatchConfiguration> {
        self.cache.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drop every cached selection
    pub fn invalidate_all(&mut self) {
        if !self.cache.is_empty() {
            log::info!("🗑️  Invalidated {} dispatch selections", self.cache.len());
        }
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn timings(micros: u64) -> CommandBufferTimings {
        let time = Duration::from_micros(micros);
        CommandBufferTimings {
            kernel_time: time,
            gpu_time: time,
            cpu_time: Duration::ZERO,
        }
    }

    #[test]
    fn test_default_geometry() {
        let limits = ThreadgroupPipelineLimits::new(32, 1024);
        let default = ThreadgroupDispatchConfiguration::default_for(&limits);
        assert_eq!(default, ThreadgroupDispatchConfiguration::new(32, 32));
        assert_eq!(default.thread_count(), 1024);
    }

    #[test]
    fn test_candidates_respect_limits() {
        for (simd, total) in [(32, 1024), (32, 256), (64, 256), (16, 64), (8, 512), (1, 1), (48, 1000)] {
            let limits = ThreadgroupPipelineLimits::new(simd, total);
            let candidates = ThreadgroupDispatchConfiguration::candidates(&limits);

            assert!(!candidates.is_empty());
            assert_eq!(candidates[0], ThreadgroupDispatchConfiguration::default_for(&limits));
            for (i, candidate) in candidates.iter().enumerate() {
                assert!(candidate.thread_count() <= total, "{} over {}", candidate, total);
                assert!(candidate.width > 0 && candidate.height > 0);
                assert!(!candidates[i + 1..].contains(candidate), "duplicate {}", candidate);
            }
        }
    }

    #[test]
    fn test_axis_limits_are_honoured() {
        let limits = ThreadgroupPipelineLimits::new(32, 256).with_axis_limits(256, 4);
        for candidate in ThreadgroupDispatchConfiguration::candidates(&limits) {
            assert!(candidate.height <= 4);
            assert!(candidate.thread_count() <= 256);
        }
    }

    #[test]
    fn test_clamp_oversized_geometry() {
        let limits = ThreadgroupPipelineLimits::new(16, 64);
        let clamped = ThreadgroupDispatchConfiguration::clamped(
            ThreadgroupDispatchConfiguration::new(512, 512),
            &limits,
        );
        assert_eq!(clamped, Some(ThreadgroupDispatchConfiguration::new(64, 1)));

        let narrow = ThreadgroupDispatchConfiguration::clamped(
            ThreadgroupDispatchConfiguration::new(40, 40),
            &limits,
        );
        assert_eq!(narrow, Some(ThreadgroupDispatchConfiguration::new(32, 2)));

        let invalid = ThreadgroupPipelineLimits::new(0, 64);
        assert_eq!(
            ThreadgroupDispatchConfiguration::clamped(ThreadgroupDispatchConfiguration::new(8, 8), &invalid),
            None
        );
    }

    #[test]
    fn test_workgroup_count_rounds_up() {
        let geometry = ThreadgroupDispatchConfiguration::new(16, 8);
        assert_eq!(geometry.workgroup_count(100, 17), (7, 3));
    }

    #[test]
    fn test_selects_smallest_thread_count_and_caches() {
        let limits = ThreadgroupPipelineLimits::new(32, 1024);
        let candidates = ThreadgroupDispatchConfiguration::candidates(&limits);
        let smallest = candidates.iter().map(|c| c.thread_count()).min().unwrap();

        let mut optimizer = ThreadgroupDispatchOptimizer::new();
        let mut calls = 0;
        let selected = optimizer.configuration("ray_march", &limits, "ray march", 256, 256, |c| {
            calls += 1;
            Some(timings(c.thread_count() as u64))
        });
        assert_eq!(selected.thread_count(), smallest);
        assert_eq!(calls, candidates.len());

        let mut repeat_calls = 0;
        let repeated = optimizer.configuration("ray_march", &limits, "ray march", 256, 256, |c| {
            repeat_calls += 1;
            Some(timings(c.thread_count() as u64))
        });
        assert_eq!(repeated, selected);
        assert_eq!(repeat_calls, 0);
        assert_eq!(optimizer.cached("ray_march"), Some(selected));

        optimizer.invalidate_all();
        assert!(optimizer.is_empty());
        let mut after_invalidate = 0;
        optimizer.configuration("ray_march", &limits, "ray march", 256, 256, |c| {
            after_invalidate += 1;
            Some(timings(c.thread_count() as u64))
        });
        assert!(after_invalidate >= 1);
    }

    #[test]
    fn test_first_candidate_wins_ties() {
        let limits = ThreadgroupPipelineLimits::new(32, 256);
        let mut optimizer = ThreadgroupDispatchOptimizer::new();
        let selected = optimizer.configuration("tie", &limits, "tie", 64, 64, |_| Some(timings(10)));
        assert_eq!(selected, ThreadgroupDispatchConfiguration::candidates(&limits)[0]);
    }

    #[test]
    fn test_failed_candidates_are_skipped() {
        let limits = ThreadgroupPipelineLimits::new(32, 256);
        let candidates = ThreadgroupDispatchConfiguration::candidates(&limits);
        let survivor = candidates[3];

        let mut optimizer = ThreadgroupDispatchOptimizer::new();
        let selected = optimizer.configuration("partial", &limits, "partial", 64, 64, |c| {
            (c == survivor).then(|| timings(50))
        });
        assert_eq!(selected, survivor);
    }

    #[test]
    fn test_all_failures_fall_back_without_caching() {
        let limits = ThreadgroupPipelineLimits::new(32, 256);
        let mut optimizer = ThreadgroupDispatchOptimizer::new();
        let selected = optimizer.configuration("broken", &limits, "broken", 64, 64, |_| None);
        assert_eq!(selected, ThreadgroupDispatchConfiguration::default_for(&limits));
        assert_eq!(optimizer.cached("broken"), None);

        let mut calls = 0;
        optimizer.configuration("broken", &limits, "broken", 64, 64, |_| {
            calls += 1;
            None
        });
        assert!(calls > 0);
    }
}
