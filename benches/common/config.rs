use std::env;
use std::str::FromStr;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

/// Sizes for the benchmark runs. Override with `BENCH_NUM_KEYS` and
/// `BENCH_SAMPLE_SIZE`.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Number of distinct articles written into the cache.
    pub num_keys: usize,
    pub sample_size: usize,
}

impl BenchConfig {
    pub fn new() -> Self {
        let config = Self {
            num_keys: env_or("BENCH_NUM_KEYS", 10_000),
            sample_size: env_or("BENCH_SAMPLE_SIZE", 100),
        };
        eprintln!(
            "Benchmarking with {} articles, sample size {}",
            config.num_keys, config.sample_size
        );
        config
    }
}
