use serde::{Deserialize, Serialize};

/// Selector for the pivot oracle used by parallel scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyDistributionKind {
    Simple,
    #[default]
    Uniform,
}

/// Engine configuration.
///
/// All knobs that change scheduling, partitioning or storage behavior are
/// gathered here; one instance is shared by every request of a database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Run the statement scheduler single threaded in FIFO order.
    pub single_thread: bool,
    /// Number of workers of the parallel scheduler.
    pub thread_pool_size: usize,
    /// Pin each worker to a core.
    pub core_affinity: bool,
    /// First core used when `core_affinity` is set.
    pub initial_core: usize,
    /// Spread pinned workers uniformly over NUMA nodes.
    pub assign_numa_nodes_uniformly: bool,
    /// Let idle workers pull tasks from the shared queue.
    pub work_sharing: bool,
    /// Let idle workers steal from other workers' queues.
    pub stealing_enabled: bool,
    /// Default number of exchange partitions.
    pub default_partitions: usize,
    /// Default fanout cap for parallel scans.
    pub scan_default_parallel: usize,
    /// Pivot oracle used to split scan ranges.
    pub key_distribution: KeyDistributionKind,
    /// Mint surrogate storage keys when indexes are created.
    pub enable_storage_key: bool,
    /// Create the benchmark table set on startup.
    pub prepare_benchmark_tables: bool,
    /// Create the test table set on startup.
    pub prepare_test_tables: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            single_thread: false,
            thread_pool_size: 5,
            core_affinity: false,
            initial_core: 1,
            assign_numa_nodes_uniformly: false,
            work_sharing: true,
            stealing_enabled: true,
            default_partitions: 5,
            scan_default_parallel: 4,
            key_distribution: KeyDistributionKind::Uniform,
            enable_storage_key: true,
            prepare_benchmark_tables: false,
            prepare_test_tables: false,
        }
    }
}
