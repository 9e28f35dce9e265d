use std::time::Duration;

/// Buffer pool sizing and sharding parameters.
///
/// A pool may be one of `num_instances` shards; instance `i` allocates
/// page ids congruent to `i` modulo `num_instances`.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    pub pool_size: usize,
    pub num_instances: u32,
    pub instance_index: u32,
}

impl BufferPoolConfig {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            num_instances: 1,
            instance_index: 0,
        }
    }

    pub fn sharded(pool_size: usize, num_instances: u32, instance_index: u32) -> Self {
        assert!(num_instances > 0, "a pool has at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index must fall inside the pool"
        );
        Self {
            pool_size,
            num_instances,
            instance_index,
        }
    }
}

/// Engine-wide configuration with the conventional defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub buffer_pool: BufferPoolConfig,
    pub leaf_max_size: u32,
    pub internal_max_size: u32,
    pub cycle_detection_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_pool: BufferPoolConfig::new(64),
            leaf_max_size: 32,
            internal_max_size: 32,
            cycle_detection_interval: Duration::from_millis(50),
        }
    }
}
