//! Registry configuration

/// What a consumer does when its queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Drop the oldest message that is not a keyframe, sequence header or
    /// metadata; fall back to the oldest message
    #[default]
    DropOldest,
    /// Close the consumer with [`RegistryError::ConsumerOverflow`](super::RegistryError::ConsumerOverflow)
    Disconnect,
}

/// Configuration for the source registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum queued messages per consumer
    pub consumer_capacity: usize,

    /// Behaviour of a full consumer queue
    pub overflow_policy: OverflowPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            consumer_capacity: 1024,
            overflow_policy: OverflowPolicy::DropOldest,
        }
    }
}

impl RegistryConfig {
    /// Set the per-consumer queue bound (at least 1)
    pub fn consumer_capacity(mut self, capacity: usize) -> Self {
        self.consumer_capacity = capacity.max(1);
        self
    }

    /// Set the overflow policy
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }
}
