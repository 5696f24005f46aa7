//! Kernel configuration.

use kcore::{KernelError, KernelResult};

/// Static sizing of a kernel instance.
///
/// Built through [`KernelConfigBuilder`]; validation happens in
/// [`KernelConfigBuilder::build`] so a constructed config is always usable.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KernelConfig {
    /// Thread priority levels; lower index = higher priority. The worst
    /// level is reserved for the idle thread.
    pub priority_levels: usize,
    /// Upper bound on live thread descriptors.
    pub max_threads: usize,
    /// Stack size used when a thread is created without an explicit one.
    pub default_stack_size: usize,
    /// Resource ids issuable to threads, semaphores, queues and alarms.
    pub id_capacity: usize,
}

impl KernelConfig {
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }

    /// Worst (numerically largest) priority level; the idle thread's.
    pub fn worst_priority(&self) -> usize {
        self.priority_levels - 1
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            priority_levels: 64,
            max_threads: 64,
            default_stack_size: 4096,
            id_capacity: 1024,
        }
    }
}

#[derive(Debug, Default)]
pub struct KernelConfigBuilder {
    priority_levels: Option<usize>,
    max_threads: Option<usize>,
    default_stack_size: Option<usize>,
    id_capacity: Option<usize>,
}

impl KernelConfigBuilder {
    pub fn priority_levels(mut self, levels: usize) -> Self {
        self.priority_levels = Some(levels);
        self
    }

    pub fn max_threads(mut self, max: usize) -> Self {
        self.max_threads = Some(max);
        self
    }

    pub fn default_stack_size(mut self, bytes: usize) -> Self {
        self.default_stack_size = Some(bytes);
        self
    }

    pub fn id_capacity(mut self, capacity: usize) -> Self {
        self.id_capacity = Some(capacity);
        self
    }

    /// Validates and produces the config.
    ///
    /// At least two priority levels are required (one real level plus the
    /// idle level), and the id pool must be able to cover every thread.
    pub fn build(self) -> KernelResult<KernelConfig> {
        let defaults = KernelConfig::default();
        let config = KernelConfig {
            priority_levels: self.priority_levels.unwrap_or(defaults.priority_levels),
            max_threads: self.max_threads.unwrap_or(defaults.max_threads),
            default_stack_size: self
                .default_stack_size
                .unwrap_or(defaults.default_stack_size),
            id_capacity: self.id_capacity.unwrap_or(defaults.id_capacity),
        };

        if config.priority_levels < 2 {
            log::error!("config rejected: {} priority levels", config.priority_levels);
            return Err(KernelError::InvalidArgument);
        }
        if config.max_threads == 0 || config.default_stack_size == 0 {
            return Err(KernelError::InvalidArgument);
        }
        if config.id_capacity <= config.max_threads {
            // Every thread takes an id; leave room for queues and alarms.
            return Err(KernelError::InvalidArgument);
        }
        Ok(config)
    }
}
