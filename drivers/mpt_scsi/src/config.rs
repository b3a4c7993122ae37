//! # Driver Configuration

/// What to do when the IOC-Init reply does not report success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitReplyPolicy {
    /// Accept the reply without looking at it
    Ignore,
    /// Log the mismatch and bring the controller up anyway
    Warn,
    /// Skip the controller
    Reject,
}

/// Configuration for the Fusion-MPT boot driver
#[derive(Debug, Clone)]
pub struct MptConfig {
    /// Back-off between polls that found no reply (microseconds)
    pub poll_delay_us: u32,
    /// Targets scanned per controller, starting at ID 0
    pub max_targets: u8,
    /// Resubmissions allowed after an aliased reply
    pub retry_budget: u8,
    /// Register reads before a command gives up and the controller is
    /// marked for reset; `None` polls forever
    pub poll_timeout: Option<u32>,
    /// IOC-Init reply handling
    pub init_reply_policy: InitReplyPolicy,
}

impl MptConfig {
    /// Default back-off: 50µs
    pub const DEFAULT_POLL_DELAY_US: u32 = 50;
    /// Default scan range: targets 0 to 6
    pub const DEFAULT_MAX_TARGETS: u8 = 7;
    /// Default retry budget: one resubmission
    pub const DEFAULT_RETRY_BUDGET: u8 = 1;
    /// Poll limit used by [`MptConfig::strict`]
    ///
    /// Counts register reads, status and reply-queue alike; only status
    /// reads that find nothing are followed by the back-off.
    pub const STRICT_POLL_TIMEOUT: u32 = 100_000;

    /// Create default configuration
    ///
    /// Polls without a deadline and accepts any IOC-Init reply with a warning.
    pub fn new() -> Self {
        Self {
            poll_delay_us: Self::DEFAULT_POLL_DELAY_US,
            max_targets: Self::DEFAULT_MAX_TARGETS,
            retry_budget: Self::DEFAULT_RETRY_BUDGET,
            poll_timeout: None,
            init_reply_policy: InitReplyPolicy::Warn,
        }
    }

    /// Create a configuration that bounds polling and refuses a failed init
    pub fn strict() -> Self {
        Self {
            poll_timeout: Some(Self::STRICT_POLL_TIMEOUT),
            init_reply_policy: InitReplyPolicy::Reject,
            ..Self::new()
        }
    }

    /// Set the poll limit
    pub fn with_poll_timeout(mut self, polls: u32) -> Self {
        self.poll_timeout = Some(polls);
        self
    }

    /// Set the IOC-Init reply policy
    pub fn with_init_reply_policy(mut self, policy: InitReplyPolicy) -> Self {
        self.init_reply_policy = policy;
        self
    }
}

impl Default for MptConfig {
    fn default() -> Self {
        Self::new()
    }
}
