use std::time::Duration;

use resp_proto::ParseOptions;

use crate::error::Error;

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Minimum free space reserved in the receive buffer before each read.
    pub read_buffer_size: usize,
    /// Capacity of the queue between callers and the writer task, in
    /// outbound frames (a batch counts as one).
    pub channel_capacity: usize,
    /// Maximum outbound frames coalesced into one vectored write.
    pub max_batch_frames: usize,
    /// Framing limits applied to every reply.
    pub scan: ParseOptions,
    /// Completion slots kept for reuse once both operation handles drop.
    pub operation_pool_size: usize,
    /// Timeout applied by [`Transport::send`](crate::Transport::send) when the
    /// caller supplies no cancellation token.
    pub default_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 16 * 1024,
            channel_capacity: 1024,
            max_batch_frames: 64,
            scan: ParseOptions::default(),
            operation_pool_size: 256,
            default_timeout: None,
        }
    }
}

impl TransportConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), Error> {
        if self.read_buffer_size == 0 {
            return Err(Error::InvalidConfig("read_buffer_size must be > 0".into()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::InvalidConfig("channel_capacity must be > 0".into()));
        }
        if self.max_batch_frames == 0 {
            return Err(Error::InvalidConfig("max_batch_frames must be > 0".into()));
        }
        if self.scan.max_depth == 0 {
            return Err(Error::InvalidConfig("scan.max_depth must be > 0".into()));
        }
        if self.default_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidConfig(
                "default_timeout must be non-zero when set".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(TransportConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_sizes() {
        let config = TransportConfig {
            channel_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = TransportConfig {
            max_batch_frames: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = TransportConfig {
            default_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
