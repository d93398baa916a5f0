//! Tunable protocol parameters.

use std::time::Duration;

use thiserror::Error;

/// Default receive buffer capacity, which is also the initial advertised window.
pub const DEFAULT_RECV_BUFFER_LEN: usize = 8192;

/// Default maximum payload carried by one data segment.
pub const DEFAULT_MSS: usize = 1400;

/// A [`Config`] that cannot drive a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A size, timeout or attempt budget is zero.
    #[error("invalid config: `{0}` must be non-zero")]
    Zero(&'static str),
}

/// Per-connection configuration.
///
/// `Config::default()` suits loopback and LAN use; tests shrink the timeouts
/// and buffers to provoke segmentation and retransmission quickly.
#[derive(Debug, Clone)]
pub struct Config {
    /// Receive buffer capacity in bytes.  The advertised window never exceeds
    /// it (nor `u16::MAX`).
    pub recv_buffer_len: usize,
    /// Maximum payload bytes per data segment.
    pub mss: usize,
    /// Fixed retransmission timeout for data and FIN segments.
    pub ack_timeout: Duration,
    /// How long `connect` / `accept` wait for each handshake reply.
    pub handshake_timeout: Duration,
    /// SYN or SYN+ACK transmissions before the handshake is abandoned.
    pub max_handshake_attempts: u32,
    /// Consecutive timeouts without peer progress tolerated while sending
    /// or closing.
    pub max_retransmissions: u32,
    /// Longest a `recv` or `accept` waits without any traffic; `None` waits
    /// forever.
    pub idle_timeout: Option<Duration>,
    /// Linger after the final teardown ACK, answering retransmitted FINs.
    pub time_wait: Duration,
    /// Fixed seed for the initial-sequence-number generator.
    pub isn_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let ack_timeout = Duration::from_millis(200);
        Self {
            recv_buffer_len: DEFAULT_RECV_BUFFER_LEN,
            mss: DEFAULT_MSS,
            ack_timeout,
            handshake_timeout: Duration::from_millis(500),
            max_handshake_attempts: 6,
            max_retransmissions: 25,
            idle_timeout: Some(Duration::from_secs(30)),
            time_wait: ack_timeout * 2,
            isn_seed: None,
        }
    }
}

impl Config {
    /// Window advertised by an empty receive buffer.
    pub fn initial_window(&self) -> u16 {
        self.recv_buffer_len.min(u16::MAX as usize) as u16
    }

    /// Reject zero sizes, timeouts and handshake attempt budgets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recv_buffer_len == 0 {
            return Err(ConfigError::Zero("recv_buffer_len"));
        }
        if self.mss == 0 {
            return Err(ConfigError::Zero("mss"));
        }
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::Zero("ack_timeout"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::Zero("handshake_timeout"));
        }
        if self.max_handshake_attempts == 0 {
            return Err(ConfigError::Zero("max_handshake_attempts"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
        assert_eq!(Config::default().initial_window(), 8192);
    }

    #[test]
    fn zero_window_is_rejected() {
        let config = Config {
            recv_buffer_len: 0,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("recv_buffer_len")));
    }

    #[test]
    fn zero_mss_is_rejected() {
        let config = Config {
            mss: 0,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("mss")));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let config = Config {
            ack_timeout: Duration::ZERO,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("ack_timeout")));

        let config = Config {
            max_handshake_attempts: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_buffer_caps_the_window() {
        let config = Config {
            recv_buffer_len: 1 << 20,
            ..Config::default()
        };
        assert_eq!(config.initial_window(), u16::MAX);
    }
}
