//! Centralized timing and sizing defaults
//!
//! All values can be overridden through `RelayConfig`.

use std::time::Duration;

/// Defaults for the loopback transport variant
pub mod loopback {
    use super::*;

    /// Fixed debug port BlastEm listens on when started with `-D` on Windows
    pub const DEBUG_PORT: u16 = 1234;

    /// Connection attempts before giving up on the backend debug port
    pub const CONNECT_ATTEMPTS: u32 = 20;

    /// Delay between two connection attempts (250 milliseconds)
    pub const RETRY_DELAY_MS: u64 = 250;

    /// Get retry delay as Duration
    pub fn retry_delay() -> Duration {
        Duration::from_millis(RETRY_DELAY_MS)
    }
}

/// Defaults for the byte relay
pub mod relay {
    use super::*;

    /// Largest chunk read from one side before it is written to the other (16 KiB)
    pub const BUFFER_SIZE: usize = 16 * 1024;

    /// How long a closed backend stream waits for the process to be reaped (200 milliseconds)
    pub const EXIT_GRACE_MS: u64 = 200;

    /// Get exit grace as Duration
    pub fn exit_grace() -> Duration {
        Duration::from_millis(EXIT_GRACE_MS)
    }

    /// How long backend output is still delivered after the process exits (2 seconds)
    pub const DRAIN_MS: u64 = 2000;

    /// Get drain timeout as Duration
    pub fn drain() -> Duration {
        Duration::from_millis(DRAIN_MS)
    }
}

/// Defaults for port listeners
pub mod listener {
    use super::*;

    /// Pause after a failed accept before trying again (100 milliseconds)
    pub const ACCEPT_RETRY_MS: u64 = 100;

    /// Get accept retry pause as Duration
    pub fn accept_retry() -> Duration {
        Duration::from_millis(ACCEPT_RETRY_MS)
    }
}

/// Defaults for the event bus
pub mod events {
    /// Events buffered per subscriber before slow subscribers lag
    pub const BUS_CAPACITY: usize = 256;
}
