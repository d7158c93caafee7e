//! Shutdown signal handling

#[cfg(unix)]
mod imp {
    use futures::stream::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::{Handle, Signals};
    use std::io;

    /// Stream of termination requests (Ctrl-C, SIGTERM)
    pub struct ShutdownSignal {
        signals: Signals,
        handle: Handle,
    }

    impl ShutdownSignal {
        /// Start listening for termination signals
        pub fn new() -> io::Result<Self> {
            let signals = Signals::new([SIGINT, SIGTERM])?;
            let handle = signals.handle();
            Ok(Self { signals, handle })
        }

        /// Wait for the next signal
        pub async fn recv(&mut self) -> Option<i32> {
            self.signals.next().await
        }
    }

    impl Drop for ShutdownSignal {
        fn drop(&mut self) {
            self.handle.close();
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::io;

    /// Stream of termination requests (Ctrl-C)
    pub struct ShutdownSignal;

    impl ShutdownSignal {
        /// Start listening for termination signals
        pub fn new() -> io::Result<Self> {
            Ok(Self)
        }

        /// Wait for the next signal
        pub async fn recv(&mut self) -> Option<i32> {
            tokio::signal::ctrl_c().await.ok().map(|_| 2)
        }
    }
}

pub use imp::ShutdownSignal;
