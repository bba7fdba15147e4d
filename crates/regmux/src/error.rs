// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for regmux operations.
//!
//! The multiplexer core itself signals misuse by failing fast (see the
//! `# Panics` sections on [`crate::ListenerMultiplexer`] methods) and leaves
//! backing-service failures in the service's own `bool` return channel.
//! `Error` therefore only covers the listener dispatch layer, which is the
//! one place a recoverable runtime failure can occur.

/// Errors returned by regmux dispatch operations.
#[derive(Debug)]
pub enum Error {
    /// The dispatch worker has shut down; the operation was dropped.
    DispatchQueueClosed,
    /// The dispatch worker thread could not be spawned.
    ThreadSpawn(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::DispatchQueueClosed => write!(f, "dispatch queue closed"),
            Error::ThreadSpawn(e) => write!(f, "failed to spawn dispatch thread: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ThreadSpawn(e) => Some(e),
            Error::DispatchQueueClosed => None,
        }
    }
}

/// Result type for regmux operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::DispatchQueueClosed.to_string(), "dispatch queue closed");

        let io = std::io::Error::new(std::io::ErrorKind::Other, "no threads left");
        let msg = Error::ThreadSpawn(io).to_string();
        assert!(msg.contains("no threads left"), "unexpected message: {}", msg);
    }

    #[test]
    fn test_error_source() {
        use std::error::Error as _;

        assert!(Error::DispatchQueueClosed.source().is_none());

        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(Error::ThreadSpawn(io).source().is_some());
    }
}
