//! Bounded retry for the initial window-size handshake
//!
//! Right after the child opens the slave side for the first time,
//! `TIOCSWINSZ` on the master can fail with `ENOTTY` until that open has
//! completed. The handshake retries on exactly that error and gives up on
//! anything else.

use std::thread;
use std::time::Duration;

use nix::errno::Errno;

/// Result of a [`ResizeRetry::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The call succeeded on attempt number `attempts`
    Applied { attempts: u32 },
    /// Every attempt failed with `ENOTTY`
    Exhausted { attempts: u32, last_error: Errno },
    /// An attempt failed with a non-retryable error
    Failed { attempts: u32, error: Errno },
}

impl RetryOutcome {
    pub fn attempts(&self) -> u32 {
        match *self {
            RetryOutcome::Applied { attempts }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Failed { attempts, .. } => attempts,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, RetryOutcome::Applied { .. })
    }
}

/// Retry policy for the `ENOTTY` startup race
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeRetry {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ResizeRetry {
    fn default() -> Self {
        Self {
            max_attempts: 1000,
            delay: Duration::from_millis(2),
        }
    }
}

impl ResizeRetry {
    /// Call `attempt` until it succeeds, fails with something other than
    /// `ENOTTY`, or the attempt budget runs out
    pub fn run<F>(&self, mut attempt: F) -> RetryOutcome
    where
        F: FnMut() -> Result<(), Errno>,
    {
        let mut attempts = 0;
        let mut last_error = Errno::ENOTTY;

        while attempts < self.max_attempts {
            attempts += 1;
            match attempt() {
                Ok(()) => return RetryOutcome::Applied { attempts },
                Err(Errno::ENOTTY) => {
                    last_error = Errno::ENOTTY;
                    if attempts < self.max_attempts && !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                },
                Err(error) => return RetryOutcome::Failed { attempts, error },
            }
        }

        RetryOutcome::Exhausted {
            attempts,
            last_error,
        }
    }
}
