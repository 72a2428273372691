//! A scripted [`Transport`] for exercising the session/PIT/flash state
//! machine without real hardware.
//!
//! Tests build a [`MockTransport`] with a queue of expected steps; each
//! step is either an expected outbound write (compared byte-for-byte) or a
//! canned reply to the next read. Calls that don't match the script panic
//! with a descriptive message, which is exactly what we want from a test
//! double: a silent pass-through would hide protocol bugs.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::Transport;

enum Step {
    ExpectWrite(Vec<u8>),
    Reply(Vec<u8>),
    FailRead(Error),
}

/// A transport double driven by a pre-recorded script of writes and
/// replies.
#[derive(Default)]
pub struct MockTransport {
    steps: VecDeque<Step>,
}

impl MockTransport {
    /// An empty script; steps are appended with the `expect_write`/`reply`
    /// builders.
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: VecDeque::new(),
        }
    }

    /// Queue an expected outbound write.
    #[must_use]
    pub fn expect_write(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.steps.push_back(Step::ExpectWrite(data.into()));
        self
    }

    /// Queue a reply to be returned by the next `read`.
    #[must_use]
    pub fn reply(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.steps.push_back(Step::Reply(data.into()));
        self
    }

    /// Queue a read that fails, for exercising the ZLP-swallow path.
    #[must_use]
    pub fn fail_read(mut self, err: Error) -> Self {
        self.steps.push_back(Step::FailRead(err));
        self
    }

    /// True once every queued step has been consumed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        match self.steps.pop_front() {
            Some(Step::ExpectWrite(expected)) => {
                assert_eq!(
                    expected, data,
                    "unexpected write: expected {expected:02x?}, got {data:02x?}"
                );
                Ok(())
            }
            other => panic!("unexpected write call, next scripted step was {other:?}"),
        }
    }

    fn read(&mut self, _max_len: usize, _timeout: Duration) -> Result<Vec<u8>> {
        match self.steps.pop_front() {
            Some(Step::Reply(data)) => Ok(data),
            Some(Step::FailRead(err)) => Err(err),
            other => panic!("unexpected read call, next scripted step was {other:?}"),
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::ExpectWrite(d) => write!(f, "ExpectWrite({} bytes)", d.len()),
            Step::Reply(d) => write!(f, "Reply({} bytes)", d.len()),
            Step::FailRead(e) => write!(f, "FailRead({e})"),
        }
    }
}
