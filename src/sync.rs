// SPDX-License-Identifier: Apache-2.0
//! Frame-boundary synchronization.
//!
//! Two interchangeable strategies detect that a frame is ready to read:
//! blocking on the transport's own readiness signal (DATA_READY pin edge,
//! or pending RX bytes on the EVK bridge), or polling the status register
//! at a fixed interval. The choice is made once, at construction, so the
//! stream read loop carries no per-call capability checks. Both expose the
//! same timeout semantics: `Ok(true)` when a frame is ready, `Ok(false)`
//! when the timeout elapsed first.

use std::time::{Duration, Instant};

use log::trace;

use crate::error::Result;
use crate::protocol;
use crate::register::{self, StatusFlags};
use crate::transport::Transport;

/// How frame readiness is detected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncStrategy {
    /// Block on the transport's readiness signal.
    Edge,

    /// Poll the status register's DATA_READY bit at `interval`.
    Polling { interval: Duration },
}

impl SyncStrategy {
    /// The recommended status-poll interval.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

    /// Polling at the default interval.
    pub fn polling() -> Self {
        Self::Polling {
            interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    /// Wait until the next frame boundary or the timeout, whichever first.
    pub(crate) fn wait_frame_ready<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        timeout: Duration,
    ) -> Result<bool> {
        match self {
            Self::Edge => Ok(transport.wait_data_ready(timeout)?),
            Self::Polling { interval } => {
                let deadline = Instant::now() + timeout;
                loop {
                    let raw = protocol::read_register(transport, register::STATUS, 1, *interval)?;
                    let status = StatusFlags::from(raw as u8);
                    if status.data_ready {
                        trace!("status poll: data ready");
                        return Ok(true);
                    }
                    if Instant::now() + *interval > deadline {
                        return Ok(false);
                    }
                    std::thread::sleep(*interval);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::MockSensor;

    const INTERVAL: Duration = Duration::from_millis(10);

    fn polling() -> SyncStrategy {
        SyncStrategy::Polling { interval: INTERVAL }
    }

    #[test]
    fn polling_sees_data_within_timeout() {
        // Ready after three poll intervals, timeout covers five.
        let mut mock = MockSensor::direct();
        mock.set_data_ready_after(INTERVAL * 3);
        let ready = polling()
            .wait_frame_ready(&mut mock, INTERVAL * 5)
            .unwrap();
        assert!(ready);
    }

    #[test]
    fn polling_times_out_short_of_the_signal() {
        let mut mock = MockSensor::direct();
        mock.set_data_ready_after(INTERVAL * 8);
        let ready = polling()
            .wait_frame_ready(&mut mock, INTERVAL * 3)
            .unwrap();
        assert!(!ready);
    }

    #[test]
    fn polling_zero_timeout_checks_once() {
        let mut mock = MockSensor::direct();
        mock.set_data_ready_after(Duration::ZERO);
        let ready = polling()
            .wait_frame_ready(&mut mock, Duration::ZERO)
            .unwrap();
        assert!(ready);

        let mut mock = MockSensor::direct();
        mock.set_data_ready_after(INTERVAL);
        let ready = polling()
            .wait_frame_ready(&mut mock, Duration::ZERO)
            .unwrap();
        assert!(!ready);
    }

    #[test]
    fn edge_follows_the_transport_signal() {
        let mut mock = MockSensor::framed();
        mock.set_data_ready_after(Duration::from_millis(5));
        let ready = SyncStrategy::Edge
            .wait_frame_ready(&mut mock, Duration::from_millis(50))
            .unwrap();
        assert!(ready);

        let mut mock = MockSensor::framed();
        mock.set_data_ready_after(Duration::from_millis(50));
        let ready = SyncStrategy::Edge
            .wait_frame_ready(&mut mock, Duration::from_millis(5))
            .unwrap();
        assert!(!ready);
    }
}
