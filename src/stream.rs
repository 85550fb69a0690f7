// SPDX-License-Identifier: Apache-2.0
//! The MI48 driver and its streaming state machine.

use std::time::Duration;

use log::{debug, info, warn};
use paste::paste;

use crate::common::{Address, CameraInfo, FirmwareVersion, SenxorType};
use crate::error::{ConfigError, Error, ProtocolError, Result, StartError, StopError};
use crate::frame::{self, Frame};
use crate::protocol;
use crate::register::{self, FilterControl, FrameMode, Register, StatusFlags};
use crate::sync::SyncStrategy;
use crate::transport::Transport;

/// Base capture rate of the sensor; the FRAME_RATE register divides this.
pub const BASE_FRAME_RATE_HZ: f32 = 25.5;

/// Per-call timeout for register traffic.
const REGISTER_TIMEOUT: Duration = Duration::from_millis(500);

/// `start()` never waits less than this for the first frame, however high
/// the configured frame rate is.
const STARTUP_TIMEOUT_FLOOR: Duration = Duration::from_millis(500);

/// Default per-poll timeout for `stop()`'s acknowledgement reads.
pub const DEFAULT_STOP_POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// Default overall `stop()` acknowledgement window.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(1200);

/// Streaming lifecycle state. Owned exclusively by [`Mi48`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamState {
    Idle,
    Starting,
    Streaming,
    Stopping,
}

/// DRY macro for the filter-stage toggles: read-modify-write of
/// FILTER_CONTROL, skipping the bus write when nothing changes.
macro_rules! filter_field {
    { $field:ident, $doc:literal } => {
        paste! {
            #[doc = $doc]
            pub fn [< set_ $field >](&mut self, enable: bool) -> Result<()> {
                let mut current: FilterControl = self.read_typed()?;
                if current.$field != enable {
                    current.$field = enable;
                    self.write_typed(current)?;
                }
                Ok(())
            }
        }
    };
}

/// Driver for one MI48 module on one transport.
///
/// All operations are synchronous and block for at most their stated
/// timeout; there is no background I/O thread and no buffering beyond one
/// frame. Serialize all access to one module through a single owner.
/// `stop()` and `close()` are safe to call from a shutdown path even if a
/// read is outstanding elsewhere, because every read times out rather than
/// hangs.
pub struct Mi48<T> {
    pub(crate) transport: T,
    pub(crate) info: CameraInfo,
    sync: SyncStrategy,
    state: StreamState,
    fps_divisor: u8,
    pub(crate) flash_unlocked: bool,
}

impl<T> std::fmt::Debug for Mi48<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mi48")
            .field("info", &self.info)
            .field("sync", &self.sync)
            .field("state", &self.state)
            .field("fps_divisor", &self.fps_divisor)
            .field("flash_unlocked", &self.flash_unlocked)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Mi48<T> {
    /// Bind the module on the given transport, reading out its identity.
    ///
    /// The sync strategy defaults to edge-triggered when the transport has
    /// a readiness signal, status polling otherwise.
    pub fn new(transport: T) -> Result<Self> {
        let strategy = if transport.has_data_ready_signal() {
            SyncStrategy::Edge
        } else {
            SyncStrategy::polling()
        };
        Self::with_sync(transport, strategy)
    }

    /// Bind the module with an explicit sync strategy.
    pub fn with_sync(mut transport: T, sync: SyncStrategy) -> Result<Self> {
        if sync == SyncStrategy::Edge && !transport.has_data_ready_signal() {
            return Err(ConfigError::SyncUnsupported.into());
        }
        let major = read_raw(&mut transport, register::FW_VERSION_MAJOR, 1)? as u8;
        let minor = read_raw(&mut transport, register::FW_VERSION_MINOR, 1)? as u8;
        let type_code = read_raw(&mut transport, register::SENXOR_TYPE, 1)? as u8;
        let senxor_type = SenxorType::try_from(type_code)
            .map_err(|_| ProtocolError::Malformed("unknown sensor family code"))?;
        let camera_id = read_raw(&mut transport, register::CAMERA_ID, 4)?;
        let divisor = read_raw(&mut transport, register::FRAME_RATE, 1)? as u8;
        let info = CameraInfo {
            serial: format!("{:08X}", camera_id),
            senxor_type,
            firmware_version: FirmwareVersion { major, minor },
            fpa_shape: senxor_type.fpa_shape(),
        };
        info!("bound {}", info);
        Ok(Self {
            transport,
            info,
            sync,
            state: StreamState::Idle,
            fps_divisor: divisor.max(1),
            flash_unlocked: false,
        })
    }

    pub fn camera_info(&self) -> &CameraInfo {
        &self.info
    }

    pub fn firmware_version(&self) -> FirmwareVersion {
        self.info.firmware_version
    }

    /// The temporal filters only exist in firmware 2.x and later.
    pub fn filters_available(&self) -> bool {
        self.info.firmware_version.major >= 2
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn sync_strategy(&self) -> SyncStrategy {
        self.sync
    }

    /// The capture period implied by the current frame-rate divisor.
    pub fn nominal_frame_period(&self) -> Duration {
        Duration::from_secs_f32(self.fps_divisor as f32 / BASE_FRAME_RATE_HZ)
    }

    /// Raw register write pass-through.
    ///
    /// The width must match the register being written (1, 2 or 4 bytes).
    /// There is no acknowledgement on the wire; read back if certainty is
    /// required.
    pub fn regwrite(&mut self, addr: Address, value: u32, width: usize) -> Result<()> {
        protocol::write_register(&mut self.transport, addr, value, width)
    }

    /// Raw register read pass-through.
    pub fn regread(&mut self, addr: Address, width: usize) -> Result<u32> {
        protocol::read_register(&mut self.transport, addr, width, REGISTER_TIMEOUT)
    }

    pub(crate) fn read_typed<R: Register>(&mut self) -> Result<R> {
        let raw = self.regread(R::address(), 1)?;
        Ok(R::from(raw as u8))
    }

    pub(crate) fn write_typed<R: Register>(&mut self, value: R) -> Result<()> {
        let raw: u8 = value.into();
        self.regwrite(R::address(), raw as u32, 1)
    }

    /// Set the frame rate by target FPS, returning the chosen divisor.
    ///
    /// Only valid in Idle, like [`configure`][Self::configure].
    pub fn set_fps(&mut self, fps: f32) -> Result<u8> {
        if !(fps > 0.0 && fps <= BASE_FRAME_RATE_HZ) {
            return Err(ConfigError::InvalidRange("frame rate").into());
        }
        self.guard_idle("set_fps")?;
        let divisor = (BASE_FRAME_RATE_HZ / fps).round().clamp(1.0, 63.0) as u8;
        self.regwrite(register::FRAME_RATE, divisor as u32, 1)?;
        self.fps_divisor = divisor;
        Ok(divisor)
    }

    /// Write the capture configuration. Only valid in Idle.
    ///
    /// Range checks are local invariants, not wire faults: a rejected call
    /// writes nothing.
    pub fn configure(
        &mut self,
        fps_divisor: u8,
        filters: FilterControl,
        emissivity: f32,
        offset_corr: f32,
    ) -> Result<()> {
        self.guard_idle("configure")?;
        if !(1..=63).contains(&fps_divisor) {
            return Err(ConfigError::InvalidRange("frame-rate divisor").into());
        }
        if !(0.01..=1.0).contains(&emissivity) {
            return Err(ConfigError::InvalidRange("emissivity").into());
        }
        if !(-100.0..=100.0).contains(&offset_corr) {
            return Err(ConfigError::InvalidRange("offset correction").into());
        }
        self.regwrite(register::FRAME_RATE, fps_divisor as u32, 1)?;
        self.write_typed(filters)?;
        let emissivity_pct = (emissivity * 100.0).round() as u32;
        self.regwrite(register::EMISSIVITY, emissivity_pct, 1)?;
        let offset_deci = (offset_corr * 10.0).round() as i16;
        self.regwrite(register::OFFSET_CORR, offset_deci as u16 as u32, 2)?;
        self.fps_divisor = fps_divisor;
        info!(
            "configured: divisor {}, emissivity {:.2}, offset {:+.1}",
            fps_divisor, emissivity, offset_corr
        );
        Ok(())
    }

    filter_field! { f1_temporal, "Toggle filter stage 1 (temporal)." }
    filter_field! { f2_rolling_average, "Toggle filter stage 2 (rolling average)." }
    filter_field! { f3_median, "Toggle filter stage 3 (median)." }
    filter_field! { f3_kernel_5, "Use a 5×5 kernel for filter stage 3." }

    /// Begin continuous streaming.
    ///
    /// Issues the stream-enable write and waits for the first frame
    /// boundary. The startup window is twice the nominal frame period with
    /// a 500 ms floor; if no frame appears in time the device is disabled
    /// again, the machine returns to Idle and [`StartError::NoFrame`] is
    /// surfaced.
    pub fn start(&mut self) -> Result<()> {
        self.guard_idle("start")?;
        self.state = StreamState::Starting;
        if let Err(e) = self.write_typed(FrameMode::streaming()) {
            self.state = StreamState::Idle;
            return Err(e);
        }
        let startup_timeout = STARTUP_TIMEOUT_FLOOR.max(2 * self.nominal_frame_period());
        match self.sync.wait_frame_ready(&mut self.transport, startup_timeout) {
            Ok(true) => {
                self.state = StreamState::Streaming;
                debug!("streaming started");
                Ok(())
            }
            Ok(false) => {
                self.abort_to_idle();
                Err(StartError::NoFrame {
                    waited: startup_timeout,
                }
                .into())
            }
            Err(e) => {
                self.abort_to_idle();
                Err(e)
            }
        }
    }

    /// Read the next frame, or `None` if no frame arrived within `timeout`.
    ///
    /// Only valid while Streaming. A quiet slot is an expected steady-state
    /// condition and is not an error; a truncated frame is fatal, forces
    /// the machine to Idle and surfaces the state it happened in. Reads
    /// after a fatal fault are rejected as `InvalidState` rather than
    /// hanging.
    pub fn read(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        self.guard_flash("read")?;
        if self.state != StreamState::Streaming {
            return Err(Error::InvalidState {
                operation: "read",
                state: self.state,
            });
        }
        if !self.sync.wait_frame_ready(&mut self.transport, timeout)? {
            return Ok(None);
        }
        let (cols, rows) = self.info.fpa_shape;
        let deadline = 2 * self.nominal_frame_period().max(Duration::from_millis(50));
        match frame::assemble(&mut self.transport, cols, rows, deadline) {
            Ok(frame) => Ok(Some(frame)),
            Err(source) => {
                let state = self.state;
                warn!("fatal frame fault in state {:?}: {}", state, source);
                self.abort_to_idle();
                Err(Error::Assembly { state, source })
            }
        }
    }

    /// Stop streaming with the default acknowledgement timeouts.
    pub fn stop(&mut self) -> Result<()> {
        self.stop_with_timeouts(DEFAULT_STOP_POLL_TIMEOUT, DEFAULT_STOP_TIMEOUT)
    }

    /// Stop streaming.
    ///
    /// Issues the stream-disable write, then polls the status register for
    /// up to `stop_timeout` (each poll read bounded by `poll_timeout`)
    /// until the capture pipeline reports idle. The machine always ends in
    /// Idle; if the acknowledgement never arrives the best-effort stop is
    /// reported as [`StopError::Unacknowledged`] so the caller knows the
    /// device may still be capturing. Calling from Idle is a no-op success.
    pub fn stop_with_timeouts(
        &mut self,
        poll_timeout: Duration,
        stop_timeout: Duration,
    ) -> Result<()> {
        self.guard_flash("stop")?;
        if self.state == StreamState::Idle {
            debug!("stop: already idle");
            return Ok(());
        }
        self.state = StreamState::Stopping;
        if let Err(e) = self.write_typed(FrameMode::idle()) {
            self.abort_to_idle();
            return Err(e);
        }
        let deadline = std::time::Instant::now() + stop_timeout;
        loop {
            match protocol::read_register(&mut self.transport, register::STATUS, 1, poll_timeout)
            {
                Ok(raw) => {
                    let status = StatusFlags::from(raw as u8);
                    if !status.capture_active && !status.data_ready {
                        self.abort_to_idle();
                        debug!("streaming stopped");
                        return Ok(());
                    }
                }
                // In-flight frame bytes can garble the poll; keep trying
                // until the window closes.
                Err(e) => debug!("stop poll: {}", e),
            }
            if std::time::Instant::now() >= deadline {
                self.abort_to_idle();
                warn!("stop was not acknowledged within {:?}", stop_timeout);
                return Err(StopError::Unacknowledged.into());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Stop if needed and release the transport. Safe to call repeatedly.
    pub fn close(&mut self) {
        if matches!(self.state, StreamState::Streaming | StreamState::Starting) {
            if let Err(e) = self.stop() {
                warn!("stop during close: {}", e);
            }
        }
        self.transport.close();
    }

    /// Force Idle and discard any stale bytes so a later `start()` never
    /// parses a half frame.
    fn abort_to_idle(&mut self) {
        let mut scratch = [0u8; 256];
        loop {
            match self.transport.read(&mut scratch, Duration::ZERO) {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        self.state = StreamState::Idle;
    }

    fn guard_idle(&self, operation: &'static str) -> Result<()> {
        self.guard_flash(operation)?;
        if self.state != StreamState::Idle {
            return Err(Error::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    pub(crate) fn guard_flash(&self, operation: &'static str) -> Result<()> {
        if self.flash_unlocked {
            return Err(Error::FlashUnlocked { operation });
        }
        Ok(())
    }
}

fn read_raw<T: Transport>(transport: &mut T, addr: Address, width: usize) -> Result<u32> {
    protocol::read_register(transport, addr, width, REGISTER_TIMEOUT)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::MockSensor;

    fn bound_driver(mock: &MockSensor) -> Mi48<MockSensor> {
        Mi48::new(mock.clone()).expect("mock sensor should bind")
    }

    #[test]
    fn bind_reads_identity() {
        let mock = MockSensor::framed();
        let driver = bound_driver(&mock);
        let info = driver.camera_info();
        assert_eq!(info.senxor_type, SenxorType::Mi0801);
        assert_eq!(info.fpa_shape, (80, 62));
        assert_eq!(info.serial.len(), 8);
        assert_eq!(driver.state(), StreamState::Idle);
        assert!(driver.filters_available());
    }

    #[test]
    fn default_sync_follows_capability() {
        let usb_like = bound_driver(&MockSensor::framed());
        assert_eq!(usb_like.sync_strategy(), SyncStrategy::Edge);

        let mut mock = MockSensor::direct();
        mock.disable_data_ready_signal();
        let i2c_like = Mi48::new(mock).unwrap();
        assert_eq!(i2c_like.sync_strategy(), SyncStrategy::polling());
    }

    #[test]
    fn edge_sync_needs_a_signal() {
        let mut mock = MockSensor::direct();
        mock.disable_data_ready_signal();
        let err = Mi48::with_sync(mock, SyncStrategy::Edge).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::SyncUnsupported)));
    }

    #[test]
    fn configure_writes_the_registers() {
        let mock = MockSensor::framed();
        let mut driver = bound_driver(&mock);
        let filters = FilterControl {
            f1_temporal: true,
            ..Default::default()
        };
        driver.configure(10, filters, 0.95, -0.7).unwrap();
        assert_eq!(mock.register(register::FRAME_RATE), 10);
        assert_eq!(mock.register(register::FILTER_CONTROL), 0x01);
        assert_eq!(mock.register(register::EMISSIVITY), 95);
        assert_eq!(mock.register_wide(register::OFFSET_CORR), (-7i16) as u16 as u32);
    }

    #[test]
    fn configure_rejects_bad_ranges_locally() {
        let mock = MockSensor::framed();
        let mut driver = bound_driver(&mock);
        let filters = FilterControl::default();
        for (divisor, emissivity, offset) in
            [(0u8, 0.95f32, 0.0f32), (64, 0.95, 0.0), (10, 0.0, 0.0), (10, 1.2, 0.0), (10, 0.95, 400.0)]
        {
            mock.clear_recent_operations();
            let err = driver
                .configure(divisor, filters, emissivity, offset)
                .unwrap_err();
            assert!(matches!(err, Error::Config(ConfigError::InvalidRange(_))));
            assert!(
                mock.recent_operations().is_empty(),
                "rejected configure must not touch the wire"
            );
        }
    }

    #[test]
    fn configure_outside_idle_is_invalid_state() {
        let mock = MockSensor::framed();
        let mut driver = bound_driver(&mock);
        driver.start().unwrap();
        let err = driver
            .configure(10, FilterControl::default(), 0.95, 0.0)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                operation: "configure",
                state: StreamState::Streaming,
            }
        ));
        driver.stop().unwrap();
    }

    #[test]
    fn filter_toggle_skips_redundant_writes() {
        let mock = MockSensor::framed();
        let mut driver = bound_driver(&mock);
        driver.set_f1_temporal(true).unwrap();
        assert_eq!(mock.register(register::FILTER_CONTROL), 0x01);
        mock.clear_recent_operations();
        driver.set_f1_temporal(true).unwrap();
        // One read to check, no write.
        assert_eq!(mock.recent_write_count(), 0);
    }

    #[test]
    fn end_to_end_stream_cycle() {
        let mock = MockSensor::framed();
        let mut driver = bound_driver(&mock);
        driver
            .configure(10, FilterControl::default(), 0.95, 0.0)
            .unwrap();
        mock.set_first_frame_delay(Duration::from_millis(100));
        mock.set_frame_interval(Duration::from_millis(10));
        driver.start().unwrap();
        assert_eq!(driver.state(), StreamState::Streaming);

        let mut last_counter = None;
        for _ in 0..5 {
            let frame = driver
                .read(Duration::from_millis(500))
                .unwrap()
                .expect("frame expected while streaming");
            let counter = frame.header().frame_counter;
            if let Some(previous) = last_counter {
                assert!(counter > previous, "{counter} !> {previous}");
            }
            last_counter = Some(counter);
        }

        driver
            .stop_with_timeouts(Duration::from_millis(250), Duration::from_millis(1200))
            .unwrap();
        assert_eq!(driver.state(), StreamState::Idle);
        let err = driver.read(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                operation: "read",
                state: StreamState::Idle,
            }
        ));
    }

    #[test]
    fn quiet_slot_reads_none() {
        let mock = MockSensor::framed();
        let mut driver = bound_driver(&mock);
        mock.set_first_frame_delay(Duration::from_millis(5));
        mock.set_frame_interval(Duration::from_secs(10));
        driver.start().unwrap();
        // Consume the first frame, then the next one is far away.
        driver.read(Duration::from_millis(200)).unwrap().unwrap();
        let quiet = driver.read(Duration::from_millis(30)).unwrap();
        assert!(quiet.is_none());
        assert_eq!(driver.state(), StreamState::Streaming);
        driver.stop().unwrap();
    }

    #[test]
    fn stop_is_idempotent() {
        let mock = MockSensor::framed();
        let mut driver = bound_driver(&mock);
        driver.stop().unwrap();
        driver.stop().unwrap();
        assert_eq!(driver.state(), StreamState::Idle);

        driver.start().unwrap();
        driver.stop().unwrap();
        driver.stop().unwrap();
        assert_eq!(driver.state(), StreamState::Idle);
    }

    #[test]
    fn start_then_immediate_stop_allows_restart() {
        let mock = MockSensor::framed();
        let mut driver = bound_driver(&mock);
        driver.start().unwrap();
        driver.stop().unwrap();
        assert_eq!(driver.state(), StreamState::Idle);
        // Sync state must not be wedged by the unread first frame.
        driver.start().unwrap();
        assert!(driver.read(Duration::from_millis(500)).unwrap().is_some());
        driver.stop().unwrap();
    }

    #[test]
    fn start_without_frames_fails_back_to_idle() {
        let mock = MockSensor::framed();
        let mut driver = bound_driver(&mock);
        mock.set_first_frame_delay(Duration::from_secs(30));
        let err = driver.start().unwrap_err();
        assert!(matches!(err, Error::Start(StartError::NoFrame { .. })));
        assert_eq!(driver.state(), StreamState::Idle);
    }

    #[test]
    fn unacknowledged_stop_still_reaches_idle() {
        let mock = MockSensor::framed();
        let mut driver = bound_driver(&mock);
        driver.start().unwrap();
        mock.fail_stop_ack();
        let err = driver
            .stop_with_timeouts(Duration::from_millis(20), Duration::from_millis(60))
            .unwrap_err();
        assert!(matches!(err, Error::Stop(StopError::Unacknowledged)));
        assert_eq!(driver.state(), StreamState::Idle);
    }

    #[test]
    fn truncated_frame_is_fatal_and_names_the_state() {
        let mock = MockSensor::framed();
        let mut driver = bound_driver(&mock);
        mock.set_frame_interval(Duration::from_millis(10));
        driver.start().unwrap();
        mock.truncate_next_frame();
        let err = driver.read(Duration::from_millis(500)).unwrap_err();
        match err {
            Error::Assembly { state, .. } => assert_eq!(state, StreamState::Streaming),
            other => panic!("expected assembly fault, got {other:?}"),
        }
        assert_eq!(driver.state(), StreamState::Idle);
        let err = driver.read(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[test]
    fn set_fps_picks_the_nearest_divisor() {
        let mock = MockSensor::framed();
        let mut driver = bound_driver(&mock);
        let divisor = driver.set_fps(7.0).unwrap();
        assert_eq!(divisor, 4); // 25.5 / 7 ≈ 3.64
        assert_eq!(mock.register(register::FRAME_RATE), 4);
        assert!(driver.set_fps(0.0).is_err());
        assert!(driver.set_fps(100.0).is_err());
    }
}
