// SPDX-License-Identifier: Apache-2.0
//! The guarded user-flash calibration store.
//!
//! The MI48 keeps four compensation parameters in a small non-volatile
//! region that is only safely writable inside an explicit unlock/relock
//! bracket. While locked, the region reads as the erased sentinel
//! (all bits set) — outside code relies on that read pattern to tell an
//! EVK-only board from a full module, so the driver must always relock.
//!
//! The unlock/write/lock sequence is a critical section: no streaming
//! operation may run inside it. [`Mi48::with_user_flash`] packages the
//! whole bracket and guarantees the relock on every exit path; the strict
//! `unlock`/`lock` primitives exist for callers that need finer control
//! and refuse to nest.

use std::io::BufRead;

use log::{debug, info, warn};

use crate::error::{ConfigError, Error, FlashError, Result};
use crate::register;
use crate::stream::{Mi48, StreamState};
use crate::transport::Transport;

/// Value of an erased user-flash word.
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// Fixed-point scale of the stored parameters: thousandths.
const PARAM_SCALE: f32 = 1000.0;

const UNLOCK_MAGIC: [u8; 2] = [0xA5, 0x96];

/// Exactly four compensation parameters, keyed by module serial number.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CalibrationRecord(pub [f32; 4]);

impl CalibrationRecord {
    /// Build a record from up to four parameters, zero-filling the rest.
    ///
    /// A short record must still clear every slot: a stale erased sentinel
    /// would signal "uncalibrated" to readers.
    pub fn from_partial(params: &[f32]) -> Self {
        let mut record = [0.0f32; 4];
        for (slot, &p) in record.iter_mut().zip(params.iter()) {
            *slot = p;
        }
        Self(record)
    }

    pub(crate) fn to_words(self) -> std::result::Result<[u32; 4], FlashError> {
        let mut words = [0u32; 4];
        for (word, &p) in words.iter_mut().zip(self.0.iter()) {
            if !p.is_finite() || p < 0.0 {
                return Err(FlashError::WriteRejected(
                    "parameters must be finite and non-negative",
                ));
            }
            let raw = (p * PARAM_SCALE).round();
            if raw >= ERASED_WORD as f32 {
                return Err(FlashError::WriteRejected(
                    "parameter would collide with the erased sentinel",
                ));
            }
            *word = raw as u32;
        }
        Ok(words)
    }

    pub(crate) fn from_words(words: [u32; 4]) -> Self {
        let mut record = [0.0f32; 4];
        for (slot, &word) in record.iter_mut().zip(words.iter()) {
            *slot = word as f32 / PARAM_SCALE;
        }
        Self(record)
    }
}

/// Write access to the unlocked store inside a
/// [`with_user_flash`][Mi48::with_user_flash] bracket.
pub struct UserFlash<'a, T> {
    driver: &'a mut Mi48<T>,
}

impl<'a, T: Transport> UserFlash<'a, T> {
    /// Write all four calibration words.
    pub fn store(&mut self, record: CalibrationRecord) -> Result<()> {
        self.driver.store_calibration(record)
    }

    /// Read the four calibration words back.
    pub fn read(&mut self) -> Result<CalibrationRecord> {
        self.driver.read_calibration()
    }

    /// Raw word access, mostly useful to check for the erased sentinel.
    pub fn read_words(&mut self) -> Result<[u32; 4]> {
        self.driver.read_calibration_words()
    }
}

impl<T: Transport> Mi48<T> {
    /// Run `body` with the user flash unlocked, relocking on every exit
    /// path (including errors from `body` itself).
    pub fn with_user_flash<R>(
        &mut self,
        body: impl FnOnce(&mut UserFlash<'_, T>) -> Result<R>,
    ) -> Result<R> {
        self.unlock_user_flash()?;
        let outcome = body(&mut UserFlash { driver: self });
        let relock = self.lock_user_flash();
        if let Err(e) = &relock {
            warn!("relock after flash bracket failed: {}", e);
        }
        match outcome {
            Ok(value) => relock.map(|_| value),
            Err(e) => Err(e),
        }
    }

    /// Unlock the user flash for writing.
    ///
    /// Deliberately strict: unlocking twice is an error, because two
    /// overlapping unlock/write/lock brackets would corrupt the store.
    /// Only valid from Idle; flash traffic must never interleave with
    /// frame traffic.
    pub fn unlock_user_flash(&mut self) -> Result<()> {
        if self.flash_unlocked {
            return Err(FlashError::AlreadyUnlocked.into());
        }
        if self.state() != StreamState::Idle {
            return Err(Error::InvalidState {
                operation: "unlock_user_flash",
                state: self.state(),
            });
        }
        for magic in UNLOCK_MAGIC {
            self.regwrite(register::FLASH_CTRL, magic as u32, 1)?;
        }
        self.flash_unlocked = true;
        debug!("user flash unlocked");
        Ok(())
    }

    /// Relock the user flash. Idempotent; succeeds from either state.
    pub fn lock_user_flash(&mut self) -> Result<()> {
        if !self.flash_unlocked {
            return Ok(());
        }
        self.regwrite(register::FLASH_CTRL, 0x00, 1)?;
        self.flash_unlocked = false;
        debug!("user flash locked");
        Ok(())
    }

    /// Whether the driver currently holds the store unlocked.
    pub fn user_flash_unlocked(&self) -> bool {
        self.flash_unlocked
    }

    /// Write a calibration record into the four user-flash words.
    ///
    /// Valid only while unlocked. All four slots are written even when the
    /// source record was partial, using the width needed to clear the
    /// erased sentinel deterministically.
    pub fn store_calibration(&mut self, record: CalibrationRecord) -> Result<()> {
        if !self.flash_unlocked {
            return Err(FlashError::WriteRejected("user flash is locked").into());
        }
        let words = record.to_words()?;
        for (addr, word) in register::USER_FLASH.iter().zip(words.iter()) {
            self.regwrite(*addr, *word, 4)?;
        }
        info!("calibration stored for SN {}", self.info.serial);
        Ok(())
    }

    /// Read the calibration record.
    ///
    /// Readable in either lock state, but only authoritative while
    /// unlocked: a locked store reads as the erased sentinel.
    pub fn read_calibration(&mut self) -> Result<CalibrationRecord> {
        Ok(CalibrationRecord::from_words(
            self.read_calibration_words()?,
        ))
    }

    /// Read the four raw user-flash words.
    pub fn read_calibration_words(&mut self) -> Result<[u32; 4]> {
        let mut words = [0u32; 4];
        for (word, addr) in words.iter_mut().zip(register::USER_FLASH.iter()) {
            *word = self.regread(*addr, 4)?;
        }
        Ok(words)
    }

    /// Probe for an attached sensor module.
    ///
    /// With the store locked, a full module answers the first user-flash
    /// address with the erased sentinel; an EVK board with nothing behind
    /// it reads zero. Status-check code relies on this locked-read pattern
    /// to tell the hardware variants apart, which is why `lock()` must
    /// always run. The probe is only meaningful while locked.
    pub fn module_attached(&mut self) -> Result<bool> {
        if self.flash_unlocked {
            return Err(FlashError::AlreadyUnlocked.into());
        }
        let first = self.regread(register::USER_FLASH[0], 4)?;
        Ok(first == ERASED_WORD)
    }
}

/// Look up the calibration record for `serial` in a delimited text store.
///
/// Each line is `serial,p0,p1,p2,p3`; missing trailing parameters default
/// to zero and the serial comparison ignores case. Returns `None` when no
/// line matches.
pub fn find_record<R: BufRead>(reader: R, serial: &str) -> Result<Option<CalibrationRecord>> {
    for line in reader.lines() {
        let line = line.map_err(|e| {
            crate::error::TransportError::IoFault(format!("calibration file: {}", e))
        })?;
        let mut fields = line.split(',');
        let sn = match fields.next() {
            Some(sn) => sn.trim(),
            None => continue,
        };
        if !sn.eq_ignore_ascii_case(serial) {
            continue;
        }
        let mut params = Vec::with_capacity(4);
        for field in fields.take(4) {
            let value: f32 = field
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidRange("calibration parameter"))?;
            params.push(value);
        }
        return Ok(Some(CalibrationRecord::from_partial(&params)));
    }
    Ok(None)
}
