//! SD clock control
//!
//! Divisor math differs by host version: SDHCI 1.0/2.0 hosts only divide the
//! base clock by powers of two (8-bit field), SDHCI 3.0 hosts use a 10-bit
//! divided clock mode where `SDCLK = base / (2 * N)`.

use embedded_hal::delay::DelayNs;

use super::regs::{CAPS, DATA_TIMEOUT_COUNTER_MAX, HOST_CONFIG_1, PRESENT, RegisterAccess};
use super::{HostVersion, SdhciController, SdhciError};

/// Largest divisor of the SDHCI 1.0/2.0 8-bit frequency select
pub const MAX_DIVISOR_SPEC_200: u32 = 256;

/// Largest `N` of the SDHCI 3.0 10-bit divided clock mode
pub const MAX_DIVISOR_SPEC_300: u32 = 1023;

/// Compute the divisor reaching at most `target_hz` from `base_clock_hz`.
///
/// For version 1/2 hosts the result is the power-of-two divisor itself (1 to
/// 256). For version 3 hosts the result is `N` (0 selects the base clock).
pub fn compute_divisor(
    base_clock_hz: u32,
    target_hz: u32,
    version: HostVersion,
) -> Result<u32, SdhciError> {
    match version {
        HostVersion::V1 | HostVersion::V2 => {
            let mut divisor = 1;
            while divisor <= MAX_DIVISOR_SPEC_200 {
                if base_clock_hz / divisor <= target_hz {
                    return Ok(divisor);
                }
                divisor *= 2;
            }
            Err(SdhciError::Unsupported)
        }
        HostVersion::V3 => {
            if target_hz == base_clock_hz {
                return Ok(0);
            }
            if target_hz == 0 {
                return Err(SdhciError::Unsupported);
            }
            let divisor = u64::from(base_clock_hz).div_ceil(2 * u64::from(target_hz));
            if divisor > u64::from(MAX_DIVISOR_SPEC_300) {
                return Err(SdhciError::Unsupported);
            }
            Ok(divisor as u32)
        }
        HostVersion::Other(_) => Err(SdhciError::Unsupported),
    }
}

/// Split a divisor into the (low 8 bits, high 2 bits) frequency select fields
fn frequency_select(divisor: u32, version: HostVersion) -> (u32, u32) {
    match version {
        HostVersion::V3 => (divisor & 0xff, (divisor >> 8) & 0x3),
        // 0x00 = base clock, 0x01 = base/2, ..., 0x80 = base/256
        _ => (divisor >> 1, 0),
    }
}

/// Frequency actually produced by `divisor`
fn divided_clock(base_clock_hz: u32, divisor: u32, version: HostVersion) -> u32 {
    match (version, divisor) {
        (_, 0) => base_clock_hz,
        (HostVersion::V3, n) => base_clock_hz / (2 * n),
        (_, d) => base_clock_hz / d,
    }
}

impl<R: RegisterAccess, D: DelayNs> SdhciController<R, D> {
    /// Base clock in Hz, from the configuration or the capabilities register
    pub fn base_clock_hz(&self) -> Result<u32, SdhciError> {
        if let Some(hz) = self.config.base_clock_hz {
            return Ok(hz);
        }
        let caps = self.regs.capabilities();
        let mhz = match self.version {
            HostVersion::V3 => caps.read(CAPS::BASE_CLOCK_FREQUENCY),
            _ => caps.read(CAPS::BASE_CLOCK_FREQUENCY_V2),
        };
        if mhz == 0 {
            log::error!("SDHCI: Base clock not reported by the host");
            return Err(SdhciError::Unsupported);
        }
        Ok(mhz * 1_000_000)
    }

    /// Whether the SD clock is currently driven to the card
    pub fn clock_enabled(&self) -> bool {
        self.regs
            .host_configuration_1()
            .is_set(HOST_CONFIG_1::SD_CLOCK_ENABLE)
    }

    /// Start the SD clock at (at most) `target_hz`.
    ///
    /// The clock must be stopped.
    pub fn supply(&mut self, target_hz: u32) -> Result<(), SdhciError> {
        assert!(
            !self.clock_enabled(),
            "SDHCI: clock supplied while already running"
        );

        let base_clock_hz = self.base_clock_hz()?;
        let divisor = compute_divisor(base_clock_hz, target_hz, self.version)?;
        let (low, high) = frequency_select(divisor, self.version);

        log::debug!(
            "SDHCI: Setting clock to {} Hz (divisor={}, actual={})",
            target_hz,
            divisor,
            divided_clock(base_clock_hz, divisor, self.version)
        );

        self.regs.modify_host_configuration_1(
            HOST_CONFIG_1::SDCLK_FREQUENCY_SELECT.val(low)
                + HOST_CONFIG_1::SDCLK_FREQUENCY_SELECT_HIGH.val(high)
                + HOST_CONFIG_1::INTERNAL_CLOCK_ENABLE::SET,
        );

        let stable = self.poll(|c| {
            c.regs
                .host_configuration_1()
                .is_set(HOST_CONFIG_1::INTERNAL_CLOCK_STABLE)
        });
        if !stable {
            log::error!("SDHCI: Internal clock not stable");
            return Err(SdhciError::IoTimeout);
        }

        self.regs.modify_host_configuration_1(
            HOST_CONFIG_1::DATA_TIMEOUT_COUNTER.val(DATA_TIMEOUT_COUNTER_MAX),
        );
        self.regs
            .modify_host_configuration_1(HOST_CONFIG_1::SD_CLOCK_ENABLE::SET);
        Ok(())
    }

    /// Stop the SD clock once the CMD and DAT lines are idle.
    pub fn stop(&mut self) -> Result<(), SdhciError> {
        let idle = self.poll(|c| {
            let state = c.regs.present_state();
            !state.is_set(PRESENT::COMMAND_INHIBIT_CMD)
                && !state.is_set(PRESENT::COMMAND_INHIBIT_DAT)
        });
        if !idle {
            log::error!("SDHCI: Lines still busy, cannot stop the clock");
            return Err(SdhciError::IoTimeout);
        }

        self.regs
            .modify_host_configuration_1(HOST_CONFIG_1::SD_CLOCK_ENABLE::CLEAR);
        Ok(())
    }

    /// Move the running SD clock to `target_hz`
    pub fn frequency_change(&mut self, target_hz: u32) -> Result<(), SdhciError> {
        self.stop()?;
        self.supply(target_hz)
    }
}
