//! SDHCI (SD Host Controller Interface) Driver
//!
//! This module drives one standard SDHCI slot with an SD memory card. It
//! brings the card from power-on to the transfer state and moves 512-byte
//! blocks with programmed I/O or ADMA2 scatter-gather DMA.
//!
//! The platform hands over an already mapped register window, a delay
//! provider and (optionally) a physically contiguous DMA arena; everything
//! else is discovered from the controller's capabilities.

pub mod adma;
pub mod card;
pub mod clock;
pub mod command;
pub mod regs;
pub mod status;
mod transfer;

use core::fmt;

use embedded_hal::delay::DelayNs;

use crate::time::{self, Pause, RetryPolicy};

pub use adma::DmaArena;
pub use card::{CardIdentity, Cid, Csd, LunAddress, Ocr, Scr, SdCard};
pub use command::{Command, Response};
pub use regs::{MmioWindow, RegisterAccess, Registers};

use command::GO_IDLE_STATE;
use regs::*;

/// Initialization clock frequency (400 kHz for card identification)
pub const INIT_CLOCK_HZ: u32 = 400_000;

/// Default speed clock frequency (25 MHz)
pub const DEFAULT_CLOCK_HZ: u32 = 25_000_000;

/// High speed clock frequency (50 MHz)
pub const HIGH_SPEED_CLOCK_HZ: u32 = 50_000_000;

/// SDHCI error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdhciError {
    /// A bounded poll ran out of attempts
    IoTimeout,
    /// The card reported an error or the DMA engine failed
    IoError,
    /// Host version, clock or card not supported
    Unsupported,
    /// No usable card in the slot
    NoDevice,
    /// Caller supplied buffer or block range is invalid
    InvalidParameter,
}

impl fmt::Display for SdhciError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SdhciError::IoTimeout => "timed out waiting for the controller",
            SdhciError::IoError => "card or DMA error",
            SdhciError::Unsupported => "unsupported host or card",
            SdhciError::NoDevice => "no usable card",
            SdhciError::InvalidParameter => "invalid parameter",
        };
        f.write_str(text)
    }
}

/// SDHCI specification version reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostVersion {
    V1,
    V2,
    V3,
    Other(u8),
}

impl HostVersion {
    fn from_register(value: SlotVersion) -> Self {
        match value.read(SLOT_VERSION::SPECIFICATION_VERSION) {
            0 => HostVersion::V1,
            1 => HostVersion::V2,
            2 => HostVersion::V3,
            other => HostVersion::Other(other as u8),
        }
    }
}

/// How data blocks are moved, fixed during [`SdhciController::initialize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Pio,
    Adma2Addr32,
    Adma2Addr64,
}

/// Whether 64-bit ADMA2 addressing is used when the host offers ADMA2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Adma64Policy {
    /// Always use 32-bit addressing
    Disabled,
    /// Use 64-bit addressing when the capabilities advertise it
    #[default]
    Capability,
    /// Advertised 64-bit support on hosts that are not version 3.
    ///
    /// Matches firmware that found the version 3 bit unreliable.
    LegacyInverted,
}

/// Attach-time settings of one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerConfig {
    /// Budget of every poll loop
    pub retry: RetryPolicy,
    pub adma64: Adma64Policy,
    /// Base clock to use instead of the capabilities field
    pub base_clock_hz: Option<u32>,
    /// Controller number reported in the card's LUN address
    pub controller_id: u32,
}

/// SDHCI Controller
pub struct SdhciController<R, D> {
    regs: Registers<R>,
    delay: D,
    config: ControllerConfig,
    version: HostVersion,
    mode: OperatingMode,
    dma: Option<DmaArena>,
    /// Response shape of the command in flight
    last_command: Command,
    card: Option<CardIdentity>,
    /// Why the last bring-up left the slot empty
    card_error: Option<SdhciError>,
}

impl<R: RegisterAccess, D: DelayNs> Pause for SdhciController<R, D> {
    fn pause(&mut self, delay_us: u32) {
        self.delay.delay_us(delay_us);
    }
}

impl<R: RegisterAccess, D: DelayNs> SdhciController<R, D> {
    /// Attach to a controller. Nothing is programmed until [`Self::initialize`].
    pub fn new(window: R, delay: D, dma: Option<DmaArena>, config: ControllerConfig) -> Self {
        let regs = Registers::new(window);
        let version = HostVersion::from_register(regs.slot_interrupt_status_and_version());
        Self {
            regs,
            delay,
            config,
            version,
            mode: OperatingMode::Pio,
            dma,
            last_command: GO_IDLE_STATE,
            card: None,
            card_error: None,
        }
    }

    /// Reset the host and bring up the card in the slot, if any.
    ///
    /// A missing or failing card is not an error of the controller: the call
    /// still succeeds and [`Self::device`] returns `None`.
    pub fn initialize(&mut self) -> Result<(), SdhciError> {
        let slot_version = self.regs.slot_interrupt_status_and_version();
        self.version = HostVersion::from_register(slot_version);
        log::info!(
            "SDHCI: Controller version {:?} (vendor: {:#x})",
            self.version,
            slot_version.read(SLOT_VERSION::VENDOR_VERSION)
        );

        if !matches!(self.version, HostVersion::V2 | HostVersion::V3) {
            log::error!("SDHCI: Unsupported host version {:?}", self.version);
            return Err(SdhciError::Unsupported);
        }

        let caps = self.regs.capabilities();
        log::debug!("SDHCI: capabilities: {:#010x}", caps.get());
        if caps.is_set(CAPS::ADMA2) {
            log::info!("SDHCI: ADMA2 supported");
        }
        if caps.is_set(CAPS::HIGH_SPEED) {
            log::info!("SDHCI: High-speed supported");
        }

        self.reset()?;
        self.power_on()?;
        self.mode = self.select_mode();
        log::info!("SDHCI: Operating mode {:?}", self.mode);

        // Polling only: every status bit latched, nothing signalled
        self.regs
            .set_interrupt_status_enable(InterruptStatus::new(0xffff_ffff));
        self.regs
            .set_interrupt_signal_enable(InterruptStatus::new(0));

        self.card = None;
        self.card_error = None;
        match self.init_card() {
            Ok(identity) => self.card = Some(identity),
            Err(e) => {
                if e == SdhciError::NoDevice {
                    log::info!("SDHCI: No card detected");
                } else {
                    log::error!("SDHCI: Failed to initialize card: {}", e);
                }
                self.card_error = Some(e);
            }
        }

        Ok(())
    }

    /// Host version read at attach time
    pub fn version(&self) -> HostVersion {
        self.version
    }

    /// Mode chosen by [`Self::initialize`]
    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Register window
    pub fn registers(&self) -> &Registers<R> {
        &self.regs
    }

    /// The card at `index`. A slot holds at most one card, at index 0.
    pub fn device(&mut self, index: usize) -> Option<SdCard<'_, R, D>> {
        if index != 0 {
            return None;
        }
        let identity = self.card?;
        Some(SdCard::new(self, identity))
    }

    /// Identity of the initialized card, if any
    pub fn card(&self) -> Option<&CardIdentity> {
        self.card.as_ref()
    }

    /// Error of the last card bring-up, if it failed
    pub fn card_error(&self) -> Option<SdhciError> {
        self.card_error
    }

    /// Run `predicate` under the configured retry policy
    fn poll<F>(&mut self, predicate: F) -> bool
    where
        F: FnMut(&mut Self) -> bool,
    {
        let retry = self.config.retry;
        time::poll_until(self, retry, predicate)
    }

    /// Software reset of the whole host
    fn reset(&mut self) -> Result<(), SdhciError> {
        self.regs.set_host_configuration_0(HostConfiguration0::new(0));
        self.regs
            .modify_host_configuration_1(HOST_CONFIG_1::SOFTWARE_RESET_ALL::SET);

        let done = self.poll(|c| {
            !c.regs
                .host_configuration_1()
                .is_set(HOST_CONFIG_1::SOFTWARE_RESET_ALL)
        });
        if !done {
            log::error!("SDHCI: Reset timeout");
            return Err(SdhciError::IoTimeout);
        }
        Ok(())
    }

    /// Power the bus at the highest voltage the host supports
    fn power_on(&mut self) -> Result<(), SdhciError> {
        let caps = self.regs.capabilities();
        let voltage = if caps.is_set(CAPS::VOLTAGE_3V3) {
            HOST_CONFIG_0::SD_BUS_VOLTAGE::V3_3
        } else if caps.is_set(CAPS::VOLTAGE_3V0) {
            HOST_CONFIG_0::SD_BUS_VOLTAGE::V3_0
        } else if caps.is_set(CAPS::VOLTAGE_1V8) {
            HOST_CONFIG_0::SD_BUS_VOLTAGE::V1_8
        } else {
            log::error!("SDHCI: No supported bus voltage");
            return Err(SdhciError::Unsupported);
        };

        self.regs
            .modify_host_configuration_0(voltage + HOST_CONFIG_0::SD_BUS_POWER::CLEAR);
        self.regs
            .modify_host_configuration_0(HOST_CONFIG_0::SD_BUS_POWER::SET);
        Ok(())
    }

    /// Pick the transfer mode and program the DMA select field
    fn select_mode(&mut self) -> OperatingMode {
        let caps = self.regs.capabilities();
        let Some(arena_end) = self.dma.as_ref().map(DmaArena::phys_end) else {
            return OperatingMode::Pio;
        };
        if !caps.is_set(CAPS::ADMA2) {
            return OperatingMode::Pio;
        }

        let advertised = caps.is_set(CAPS::DMA_64BIT_ADDRESSING_V3);
        let addr64 = match self.config.adma64 {
            Adma64Policy::Disabled => false,
            Adma64Policy::Capability => advertised,
            Adma64Policy::LegacyInverted => advertised && self.version != HostVersion::V3,
        };

        if addr64 {
            self.regs
                .modify_host_configuration_0(HOST_CONFIG_0::DMA_SELECT::Adma64);
            OperatingMode::Adma2Addr64
        } else if arena_end > 1 << 32 {
            log::warn!("SDHCI: DMA arena above 4 GiB without 64-bit ADMA2, using PIO");
            OperatingMode::Pio
        } else {
            self.regs
                .modify_host_configuration_0(HOST_CONFIG_0::DMA_SELECT::Adma32);
            OperatingMode::Adma2Addr32
        }
    }
}
