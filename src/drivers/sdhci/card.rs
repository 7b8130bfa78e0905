//! SD card bring-up and card registers
//!
//! Takes a freshly powered card from idle to the transfer state and records
//! what it reported on the way (OCR, CID, RCA, CSD, SCR).

use embedded_hal::delay::DelayNs;

use super::command::{
    ALL_SEND_CID, APP_CMD, APP_SEND_OP_COND, APP_SEND_SCR, APP_SET_BUS_WIDTH, GO_IDLE_STATE,
    SELECT_CARD, SEND_CSD, SEND_IF_COND, SEND_RELATIVE_ADDR, SET_BLOCK_LEN,
};
use super::regs::{CAPS, HOST_CONFIG_0, INTERRUPT, PRESENT, RegisterAccess};
use super::transfer::DataBuffer;
use super::{DEFAULT_CLOCK_HZ, HIGH_SPEED_CLOCK_HZ, INIT_CLOCK_HZ, SdhciController, SdhciError};
use crate::block::{BLOCK_LEN, BLOCK_LEN_U32, BlockDevice};
use crate::time;

/// CMD8 argument: 2.7-3.6V supply plus check pattern 0xAA
pub const IF_COND_PATTERN: u32 = 0x1aa;

/// OCR voltage window 2.7-3.6V (bits 23:15)
pub const OCR_VOLTAGE_WINDOW: u32 = 0x00ff_8000;

/// OCR Card Capacity Status / Host Capacity Support
pub const OCR_CCS: u32 = 1 << 30;

/// OCR card power up status (busy bit, set when ready)
pub const OCR_POWER_UP: u32 = 1 << 31;

/// ACMD41 argument: full voltage window, high capacity supported
pub const OP_COND_ARGUMENT: u32 = OCR_VOLTAGE_WINDOW | OCR_CCS;

/// ACMD6 argument selecting a 4-bit bus
const BUS_WIDTH_4BIT: u32 = 0b10;

/// Bytes of the SCR register
const SCR_LEN: u32 = 8;

/// Extract bits `high..=low` of a 128-bit register
fn bits128(value: u128, high: u32, low: u32) -> u32 {
    ((value >> low) & ((1u128 << (high - low + 1)) - 1)) as u32
}

/// Operation Conditions Register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ocr(pub u32);

impl Ocr {
    /// Card finished its power up routine
    pub fn power_up_status(&self) -> bool {
        self.0 & OCR_POWER_UP != 0
    }

    /// High (SDHC) or extended (SDXC) capacity card
    pub fn card_capacity_status(&self) -> bool {
        self.0 & OCR_CCS != 0
    }

    pub fn voltage_window(&self) -> u32 {
        self.0 & OCR_VOLTAGE_WINDOW
    }
}

/// Card Identification register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cid(pub u128);

impl Cid {
    pub fn manufacturer_id(&self) -> u8 {
        bits128(self.0, 127, 120) as u8
    }

    /// Two ASCII characters
    pub fn oem_id(&self) -> [u8; 2] {
        (bits128(self.0, 119, 104) as u16).to_be_bytes()
    }

    /// Five character product name; non printable bytes read as '?'
    pub fn product_name(&self) -> heapless::String<5> {
        let raw = (((self.0 >> 64) & 0xff_ffff_ffff) as u64).to_be_bytes();
        let mut name = heapless::String::new();
        for &byte in &raw[3..] {
            let c = if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '?'
            };
            if name.push(c).is_err() {
                break;
            }
        }
        name
    }

    /// (major, minor)
    pub fn product_revision(&self) -> (u8, u8) {
        let prv = bits128(self.0, 63, 56) as u8;
        (prv >> 4, prv & 0xf)
    }

    pub fn serial_number(&self) -> u32 {
        bits128(self.0, 55, 24)
    }

    /// (year, month)
    pub fn manufacturing_date(&self) -> (u16, u8) {
        let year = 2000 + bits128(self.0, 19, 12) as u16;
        let month = bits128(self.0, 11, 8) as u8;
        (year, month)
    }
}

/// Card Specific Data register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Csd(pub u128);

impl Csd {
    /// CSD_STRUCTURE: 0 for version 1.0, 1 for version 2.0
    pub fn structure(&self) -> u32 {
        bits128(self.0, 127, 126)
    }

    /// READ_BL_LEN (log2 of the block length)
    pub fn max_read_data_block_length(&self) -> u32 {
        bits128(self.0, 83, 80)
    }

    /// C_SIZE; 12 bits in version 1.0, 22 bits in version 2.0
    pub fn device_size(&self) -> u32 {
        match self.structure() {
            0 => bits128(self.0, 73, 62),
            _ => bits128(self.0, 69, 48),
        }
    }

    /// C_SIZE_MULT (version 1.0 only)
    pub fn device_size_multiplier(&self) -> u32 {
        bits128(self.0, 49, 47)
    }

    /// Capacity in 512-byte blocks
    pub fn block_count(&self) -> u64 {
        match self.structure() {
            0 => {
                let blocknr =
                    u64::from(self.device_size() + 1) << (self.device_size_multiplier() + 2);
                let block_len = 1u64 << self.max_read_data_block_length();
                blocknr * block_len / BLOCK_LEN as u64
            }
            _ => u64::from(self.device_size() + 1) * 1024,
        }
    }
}

/// SD Configuration Register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scr(pub u64);

impl Scr {
    pub fn structure(&self) -> u8 {
        (self.0 >> 60) as u8 & 0xf
    }

    /// SD_SPEC field
    pub fn spec_version(&self) -> u8 {
        (self.0 >> 56) as u8 & 0xf
    }

    /// SD_BUS_WIDTHS field (bit 0: 1-bit, bit 2: 4-bit)
    pub fn bus_widths(&self) -> u8 {
        (self.0 >> 48) as u8 & 0xf
    }

    pub fn supports_4bit_bus(&self) -> bool {
        self.bus_widths() & 0b100 != 0
    }
}

/// Address of a card within the storage stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LunAddress {
    pub controller_id: u32,
    pub target_id: u32,
    pub disk_id: u32,
}

/// Everything learnt about the card during bring-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardIdentity {
    pub lun: LunAddress,
    pub block_size: u32,
    pub block_count: u64,
    /// RCA in argument position (bits 31:16)
    pub rca: u32,
    pub ocr: Ocr,
    pub cid: Cid,
    pub csd: Csd,
    pub scr: Scr,
}

impl CardIdentity {
    /// The 16-bit relative card address
    pub fn relative_address(&self) -> u16 {
        (self.rca >> 16) as u16
    }

    pub fn high_capacity(&self) -> bool {
        self.ocr.card_capacity_status()
    }

    pub fn capacity(&self) -> u64 {
        self.block_count * u64::from(self.block_size)
    }

    /// Data command argument for `block`: a byte address on standard
    /// capacity cards, the block number otherwise.
    pub fn data_address(&self, block: u64) -> Result<u32, SdhciError> {
        let address = if self.high_capacity() {
            block
        } else {
            block * BLOCK_LEN as u64
        };
        u32::try_from(address).map_err(|_| SdhciError::InvalidParameter)
    }
}

impl<R: RegisterAccess, D: DelayNs> SdhciController<R, D> {
    /// Bring up the card in the slot.
    pub(super) fn init_card(&mut self) -> Result<CardIdentity, SdhciError> {
        if !self
            .regs
            .present_state()
            .is_set(PRESENT::CARD_INSERTED)
        {
            return Err(SdhciError::NoDevice);
        }
        log::info!("SDHCI: Card detected");

        // Firmware may have left the clock running
        if self.clock_enabled() {
            self.stop()?;
        }
        self.supply(INIT_CLOCK_HZ)?;

        log::debug!("SDHCI: Sending CMD0 (GO_IDLE_STATE)");
        self.send_command(GO_IDLE_STATE, 0)?;

        log::debug!("SDHCI: Sending CMD8 (SEND_IF_COND)");
        let echo = match self.send_command(SEND_IF_COND, IF_COND_PATTERN) {
            Ok(response) => response.short(),
            Err(SdhciError::IoTimeout) => {
                log::info!("SDHCI: No answer to CMD8, card not supported");
                return Err(SdhciError::Unsupported);
            }
            Err(e) => return Err(e),
        };
        if echo & 0xfff != IF_COND_PATTERN {
            log::debug!("SDHCI: CMD8 response mismatch: {:#x}", echo);
            return Err(SdhciError::NoDevice);
        }

        let ocr = self.negotiate_operating_condition()?;
        log::info!(
            "SDHCI: Card type: {}",
            if ocr.card_capacity_status() {
                "SDHC/SDXC"
            } else {
                "SDSC"
            }
        );

        log::debug!("SDHCI: Sending CMD2 (ALL_SEND_CID)");
        let cid = Cid(self.send_command(ALL_SEND_CID, 0)?.long());
        log::debug!("SDHCI: CID: {:032x}", cid.0);

        log::debug!("SDHCI: Sending CMD3 (SEND_RELATIVE_ADDR)");
        let rca = self.send_command(SEND_RELATIVE_ADDR, 0)?.short() & 0xffff_0000;
        log::debug!("SDHCI: RCA={:#06x}", rca >> 16);

        log::debug!("SDHCI: Sending CMD9 (SEND_CSD)");
        let csd = Csd(self.send_command(SEND_CSD, rca)?.long());
        log::debug!(
            "SDHCI: CSD v{}.0: c_size={}, c_size_mult={}, read_bl_len={}",
            csd.structure() + 1,
            csd.device_size(),
            csd.device_size_multiplier(),
            csd.max_read_data_block_length()
        );
        let block_count = csd.block_count();

        if self.regs.capabilities().is_set(CAPS::HIGH_SPEED) {
            self.regs
                .modify_host_configuration_0(HOST_CONFIG_0::HIGH_SPEED_ENABLE::SET);
            self.frequency_change(HIGH_SPEED_CLOCK_HZ)?;
        } else {
            self.frequency_change(DEFAULT_CLOCK_HZ)?;
        }

        log::debug!("SDHCI: Sending CMD7 (SELECT_CARD)");
        self.send_command(SELECT_CARD, rca)?;

        // High capacity cards are fixed at 512 byte blocks
        if !ocr.card_capacity_status() {
            log::debug!("SDHCI: Sending CMD16 (SET_BLOCKLEN)");
            self.send_command(SET_BLOCK_LEN, BLOCK_LEN_U32)?;
        }

        log::debug!("SDHCI: Sending ACMD51 (SEND_SCR)");
        self.send_command(APP_CMD, rca)?;
        let mut raw_scr = [0u8; SCR_LEN as usize];
        self.transaction_control_with_data_transfer_using_the_dat_line_without_dma(
            APP_SEND_SCR,
            0,
            SCR_LEN,
            1,
            DataBuffer::Read(&mut raw_scr),
        )?;
        let scr = Scr(u64::from_be_bytes(raw_scr));
        log::debug!("SDHCI: SCR: {:016x}", scr.0);

        log::debug!("SDHCI: Switching to 4-bit mode");
        let mut enable = self.regs.interrupt_status_enable();
        enable.modify(INTERRUPT::CARD_INTERRUPT::CLEAR);
        self.regs.set_interrupt_status_enable(enable);
        self.send_app_command(rca, APP_SET_BUS_WIDTH, BUS_WIDTH_4BIT)?;
        self.regs
            .modify_host_configuration_0(HOST_CONFIG_0::DATA_TRANSFER_WIDTH_4BIT::SET);

        let identity = CardIdentity {
            lun: LunAddress {
                controller_id: self.config.controller_id,
                target_id: 0,
                disk_id: 0,
            },
            block_size: BLOCK_LEN_U32,
            block_count,
            rca,
            ocr,
            cid,
            csd,
            scr,
        };

        log::info!(
            "SDHCI: Card initialized: {} {} blocks x {} bytes = {} MB",
            cid.product_name(),
            identity.block_count,
            identity.block_size,
            identity.capacity() / (1024 * 1024)
        );

        Ok(identity)
    }

    /// ACMD41 loop until the card reports power up
    fn negotiate_operating_condition(&mut self) -> Result<Ocr, SdhciError> {
        log::debug!("SDHCI: Starting ACMD41 loop");
        let retry = self.config.retry;
        let mut ocr = Ocr(0);
        let mut failure = None;

        let ready = time::poll_until(self, retry, |c| {
            match c.send_app_command(0, APP_SEND_OP_COND, OP_COND_ARGUMENT) {
                Ok(response) => {
                    let reported = Ocr(response.short());
                    if reported.voltage_window() & OCR_VOLTAGE_WINDOW == 0 {
                        log::error!("SDHCI: Card voltage window {:#010x} unusable", reported.0);
                        failure = Some(SdhciError::NoDevice);
                        return true;
                    }
                    ocr = reported;
                    ocr.power_up_status()
                }
                Err(e) => {
                    log::debug!("SDHCI: ACMD41 failed ({}), retrying", e);
                    false
                }
            }
        });

        if let Some(e) = failure {
            return Err(e);
        }
        if !ready {
            log::error!("SDHCI: Card initialization timeout");
            return Err(SdhciError::IoError);
        }
        log::debug!("SDHCI: Card ready, OCR={:#010x}", ocr.0);
        Ok(ocr)
    }
}

/// Handle to the initialized card of a controller
pub struct SdCard<'a, R, D> {
    controller: &'a mut SdhciController<R, D>,
    identity: CardIdentity,
}

impl<'a, R: RegisterAccess, D: DelayNs> SdCard<'a, R, D> {
    pub(super) fn new(controller: &'a mut SdhciController<R, D>, identity: CardIdentity) -> Self {
        Self {
            controller,
            identity,
        }
    }

    pub fn identity(&self) -> &CardIdentity {
        &self.identity
    }

    pub fn lun(&self) -> LunAddress {
        self.identity.lun
    }
}

impl<R: RegisterAccess, D: DelayNs> BlockDevice for SdCard<'_, R, D> {
    type Error = SdhciError;

    fn read_block(
        &mut self,
        block_address: u64,
        block_count: u32,
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.controller.read_block(block_address, block_count, buffer)
    }

    fn write_block(
        &mut self,
        block_address: u64,
        block_count: u32,
        buffer: &[u8],
    ) -> Result<(), Self::Error> {
        self.controller.write_block(block_address, block_count, buffer)
    }

    fn block_size(&self) -> u32 {
        self.identity.block_size
    }

    fn block_count(&self) -> u64 {
        self.identity.block_count
    }
}
