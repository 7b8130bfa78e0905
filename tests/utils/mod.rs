//! Useful library code for tests
//!
//! A simulated SDHCI register window with one SD card behind it. Commands are
//! executed synchronously when the command register is written: the response
//! registers are filled, command complete is raised and data commands either
//! feed the buffer data port (PIO) or walk the ADMA2 descriptor table in the
//! DMA arena.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use hex_literal::hex;

use sdhc::drivers::sdhci::adma::ARENA_SIZE;
use sdhc::drivers::sdhci::regs::*;
use sdhc::{ControllerConfig, DmaArena, RegisterAccess, RetryPolicy, SdhciController};

pub const SPEC_V1: u32 = 0;
pub const SPEC_V2: u32 = 1;
pub const SPEC_V3: u32 = 2;
pub const SPEC_V4: u32 = 3;

pub const CAPS_BASE_CLOCK_50MHZ: u32 = 50 << 8;
pub const CAPS_ADMA2: u32 = 1 << 19;
pub const CAPS_HIGH_SPEED: u32 = 1 << 21;
pub const CAPS_3V3: u32 = 1 << 24;
pub const CAPS_64BIT: u32 = 1 << 28;

const INT_COMMAND_COMPLETE: u32 = 1 << 0;
const INT_TRANSFER_COMPLETE: u32 = 1 << 1;
const INT_BUFFER_WRITE_READY: u32 = 1 << 4;
const INT_BUFFER_READ_READY: u32 = 1 << 5;
const INT_ERROR: u32 = 1 << 15;
pub const INT_ADMA_ERROR: u32 = 1 << 25;

pub const OCR_POWER_UP: u32 = 1 << 31;
pub const OCR_CCS: u32 = 1 << 30;

pub const STATUS_APP_CMD: u32 = 1 << 5;
pub const STATUS_TRANSFER_STATE: u32 = 4 << 9;
pub const STATUS_ILLEGAL_COMMAND: u32 = 1 << 22;
pub const STATUS_BLOCK_LEN_ERROR: u32 = 1 << 29;
pub const STATUS_ADDRESS_ERROR: u32 = 1 << 30;

/// A card as seen from the bus
pub struct SimCard {
    pub answers_if_cond: bool,
    /// Value returned to CMD8 instead of the echoed argument
    pub if_cond_echo: Option<u32>,
    /// OCR once powered up (the busy bit is cleared while polling)
    pub ocr: u32,
    /// ACMD41 polls answered busy before power up
    pub busy_polls: u32,
    pub cid: u128,
    pub csd: u128,
    pub rca: u16,
    pub scr: [u8; 8],
    pub data: Vec<u8>,
    /// OR'ed into the R1 of every read/write command
    pub data_status_error: u32,
    pub app_cmd: bool,
    pub op_cond_polls: u32,
    /// CMD55s left unanswered before the card starts listening
    pub dropped_app_cmds: u32,
}

/// Bytes `i % 251` so neighbouring blocks differ
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

impl SimCard {
    /// Standard capacity card: CSD 1.0, C_SIZE 999, C_SIZE_MULT 2, READ_BL_LEN 9
    pub fn sdsc() -> Self {
        let csd = (999u128 << 62) | (2u128 << 47) | (9u128 << 80);
        Self::with_csd(0x80ff_8000, csd, 16000)
    }

    /// High capacity card: CSD 2.0 with the given C_SIZE
    pub fn sdhc(c_size: u32) -> Self {
        let csd = (1u128 << 126) | (u128::from(c_size) << 48) | (9u128 << 80);
        let blocks = (c_size as usize + 1) * 1024;
        Self::with_csd(0xc0ff_8000, csd, blocks)
    }

    fn with_csd(ocr: u32, csd: u128, blocks: usize) -> Self {
        Self {
            answers_if_cond: true,
            if_cond_echo: None,
            ocr,
            busy_polls: 2,
            cid: u128::from_be_bytes(hex!("03 53 44 53 55 30 38 47 80 12 34 ab cd 00 d4 00")),
            csd,
            rca: 0xb368,
            scr: hex!("02 35 80 00 00 00 00 00"),
            data: pattern(blocks * 512),
            data_status_error: 0,
            app_cmd: false,
            op_cond_polls: 0,
            dropped_app_cmds: 0,
        }
    }

    fn high_capacity(&self) -> bool {
        self.ocr & OCR_CCS != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuedCommand {
    pub index: u8,
    pub argument: u32,
    /// Full transfer mode and command register value
    pub word: u32,
}

impl IssuedCommand {
    pub fn dma(&self) -> bool {
        self.word & 1 != 0
    }

    pub fn block_count_enabled(&self) -> bool {
        self.word & (1 << 1) != 0
    }

    pub fn auto_cmd12(&self) -> bool {
        (self.word >> 2) & 0x3 == 1
    }

    pub fn multiblock(&self) -> bool {
        self.word & (1 << 5) != 0
    }
}

/// Where the test allocated the DMA arena and where the "device" sees it
#[derive(Clone, Copy)]
pub struct DmaWindow {
    virt: *mut u8,
    phys: u64,
    len: usize,
}

impl DmaWindow {
    fn slice(&self, phys: u64, len: usize) -> &'static mut [u8] {
        assert!(
            phys >= self.phys && phys + len as u64 <= self.phys + self.len as u64,
            "DMA access at {:#x}+{:#x} outside the arena",
            phys,
            len
        );
        unsafe {
            std::slice::from_raw_parts_mut(self.virt.add((phys - self.phys) as usize), len)
        }
    }
}

enum Pio {
    Read {
        data: VecDeque<u8>,
        block_size: usize,
        served: usize,
    },
    Write {
        offset: usize,
        block_size: usize,
        blocks: usize,
        received: Vec<u8>,
    },
}

enum Reply {
    /// The card does not answer
    Silent,
    Empty,
    Short(u32),
    Long(u128),
}

pub struct SimState {
    shadow: [u32; WINDOW_SIZE / 4],
    pub spec_version: u32,
    pub capabilities: u32,
    pub card: Option<SimCard>,
    pub interrupt_status: u32,
    pub responses: [u32; 4],
    pub commands: Vec<IssuedCommand>,
    pub cmd_inhibit_stuck: bool,
    pub dat_inhibit_stuck: bool,
    pub clock_never_stable: bool,
    pub reset_stuck: bool,
    pub adma_error: bool,
    /// Blocks moved by each ADMA2 command
    pub adma_sweeps: Vec<usize>,
    /// Descriptor size (8 or 12) seen by each ADMA2 command
    pub adma_descriptor_sizes: Vec<usize>,
    dma: Option<DmaWindow>,
    pio: Option<Pio>,
}

impl SimState {
    pub fn new(spec_version: u32, capabilities: u32, card: Option<SimCard>) -> Self {
        Self {
            shadow: [0; WINDOW_SIZE / 4],
            spec_version,
            capabilities,
            card,
            interrupt_status: 0,
            responses: [0; 4],
            commands: Vec::new(),
            cmd_inhibit_stuck: false,
            dat_inhibit_stuck: false,
            clock_never_stable: false,
            reset_stuck: false,
            adma_error: false,
            adma_sweeps: Vec::new(),
            adma_descriptor_sizes: Vec::new(),
            dma: None,
            pio: None,
        }
    }

    /// Version 2 host, 50 MHz base clock, 3.3V, no ADMA2, with `card`
    pub fn v2_pio(card: Option<SimCard>) -> Self {
        Self::new(SPEC_V2, CAPS_BASE_CLOCK_50MHZ | CAPS_3V3, card)
    }

    /// Version 3 host with ADMA2 (and 64-bit addressing if `addr64`)
    pub fn v3_adma(card: Option<SimCard>, addr64: bool) -> Self {
        let mut caps = CAPS_BASE_CLOCK_50MHZ | CAPS_3V3 | CAPS_ADMA2 | CAPS_HIGH_SPEED;
        if addr64 {
            caps |= CAPS_64BIT;
        }
        Self::new(SPEC_V3, caps, card)
    }

    pub fn register(&self, offset: usize) -> u32 {
        self.shadow[offset / 4]
    }

    pub fn command_indices(&self) -> Vec<u8> {
        self.commands.iter().map(|c| c.index).collect()
    }

    fn read(&mut self, offset: usize) -> u32 {
        match offset {
            PRESENT_STATE => {
                let mut value = 0;
                if self.cmd_inhibit_stuck {
                    value |= 1 << 0;
                }
                if self.dat_inhibit_stuck {
                    value |= 1 << 1;
                }
                if self.card.is_some() {
                    value |= (1 << 16) | (1 << 17);
                }
                value
            }
            HOST_CONFIGURATION_1 => {
                let mut value = self.shadow[offset / 4];
                if value & 1 != 0 && !self.clock_never_stable {
                    value |= 1 << 1;
                } else {
                    value &= !(1 << 1);
                }
                value
            }
            INTERRUPT_STATUS => self.interrupt_status,
            CAPABILITIES => self.capabilities,
            SLOT_INTERRUPT_STATUS_AND_VERSION => self.spec_version << 16,
            BUFFER_DATA_PORT => self.read_data_port(),
            o if (RESPONSE_0..RESPONSE_0 + 16).contains(&o) => self.responses[(o - RESPONSE_0) / 4],
            _ => self.shadow[offset / 4],
        }
    }

    fn write(&mut self, offset: usize, value: u32) {
        match offset {
            INTERRUPT_STATUS => self.interrupt_status &= !value,
            HOST_CONFIGURATION_1 => {
                if value & (1 << 24) != 0 {
                    if self.reset_stuck {
                        self.shadow[offset / 4] = value;
                        return;
                    }
                    self.shadow[HOST_CONFIGURATION_0 / 4] = 0;
                    self.shadow[offset / 4] = 0;
                    self.interrupt_status = 0;
                    self.pio = None;
                    return;
                }
                self.shadow[offset / 4] = value & !(0x7 << 24);
            }
            BUFFER_DATA_PORT => self.write_data_port(value),
            TRANSFER_MODE_AND_COMMAND => {
                self.shadow[offset / 4] = value;
                self.dispatch(value);
            }
            _ => self.shadow[offset / 4] = value,
        }
    }

    fn dispatch(&mut self, word: u32) {
        let index = ((word >> 24) & 0x3f) as u8;
        let argument = self.shadow[ARGUMENT_1 / 4];
        self.commands.push(IssuedCommand {
            index,
            argument,
            word,
        });

        let reply = {
            let Some(card) = self.card.as_mut() else {
                return;
            };
            let app = std::mem::take(&mut card.app_cmd);
            match (app, index) {
                (_, 0) => Reply::Empty,
                (_, 8) => {
                    if card.answers_if_cond {
                        Reply::Short(card.if_cond_echo.unwrap_or(argument & 0xfff))
                    } else {
                        Reply::Silent
                    }
                }
                (_, 55) if card.dropped_app_cmds > 0 => {
                    card.dropped_app_cmds -= 1;
                    Reply::Silent
                }
                (_, 55) => {
                    card.app_cmd = true;
                    Reply::Short(STATUS_APP_CMD | STATUS_TRANSFER_STATE)
                }
                (true, 41) => {
                    card.op_cond_polls += 1;
                    if card.op_cond_polls > card.busy_polls {
                        Reply::Short(card.ocr)
                    } else {
                        Reply::Short(card.ocr & !OCR_POWER_UP)
                    }
                }
                (_, 2) => Reply::Long(card.cid),
                (_, 3) => Reply::Short((u32::from(card.rca) << 16) | 0x0500),
                (_, 9) => Reply::Long(card.csd),
                (_, 7) => Reply::Short(3 << 9),
                (_, 16) if argument > 512 => {
                    Reply::Short(STATUS_TRANSFER_STATE | STATUS_BLOCK_LEN_ERROR)
                }
                (_, 16) => Reply::Short(STATUS_TRANSFER_STATE),
                (true, 6) | (true, 51) => Reply::Short(STATUS_TRANSFER_STATE | STATUS_APP_CMD),
                (_, 17 | 18 | 24 | 25) => {
                    Reply::Short(STATUS_TRANSFER_STATE | card.data_status_error)
                }
                (_, 12) => Reply::Short(STATUS_TRANSFER_STATE),
                _ => Reply::Short(STATUS_ILLEGAL_COMMAND),
            }
        };

        match reply {
            Reply::Silent => return,
            Reply::Empty => self.responses = [0; 4],
            Reply::Short(value) => self.responses = [value, 0, 0, 0],
            Reply::Long(value) => {
                let raw = value >> 8;
                self.responses = [
                    raw as u32,
                    (raw >> 32) as u32,
                    (raw >> 64) as u32,
                    (raw >> 96) as u32,
                ];
            }
        }
        self.interrupt_status |= INT_COMMAND_COMPLETE;

        if word & (1 << 21) != 0 {
            self.start_data(index, argument, word);
        }
    }

    fn start_data(&mut self, index: u8, argument: u32, word: u32) {
        let card = self.card.as_ref().unwrap();
        let read = word & (1 << 4) != 0;
        let block_size = (self.shadow[BLOCK_SIZE_AND_BLOCK_COUNT / 4] & 0xfff) as usize;

        if index == 51 {
            self.pio = Some(Pio::Read {
                data: card.scr.iter().copied().collect(),
                block_size: 8,
                served: 0,
            });
            self.interrupt_status |= INT_BUFFER_READ_READY;
            return;
        }

        let offset = if card.high_capacity() {
            argument as usize * 512
        } else {
            argument as usize
        };

        if word & 1 != 0 {
            self.run_adma(read, offset);
            return;
        }

        let blocks = if word & (1 << 5) != 0 {
            (self.shadow[BLOCK_SIZE_AND_BLOCK_COUNT / 4] >> 16) as usize
        } else {
            1
        };
        let len = blocks * block_size;
        if read {
            self.pio = Some(Pio::Read {
                data: card.data[offset..offset + len].iter().copied().collect(),
                block_size,
                served: 0,
            });
            self.interrupt_status |= INT_BUFFER_READ_READY;
        } else {
            self.pio = Some(Pio::Write {
                offset,
                block_size,
                blocks,
                received: Vec::with_capacity(len),
            });
            self.interrupt_status |= INT_BUFFER_WRITE_READY;
        }
    }

    fn read_data_port(&mut self) -> u32 {
        let (word, block_done, finished) = match self.pio.as_mut() {
            Some(Pio::Read {
                data,
                block_size,
                served,
            }) => {
                let mut bytes = [0u8; 4];
                for byte in bytes.iter_mut() {
                    *byte = data.pop_front().unwrap_or(0);
                }
                *served += 4;
                (
                    u32::from_le_bytes(bytes),
                    *served % *block_size == 0,
                    data.is_empty(),
                )
            }
            _ => return 0,
        };

        if block_done {
            if finished {
                self.pio = None;
                self.interrupt_status |= INT_TRANSFER_COMPLETE;
            } else {
                self.interrupt_status |= INT_BUFFER_READ_READY;
            }
        }
        word
    }

    fn write_data_port(&mut self, value: u32) {
        let (offset, received) = match self.pio.as_mut() {
            Some(Pio::Write {
                offset,
                block_size,
                blocks,
                received,
            }) => {
                received.extend_from_slice(&value.to_le_bytes());
                if received.len() % *block_size != 0 {
                    return;
                }
                if received.len() < *block_size * *blocks {
                    self.interrupt_status |= INT_BUFFER_WRITE_READY;
                    return;
                }
                (*offset, std::mem::take(received))
            }
            _ => return,
        };

        self.pio = None;
        let card = self.card.as_mut().unwrap();
        card.data[offset..offset + received.len()].copy_from_slice(&received);
        self.interrupt_status |= INT_TRANSFER_COMPLETE;
    }

    fn run_adma(&mut self, read: bool, mut card_offset: usize) {
        if self.adma_error {
            // Error while fetching the first descriptor
            self.shadow[ADMA_ERROR_STATUS / 4] = 0b01;
            self.interrupt_status |= INT_ADMA_ERROR | INT_ERROR;
            return;
        }

        let dma = self.dma.expect("ADMA2 command without a DMA arena");
        let select = (self.shadow[HOST_CONFIGURATION_0 / 4] >> 3) & 0x3;
        let entry_size = match select {
            2 => 8,
            3 => 12,
            other => panic!("ADMA2 command with DMA select {}", other),
        };
        let mut table = u64::from(self.shadow[ADMA_SYSTEM_ADDRESS_0 / 4])
            | (u64::from(self.shadow[ADMA_SYSTEM_ADDRESS_1 / 4]) << 32);
        let card = self.card.as_mut().unwrap();
        let mut moved = 0;

        loop {
            let entry = dma.slice(table, entry_size);
            let attributes = u16::from_le_bytes([entry[0], entry[1]]);
            let length = u16::from_le_bytes([entry[2], entry[3]]);
            let low = u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]);
            let mut address = u64::from(low);
            if entry_size == 12 {
                let high = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]);
                address |= u64::from(high) << 32;
            }
            assert!(attributes & 1 != 0, "invalid descriptor at {:#x}", table);
            assert_eq!(attributes & 0x30, 0x20, "descriptor action is not transfer");

            let len = if length == 0 { 65536 } else { usize::from(length) };
            let memory = dma.slice(address, len);
            if read {
                memory.copy_from_slice(&card.data[card_offset..card_offset + len]);
            } else {
                card.data[card_offset..card_offset + len].copy_from_slice(memory);
            }
            card_offset += len;
            moved += len / 512;

            if attributes & 0b10 != 0 {
                break;
            }
            table += entry_size as u64;
        }

        self.adma_sweeps.push(moved);
        self.adma_descriptor_sizes.push(entry_size);
        self.interrupt_status |= INT_TRANSFER_COMPLETE;
    }
}

/// Register window backed by a [`SimState`]
pub struct SimulatedHost {
    state: Rc<RefCell<SimState>>,
}

impl RegisterAccess for SimulatedHost {
    fn read32(&self, offset: usize) -> u32 {
        self.state.borrow_mut().read(offset)
    }

    fn write32(&mut self, offset: usize, value: u32) {
        self.state.borrow_mut().write(offset, value)
    }
}

/// Delay that returns immediately and counts what was asked for
#[derive(Default)]
pub struct NoDelay {
    pub total_ns: u64,
}

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }
}

pub type TestController = SdhciController<SimulatedHost, NoDelay>;

pub struct Fixture {
    pub state: Rc<RefCell<SimState>>,
    pub controller: TestController,
    _dma_memory: Option<Vec<u64>>,
}

impl Fixture {
    pub fn state(&self) -> std::cell::RefMut<'_, SimState> {
        self.state.borrow_mut()
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small retry budget so failure paths finish quickly
pub fn quick_config() -> ControllerConfig {
    ControllerConfig {
        retry: RetryPolicy {
            max_attempts: 20,
            delay_us: 10,
        },
        ..ControllerConfig::default()
    }
}

/// Attach a controller to `state`; with `dma_phys` a DMA arena is handed
/// over that the simulated device sees at that bus address.
pub fn attach(state: SimState, dma_phys: Option<u64>, config: ControllerConfig) -> Fixture {
    init_logging();
    let state = Rc::new(RefCell::new(state));
    let mut dma_memory = None;

    let arena = dma_phys.map(|phys| {
        let mut backing = vec![0u64; ARENA_SIZE / 8];
        let virt = backing.as_mut_ptr().cast::<u8>();
        state.borrow_mut().dma = Some(DmaWindow {
            virt,
            phys,
            len: ARENA_SIZE,
        });
        dma_memory = Some(backing);
        unsafe { DmaArena::from_raw_parts(NonNull::new(virt).unwrap(), ARENA_SIZE, phys) }
    });

    let host = SimulatedHost {
        state: Rc::clone(&state),
    };
    let controller = SdhciController::new(host, NoDelay::default(), arena, config);
    Fixture {
        state,
        controller,
        _dma_memory: dma_memory,
    }
}

/// Attach and initialize, asserting the controller itself came up
pub fn attach_initialized(
    state: SimState,
    dma_phys: Option<u64>,
    config: ControllerConfig,
) -> Fixture {
    let mut fixture = attach(state, dma_phys, config);
    fixture.controller.initialize().expect("initialize");
    fixture
}
