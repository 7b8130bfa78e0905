//! SDHCI Register Definitions
//!
//! This module describes the standard SDHCI (SD Host Controller Interface)
//! register window as specified in the SD Host Controller Simplified
//! Specification. Every register is accessed as a 32-bit word at a fixed
//! offset; bitfields are described with tock-registers and interpreted on
//! local copies, so the same accessors work against real MMIO or against a
//! simulated window.

use core::ptr::{self, NonNull};
use tock_registers::fields::FieldValue;
use tock_registers::{LocalRegisterCopy, RegisterLongName, register_bitfields};

// ============================================================================
// Register Offsets
// ============================================================================

/// SDMA System Address / Argument 2
pub const ARGUMENT_2: usize = 0x00;

/// Block Size (bits 15:0) and Block Count (bits 31:16)
pub const BLOCK_SIZE_AND_BLOCK_COUNT: usize = 0x04;

/// Argument 1
pub const ARGUMENT_1: usize = 0x08;

/// Transfer Mode (bits 15:0) and Command (bits 31:16)
///
/// Writing the upper half dispatches the command.
pub const TRANSFER_MODE_AND_COMMAND: usize = 0x0C;

/// Response registers (4 DWORDs: 0x10, 0x14, 0x18, 0x1C)
pub const RESPONSE_0: usize = 0x10;

/// Buffer Data Port
pub const BUFFER_DATA_PORT: usize = 0x20;

/// Present State
pub const PRESENT_STATE: usize = 0x24;

/// Host Control 1, Power Control, Block Gap Control, Wakeup Control
pub const HOST_CONFIGURATION_0: usize = 0x28;

/// Clock Control, Timeout Control, Software Reset
pub const HOST_CONFIGURATION_1: usize = 0x2C;

/// Normal (bits 15:0) and Error (bits 31:16) Interrupt Status
pub const INTERRUPT_STATUS: usize = 0x30;

/// Normal and Error Interrupt Status Enable
pub const INTERRUPT_STATUS_ENABLE: usize = 0x34;

/// Normal and Error Interrupt Signal Enable
pub const INTERRUPT_SIGNAL_ENABLE: usize = 0x38;

/// Auto CMD Error Status and Host Control 2
pub const HOST_CONFIGURATION_2: usize = 0x3C;

/// Capabilities (lower 32 bits)
pub const CAPABILITIES: usize = 0x40;

/// Capabilities (upper 32 bits)
pub const CAPABILITIES_1: usize = 0x44;

/// ADMA Error Status
pub const ADMA_ERROR_STATUS: usize = 0x54;

/// ADMA System Address (low 32 bits)
pub const ADMA_SYSTEM_ADDRESS_0: usize = 0x58;

/// ADMA System Address (high 32 bits)
pub const ADMA_SYSTEM_ADDRESS_1: usize = 0x5C;

/// Slot Interrupt Status (bits 15:0) and Host Controller Version (bits 31:16)
pub const SLOT_INTERRUPT_STATUS_AND_VERSION: usize = 0xFC;

/// Size of the register window in bytes
pub const WINDOW_SIZE: usize = 0x100;

// ============================================================================
// Register Bitfield Definitions
// ============================================================================

register_bitfields! [
    u32,
    /// Block Size and Block Count Register (0x04)
    pub BLOCK_SIZE_COUNT [
        /// Transfer Block Size
        BLOCK_SIZE OFFSET(0) NUMBITS(12) [],
        /// SDMA Buffer Boundary
        SDMA_BOUNDARY OFFSET(12) NUMBITS(3) [],
        /// Blocks Count For Current Transfer
        BLOCK_COUNT OFFSET(16) NUMBITS(16) []
    ],

    /// Transfer Mode and Command Register (0x0C)
    pub TRANSFER_COMMAND [
        /// DMA Enable
        DMA_ENABLE OFFSET(0) NUMBITS(1) [],
        /// Block Count Enable
        BLOCK_COUNT_ENABLE OFFSET(1) NUMBITS(1) [],
        /// Auto CMD Enable
        AUTO_COMMAND OFFSET(2) NUMBITS(2) [
            Disabled = 0,
            Cmd12 = 1,
            Cmd23 = 2
        ],
        /// Data Transfer Direction Select (1 = card to host)
        DIRECTION OFFSET(4) NUMBITS(1) [
            HostToCard = 0,
            CardToHost = 1
        ],
        /// Multi / Single Block Select
        MULTIBLOCK OFFSET(5) NUMBITS(1) [],
        /// Response Type Select
        RESPONSE_TYPE OFFSET(16) NUMBITS(2) [
            NoResponse = 0,
            Long136 = 1,
            Short48 = 2,
            Short48Busy = 3
        ],
        /// Command CRC Check Enable
        CRC_CHECK OFFSET(19) NUMBITS(1) [],
        /// Command Index Check Enable
        INDEX_CHECK OFFSET(20) NUMBITS(1) [],
        /// Data Present Select
        DATA_PRESENT OFFSET(21) NUMBITS(1) [],
        /// Command Type
        COMMAND_TYPE OFFSET(22) NUMBITS(2) [
            Normal = 0,
            Suspend = 1,
            Resume = 2,
            Abort = 3
        ],
        /// Command Index
        INDEX OFFSET(24) NUMBITS(6) []
    ],

    /// Present State Register (0x24)
    pub PRESENT [
        /// Command Inhibit (CMD)
        COMMAND_INHIBIT_CMD OFFSET(0) NUMBITS(1) [],
        /// Command Inhibit (DAT)
        COMMAND_INHIBIT_DAT OFFSET(1) NUMBITS(1) [],
        /// DAT Line Active
        DAT_LINE_ACTIVE OFFSET(2) NUMBITS(1) [],
        /// Write Transfer Active
        WRITE_TRANSFER_ACTIVE OFFSET(8) NUMBITS(1) [],
        /// Read Transfer Active
        READ_TRANSFER_ACTIVE OFFSET(9) NUMBITS(1) [],
        /// Buffer Write Enable
        BUFFER_WRITE_ENABLE OFFSET(10) NUMBITS(1) [],
        /// Buffer Read Enable
        BUFFER_READ_ENABLE OFFSET(11) NUMBITS(1) [],
        /// Card Inserted
        CARD_INSERTED OFFSET(16) NUMBITS(1) [],
        /// Card State Stable
        CARD_STATE_STABLE OFFSET(17) NUMBITS(1) [],
        /// Card Detect Pin Level
        CARD_DETECT_PIN_LEVEL OFFSET(18) NUMBITS(1) [],
        /// Write Protect Switch Pin Level
        WRITE_PROTECT_PIN_LEVEL OFFSET(19) NUMBITS(1) [],
        /// DAT[3:0] Line Signal Level
        DAT_LINE_LEVEL OFFSET(20) NUMBITS(4) []
    ],

    /// Host Configuration 0 (0x28): Host Control 1, Power Control, Block Gap, Wakeup
    pub HOST_CONFIG_0 [
        /// LED Control
        LED OFFSET(0) NUMBITS(1) [],
        /// Data Transfer Width (1 = 4-bit mode)
        DATA_TRANSFER_WIDTH_4BIT OFFSET(1) NUMBITS(1) [],
        /// High Speed Enable
        HIGH_SPEED_ENABLE OFFSET(2) NUMBITS(1) [],
        /// DMA Select
        DMA_SELECT OFFSET(3) NUMBITS(2) [
            Sdma = 0,
            Adma32 = 2,
            Adma64 = 3
        ],
        /// Extended Data Transfer Width (1 = 8-bit mode)
        EXTENDED_DATA_TRANSFER_WIDTH OFFSET(5) NUMBITS(1) [],
        /// SD Bus Power
        SD_BUS_POWER OFFSET(8) NUMBITS(1) [],
        /// SD Bus Voltage Select
        SD_BUS_VOLTAGE OFFSET(9) NUMBITS(3) [
            V1_8 = 5,
            V3_0 = 6,
            V3_3 = 7
        ]
    ],

    /// Host Configuration 1 (0x2C): Clock Control, Timeout Control, Software Reset
    pub HOST_CONFIG_1 [
        /// Internal Clock Enable
        INTERNAL_CLOCK_ENABLE OFFSET(0) NUMBITS(1) [],
        /// Internal Clock Stable
        INTERNAL_CLOCK_STABLE OFFSET(1) NUMBITS(1) [],
        /// SD Clock Enable
        SD_CLOCK_ENABLE OFFSET(2) NUMBITS(1) [],
        /// Clock Generator Select (SDHCI 3.0+)
        CLOCK_GENERATOR_SELECT OFFSET(5) NUMBITS(1) [],
        /// Upper Bits of SDCLK Frequency Select (SDHCI 3.0+)
        SDCLK_FREQUENCY_SELECT_HIGH OFFSET(6) NUMBITS(2) [],
        /// SDCLK Frequency Select
        SDCLK_FREQUENCY_SELECT OFFSET(8) NUMBITS(8) [],
        /// Data Timeout Counter Value
        DATA_TIMEOUT_COUNTER OFFSET(16) NUMBITS(4) [],
        /// Software Reset For All
        SOFTWARE_RESET_ALL OFFSET(24) NUMBITS(1) [],
        /// Software Reset For CMD Line
        SOFTWARE_RESET_CMD OFFSET(25) NUMBITS(1) [],
        /// Software Reset For DAT Line
        SOFTWARE_RESET_DAT OFFSET(26) NUMBITS(1) []
    ],

    /// Interrupt Status / Status Enable / Signal Enable (0x30, 0x34, 0x38)
    pub INTERRUPT [
        /// Command Complete
        COMMAND_COMPLETE OFFSET(0) NUMBITS(1) [],
        /// Transfer Complete
        TRANSFER_COMPLETE OFFSET(1) NUMBITS(1) [],
        /// Block Gap Event
        BLOCK_GAP_EVENT OFFSET(2) NUMBITS(1) [],
        /// DMA Interrupt
        DMA_INTERRUPT OFFSET(3) NUMBITS(1) [],
        /// Buffer Write Ready
        BUFFER_WRITE_READY OFFSET(4) NUMBITS(1) [],
        /// Buffer Read Ready
        BUFFER_READ_READY OFFSET(5) NUMBITS(1) [],
        /// Card Insertion
        CARD_INSERTION OFFSET(6) NUMBITS(1) [],
        /// Card Removal
        CARD_REMOVAL OFFSET(7) NUMBITS(1) [],
        /// Card Interrupt
        CARD_INTERRUPT OFFSET(8) NUMBITS(1) [],
        /// Error Interrupt
        ERROR_INTERRUPT OFFSET(15) NUMBITS(1) [],
        /// Command Timeout Error
        COMMAND_TIMEOUT_ERROR OFFSET(16) NUMBITS(1) [],
        /// Command CRC Error
        COMMAND_CRC_ERROR OFFSET(17) NUMBITS(1) [],
        /// Command End Bit Error
        COMMAND_END_BIT_ERROR OFFSET(18) NUMBITS(1) [],
        /// Command Index Error
        COMMAND_INDEX_ERROR OFFSET(19) NUMBITS(1) [],
        /// Data Timeout Error
        DATA_TIMEOUT_ERROR OFFSET(20) NUMBITS(1) [],
        /// Data CRC Error
        DATA_CRC_ERROR OFFSET(21) NUMBITS(1) [],
        /// Data End Bit Error
        DATA_END_BIT_ERROR OFFSET(22) NUMBITS(1) [],
        /// Current Limit Error
        CURRENT_LIMIT_ERROR OFFSET(23) NUMBITS(1) [],
        /// Auto CMD Error
        AUTO_CMD_ERROR OFFSET(24) NUMBITS(1) [],
        /// ADMA Error
        ADMA_ERROR OFFSET(25) NUMBITS(1) []
    ],

    /// Capabilities Register (0x40)
    pub CAPS [
        /// Timeout Clock Frequency
        TIMEOUT_CLOCK_FREQUENCY OFFSET(0) NUMBITS(6) [],
        /// Timeout Clock Unit (0 = kHz, 1 = MHz)
        TIMEOUT_CLOCK_UNIT OFFSET(7) NUMBITS(1) [],
        /// Base Clock Frequency For SD Clock (MHz, 8 bits on SDHCI 3.0)
        BASE_CLOCK_FREQUENCY OFFSET(8) NUMBITS(8) [],
        /// Base Clock Frequency For SD Clock (MHz, 6 bits on SDHCI 1.0/2.0)
        BASE_CLOCK_FREQUENCY_V2 OFFSET(8) NUMBITS(6) [],
        /// Max Block Length
        MAX_BLOCK_LENGTH OFFSET(16) NUMBITS(2) [],
        /// 8-bit Support For Embedded Device
        EIGHT_BIT_SUPPORT OFFSET(18) NUMBITS(1) [],
        /// ADMA2 Support
        ADMA2 OFFSET(19) NUMBITS(1) [],
        /// High Speed Support
        HIGH_SPEED OFFSET(21) NUMBITS(1) [],
        /// SDMA Support
        SDMA OFFSET(22) NUMBITS(1) [],
        /// Suspend/Resume Support
        SUSPEND_RESUME OFFSET(23) NUMBITS(1) [],
        /// Voltage Support 3.3V
        VOLTAGE_3V3 OFFSET(24) NUMBITS(1) [],
        /// Voltage Support 3.0V
        VOLTAGE_3V0 OFFSET(25) NUMBITS(1) [],
        /// Voltage Support 1.8V
        VOLTAGE_1V8 OFFSET(26) NUMBITS(1) [],
        /// 64-bit System Address Support for V4
        DMA_64BIT_ADDRESSING_V4 OFFSET(27) NUMBITS(1) [],
        /// 64-bit System Address Support for V3
        DMA_64BIT_ADDRESSING_V3 OFFSET(28) NUMBITS(1) [],
        /// Asynchronous Interrupt Support
        ASYNC_INTERRUPT OFFSET(29) NUMBITS(1) [],
        /// Slot Type
        SLOT_TYPE OFFSET(30) NUMBITS(2) []
    ],

    /// ADMA Error Status Register (0x54)
    pub ADMA_ERROR [
        /// ADMA Error State (state of the engine when the error occurred)
        ERROR_STATE OFFSET(0) NUMBITS(2) [
            Stop = 0,
            FetchDescriptor = 1,
            TransferData = 3
        ],
        /// ADMA Length Mismatch Error
        LENGTH_MISMATCH OFFSET(2) NUMBITS(1) []
    ],

    /// Slot Interrupt Status and Host Controller Version (0xFC)
    pub SLOT_VERSION [
        /// Interrupt Signal For Each Slot
        SLOT_INTERRUPT_SIGNAL OFFSET(0) NUMBITS(8) [],
        /// Specification Version Number
        SPECIFICATION_VERSION OFFSET(16) NUMBITS(8) [],
        /// Vendor Version Number
        VENDOR_VERSION OFFSET(24) NUMBITS(8) []
    ]
];

pub type BlockSizeCount = LocalRegisterCopy<u32, BLOCK_SIZE_COUNT::Register>;
pub type TransferCommand = LocalRegisterCopy<u32, TRANSFER_COMMAND::Register>;
pub type PresentState = LocalRegisterCopy<u32, PRESENT::Register>;
pub type HostConfiguration0 = LocalRegisterCopy<u32, HOST_CONFIG_0::Register>;
pub type HostConfiguration1 = LocalRegisterCopy<u32, HOST_CONFIG_1::Register>;
pub type InterruptStatus = LocalRegisterCopy<u32, INTERRUPT::Register>;
pub type Capabilities = LocalRegisterCopy<u32, CAPS::Register>;
pub type AdmaErrorStatus = LocalRegisterCopy<u32, ADMA_ERROR::Register>;
pub type SlotVersion = LocalRegisterCopy<u32, SLOT_VERSION::Register>;

/// Data timeout counter value programmed after the clock is supplied (TMCLK x 2^27)
pub const DATA_TIMEOUT_COUNTER_MAX: u32 = 0b1110;

// ============================================================================
// Register Window Access
// ============================================================================

/// 32-bit access to the register window of one controller.
///
/// Offsets are byte offsets from the window base and are always 4-byte
/// aligned. Reads may have side effects (e.g. the buffer data port).
pub trait RegisterAccess {
    /// Read the 32-bit register at `offset`
    fn read32(&self, offset: usize) -> u32;
    /// Write the 32-bit register at `offset`
    fn write32(&mut self, offset: usize, value: u32);
}

/// A mapped SDHCI register window accessed with volatile loads/stores
#[derive(Debug)]
pub struct MmioWindow {
    base: NonNull<u32>,
}

// Safety: the window is exclusively owned by one controller; all accesses go
// through `&self`/`&mut self` of that controller.
unsafe impl Send for MmioWindow {}

impl MmioWindow {
    /// Wrap an already mapped register window.
    ///
    /// # Safety
    ///
    /// `base` must point to at least [`WINDOW_SIZE`] bytes of device memory
    /// (or plain memory standing in for it), 4-byte aligned, that nothing else
    /// reads or writes for the lifetime of the returned value.
    pub const unsafe fn new(base: NonNull<u32>) -> Self {
        Self { base }
    }

    fn register(&self, offset: usize) -> *mut u32 {
        assert!(
            offset % 4 == 0 && offset < WINDOW_SIZE,
            "SDHCI register offset {:#x} outside the window",
            offset
        );
        // Safety: bounds checked above against the window promised in `new`
        unsafe { self.base.as_ptr().add(offset / 4) }
    }
}

impl RegisterAccess for MmioWindow {
    fn read32(&self, offset: usize) -> u32 {
        unsafe { ptr::read_volatile(self.register(offset)) }
    }

    fn write32(&mut self, offset: usize, value: u32) {
        unsafe { ptr::write_volatile(self.register(offset), value) }
    }
}

// ============================================================================
// Typed Register Accessors
// ============================================================================

/// Typed view over a register window.
///
/// Each register is read into a [`LocalRegisterCopy`] so its fields can be
/// inspected by name; writes take either a full copy or a field value.
#[derive(Debug)]
pub struct Registers<A> {
    window: A,
}

impl<A: RegisterAccess> Registers<A> {
    pub const fn new(window: A) -> Self {
        Self { window }
    }

    /// Access the raw window
    pub fn window(&self) -> &A {
        &self.window
    }

    pub fn argument_1(&self) -> u32 {
        self.window.read32(ARGUMENT_1)
    }

    pub fn set_argument_1(&mut self, value: u32) {
        self.window.write32(ARGUMENT_1, value);
    }

    pub fn block_size_and_block_count(&self) -> BlockSizeCount {
        LocalRegisterCopy::new(self.window.read32(BLOCK_SIZE_AND_BLOCK_COUNT))
    }

    pub fn set_block_size_and_block_count(&mut self, block_size: u32, block_count: u32) {
        let value = BLOCK_SIZE_COUNT::BLOCK_SIZE.val(block_size)
            + BLOCK_SIZE_COUNT::BLOCK_COUNT.val(block_count);
        self.write_field(BLOCK_SIZE_AND_BLOCK_COUNT, value);
    }

    pub fn transfer_mode_and_command(&self) -> TransferCommand {
        LocalRegisterCopy::new(self.window.read32(TRANSFER_MODE_AND_COMMAND))
    }

    /// Write transfer mode and command in a single access; this dispatches the command.
    pub fn set_transfer_mode_and_command(&mut self, value: TransferCommand) {
        self.window.write32(TRANSFER_MODE_AND_COMMAND, value.get());
    }

    /// Response register `index` (0..=3)
    pub fn response(&self, index: usize) -> u32 {
        assert!(index < 4);
        self.window.read32(RESPONSE_0 + index * 4)
    }

    pub fn read_buffer_data_port(&self) -> u32 {
        self.window.read32(BUFFER_DATA_PORT)
    }

    pub fn write_buffer_data_port(&mut self, value: u32) {
        self.window.write32(BUFFER_DATA_PORT, value);
    }

    pub fn present_state(&self) -> PresentState {
        LocalRegisterCopy::new(self.window.read32(PRESENT_STATE))
    }

    pub fn host_configuration_0(&self) -> HostConfiguration0 {
        LocalRegisterCopy::new(self.window.read32(HOST_CONFIGURATION_0))
    }

    pub fn set_host_configuration_0(&mut self, value: HostConfiguration0) {
        self.window.write32(HOST_CONFIGURATION_0, value.get());
    }

    /// Read-modify-write of host configuration 0
    pub fn modify_host_configuration_0(&mut self, field: FieldValue<u32, HOST_CONFIG_0::Register>) {
        let mut value = self.host_configuration_0();
        value.modify(field);
        self.set_host_configuration_0(value);
    }

    pub fn host_configuration_1(&self) -> HostConfiguration1 {
        LocalRegisterCopy::new(self.window.read32(HOST_CONFIGURATION_1))
    }

    pub fn set_host_configuration_1(&mut self, value: HostConfiguration1) {
        self.window.write32(HOST_CONFIGURATION_1, value.get());
    }

    /// Read-modify-write of host configuration 1
    pub fn modify_host_configuration_1(&mut self, field: FieldValue<u32, HOST_CONFIG_1::Register>) {
        let mut value = self.host_configuration_1();
        value.modify(field);
        self.set_host_configuration_1(value);
    }

    pub fn interrupt_status(&self) -> InterruptStatus {
        LocalRegisterCopy::new(self.window.read32(INTERRUPT_STATUS))
    }

    /// Clear interrupt status bits (the register is write-1-to-clear).
    pub fn clear_interrupt_status(&mut self, field: FieldValue<u32, INTERRUPT::Register>) {
        self.write_field(INTERRUPT_STATUS, field);
    }

    pub fn interrupt_status_enable(&self) -> InterruptStatus {
        LocalRegisterCopy::new(self.window.read32(INTERRUPT_STATUS_ENABLE))
    }

    pub fn set_interrupt_status_enable(&mut self, value: InterruptStatus) {
        self.window.write32(INTERRUPT_STATUS_ENABLE, value.get());
    }

    pub fn set_interrupt_signal_enable(&mut self, value: InterruptStatus) {
        self.window.write32(INTERRUPT_SIGNAL_ENABLE, value.get());
    }

    pub fn capabilities(&self) -> Capabilities {
        LocalRegisterCopy::new(self.window.read32(CAPABILITIES))
    }

    pub fn adma_error_status(&self) -> AdmaErrorStatus {
        LocalRegisterCopy::new(self.window.read32(ADMA_ERROR_STATUS))
    }

    /// ADMA system address register `index` (0 = low, 1 = high)
    pub fn set_adma_system_address(&mut self, index: usize, value: u32) {
        assert!(index < 2);
        self.window.write32(ADMA_SYSTEM_ADDRESS_0 + index * 4, value);
    }

    pub fn slot_interrupt_status_and_version(&self) -> SlotVersion {
        LocalRegisterCopy::new(self.window.read32(SLOT_INTERRUPT_STATUS_AND_VERSION))
    }

    fn write_field<R: RegisterLongName>(&mut self, offset: usize, field: FieldValue<u32, R>) {
        let mut value = LocalRegisterCopy::<u32, R>::new(0);
        value.write(field);
        self.window.write32(offset, value.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(4))]
    struct PlainMemory([u32; WINDOW_SIZE / 4]);

    fn window(memory: &mut PlainMemory) -> Registers<MmioWindow> {
        let base = NonNull::new(memory.0.as_mut_ptr()).unwrap();
        Registers::new(unsafe { MmioWindow::new(base) })
    }

    #[test]
    fn offsets_land_on_the_right_words() {
        let mut memory = PlainMemory([0; WINDOW_SIZE / 4]);
        {
            let mut regs = window(&mut memory);
            regs.set_argument_1(0xdead_beef);
            regs.set_adma_system_address(1, 0x1234);
        }
        assert_eq!(memory.0[ARGUMENT_1 / 4], 0xdead_beef);
        assert_eq!(memory.0[ADMA_SYSTEM_ADDRESS_1 / 4], 0x1234);
    }

    #[test]
    fn block_size_and_count_pack_into_one_word() {
        let mut memory = PlainMemory([0; WINDOW_SIZE / 4]);
        let mut regs = window(&mut memory);
        regs.set_block_size_and_block_count(512, 3);
        let value = regs.block_size_and_block_count();
        assert_eq!(value.get(), (3 << 16) | 512);
        assert_eq!(value.read(BLOCK_SIZE_COUNT::BLOCK_SIZE), 512);
        assert_eq!(value.read(BLOCK_SIZE_COUNT::BLOCK_COUNT), 3);
    }

    #[test]
    fn host_configuration_fields() {
        let mut memory = PlainMemory([0; WINDOW_SIZE / 4]);
        memory.0[HOST_CONFIGURATION_1 / 4] = 0x0000_8007;
        let mut regs = window(&mut memory);

        let value = regs.host_configuration_1();
        assert!(value.is_set(HOST_CONFIG_1::INTERNAL_CLOCK_ENABLE));
        assert!(value.is_set(HOST_CONFIG_1::INTERNAL_CLOCK_STABLE));
        assert!(value.is_set(HOST_CONFIG_1::SD_CLOCK_ENABLE));
        assert_eq!(value.read(HOST_CONFIG_1::SDCLK_FREQUENCY_SELECT), 0x80);

        regs.modify_host_configuration_1(HOST_CONFIG_1::SD_CLOCK_ENABLE::CLEAR);
        assert_eq!(regs.host_configuration_1().get(), 0x0000_8003);

        regs.modify_host_configuration_0(
            HOST_CONFIG_0::DATA_TRANSFER_WIDTH_4BIT::SET + HOST_CONFIG_0::DMA_SELECT::Adma32,
        );
        assert_eq!(regs.host_configuration_0().get(), 0b1_0010);
    }

    #[test]
    fn interrupt_clear_writes_only_the_requested_bit() {
        let mut memory = PlainMemory([0; WINDOW_SIZE / 4]);
        {
            let mut regs = window(&mut memory);
            regs.clear_interrupt_status(INTERRUPT::TRANSFER_COMPLETE::SET);
        }
        assert_eq!(memory.0[INTERRUPT_STATUS / 4], 0b10);
    }

    #[test]
    fn capabilities_and_version_decode() {
        let mut memory = PlainMemory([0; WINDOW_SIZE / 4]);
        memory.0[CAPABILITIES / 4] = (1 << 19) | (1 << 21) | (0xC8 << 8);
        memory.0[SLOT_INTERRUPT_STATUS_AND_VERSION / 4] = 0x0102_0000;
        let regs = window(&mut memory);

        let caps = regs.capabilities();
        assert!(caps.is_set(CAPS::ADMA2));
        assert!(caps.is_set(CAPS::HIGH_SPEED));
        assert!(!caps.is_set(CAPS::DMA_64BIT_ADDRESSING_V3));
        assert_eq!(caps.read(CAPS::BASE_CLOCK_FREQUENCY), 200);
        assert_eq!(caps.read(CAPS::BASE_CLOCK_FREQUENCY_V2), 0x08);

        let version = regs.slot_interrupt_status_and_version();
        assert_eq!(version.read(SLOT_VERSION::SPECIFICATION_VERSION), 2);
        assert_eq!(version.read(SLOT_VERSION::VENDOR_VERSION), 1);
    }

    #[test]
    #[should_panic]
    fn out_of_window_access_panics() {
        let mut memory = PlainMemory([0; WINDOW_SIZE / 4]);
        let regs = window(&mut memory);
        regs.window().read32(WINDOW_SIZE);
    }
}
