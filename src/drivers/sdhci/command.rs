//! SD command descriptions and the command/response engine
//!
//! A [`Command`] is a plain value describing how the host must dispatch one
//! command (response shape, checks, data flags). The engine issues it,
//! polls for completion and interprets the response.

use embedded_hal::delay::DelayNs;

use super::regs::{INTERRUPT, PRESENT, RegisterAccess, TRANSFER_COMMAND, TransferCommand};
use super::status::card_status_contains_errors;
use super::{SdhciController, SdhciError};

/// Command indices used by the driver (PLSS 4.7.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandIndex {
    GoIdleState = 0,
    AllSendCid = 2,
    SendRelativeAddr = 3,
    /// ACMD6
    AppSetBusWidth = 6,
    SelectCard = 7,
    SendIfCond = 8,
    SendCsd = 9,
    StopTransmission = 12,
    SetBlockLen = 16,
    ReadSingleBlock = 17,
    ReadMultipleBlock = 18,
    WriteSingleBlock = 24,
    WriteMultipleBlock = 25,
    /// ACMD41
    AppSendOpCond = 41,
    /// ACMD51
    AppSendScr = 51,
    AppCmd = 55,
}

/// Response length the host must expect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    None,
    /// R2
    Long136,
    /// R1, R3, R6, R7
    Short48,
    /// R1b
    Short48Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Normal,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HostToCard,
    CardToHost,
}

/// One command as the host dispatches it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub index: CommandIndex,
    pub command_type: CommandType,
    pub response_type: ResponseType,
    pub crc_check: bool,
    pub index_check: bool,
    pub data_present: bool,
    pub direction: Direction,
    pub multiblock: bool,
    pub block_count_enable: bool,
    pub auto_cmd12: bool,
    pub dma_enable: bool,
    /// Completion is signalled by transfer complete instead of command complete
    pub uses_transfer_complete_interrupt: bool,
}

impl Command {
    /// A normal command; CRC and index checks follow the response type.
    pub const fn new(index: CommandIndex, response_type: ResponseType) -> Self {
        let (crc_check, index_check) = match response_type {
            ResponseType::None => (false, false),
            ResponseType::Long136 => (true, false),
            ResponseType::Short48 | ResponseType::Short48Busy => (true, true),
        };
        Self {
            index,
            command_type: CommandType::Normal,
            response_type,
            crc_check,
            index_check,
            data_present: false,
            direction: Direction::HostToCard,
            multiblock: false,
            block_count_enable: false,
            auto_cmd12: false,
            dma_enable: false,
            uses_transfer_complete_interrupt: false,
        }
    }

    /// R3 carries neither a valid CRC nor the command index
    pub const fn without_checks(mut self) -> Self {
        self.crc_check = false;
        self.index_check = false;
        self
    }

    pub const fn abort(mut self) -> Self {
        self.command_type = CommandType::Abort;
        self
    }

    /// The command moves data on the DAT lines in `direction`
    pub const fn with_data(mut self, direction: Direction) -> Self {
        self.data_present = true;
        self.direction = direction;
        self
    }

    pub const fn with_multiblock(mut self) -> Self {
        self.multiblock = true;
        self
    }

    pub const fn with_block_count(mut self) -> Self {
        self.block_count_enable = true;
        self
    }

    pub const fn with_auto_cmd12(mut self) -> Self {
        self.auto_cmd12 = true;
        self
    }

    pub const fn with_dma(mut self) -> Self {
        self.dma_enable = true;
        self
    }

    /// Completion is reported by transfer complete (busy commands on some hosts)
    pub const fn with_transfer_complete_interrupt(mut self) -> Self {
        self.uses_transfer_complete_interrupt = true;
        self
    }

    /// Whether the command occupies the DAT line (data or busy signalling)
    pub fn requires_dat_line(&self) -> bool {
        self.data_present || self.response_type == ResponseType::Short48Busy
    }

    /// Encode as the transfer mode and command register value
    pub fn to_register(&self) -> TransferCommand {
        let response_type = match self.response_type {
            ResponseType::None => TRANSFER_COMMAND::RESPONSE_TYPE::NoResponse,
            ResponseType::Long136 => TRANSFER_COMMAND::RESPONSE_TYPE::Long136,
            ResponseType::Short48 => TRANSFER_COMMAND::RESPONSE_TYPE::Short48,
            ResponseType::Short48Busy => TRANSFER_COMMAND::RESPONSE_TYPE::Short48Busy,
        };
        let command_type = match self.command_type {
            CommandType::Normal => TRANSFER_COMMAND::COMMAND_TYPE::Normal,
            CommandType::Abort => TRANSFER_COMMAND::COMMAND_TYPE::Abort,
        };
        let direction = match self.direction {
            Direction::HostToCard => TRANSFER_COMMAND::DIRECTION::HostToCard,
            Direction::CardToHost => TRANSFER_COMMAND::DIRECTION::CardToHost,
        };
        let auto_command = if self.auto_cmd12 {
            TRANSFER_COMMAND::AUTO_COMMAND::Cmd12
        } else {
            TRANSFER_COMMAND::AUTO_COMMAND::Disabled
        };

        let mut value = TransferCommand::new(0);
        value.write(
            TRANSFER_COMMAND::INDEX.val(self.index as u32)
                + response_type
                + command_type
                + direction
                + auto_command
                + TRANSFER_COMMAND::CRC_CHECK.val(self.crc_check as u32)
                + TRANSFER_COMMAND::INDEX_CHECK.val(self.index_check as u32)
                + TRANSFER_COMMAND::DATA_PRESENT.val(self.data_present as u32)
                + TRANSFER_COMMAND::MULTIBLOCK.val(self.multiblock as u32)
                + TRANSFER_COMMAND::BLOCK_COUNT_ENABLE.val(self.block_count_enable as u32)
                + TRANSFER_COMMAND::DMA_ENABLE.val(self.dma_enable as u32),
        );
        value
    }
}

pub const GO_IDLE_STATE: Command = Command::new(CommandIndex::GoIdleState, ResponseType::None);
pub const ALL_SEND_CID: Command = Command::new(CommandIndex::AllSendCid, ResponseType::Long136);
pub const SEND_RELATIVE_ADDR: Command =
    Command::new(CommandIndex::SendRelativeAddr, ResponseType::Short48);
pub const APP_SET_BUS_WIDTH: Command =
    Command::new(CommandIndex::AppSetBusWidth, ResponseType::Short48);
pub const SELECT_CARD: Command = Command::new(CommandIndex::SelectCard, ResponseType::Short48Busy);
pub const SEND_IF_COND: Command = Command::new(CommandIndex::SendIfCond, ResponseType::Short48);
pub const SEND_CSD: Command = Command::new(CommandIndex::SendCsd, ResponseType::Long136);
pub const STOP_TRANSMISSION: Command =
    Command::new(CommandIndex::StopTransmission, ResponseType::Short48Busy).abort();
pub const SET_BLOCK_LEN: Command = Command::new(CommandIndex::SetBlockLen, ResponseType::Short48);
pub const READ_SINGLE_BLOCK: Command =
    Command::new(CommandIndex::ReadSingleBlock, ResponseType::Short48)
        .with_data(Direction::CardToHost);
pub const READ_MULTIPLE_BLOCK: Command =
    Command::new(CommandIndex::ReadMultipleBlock, ResponseType::Short48)
        .with_data(Direction::CardToHost)
        .with_multiblock();
pub const WRITE_SINGLE_BLOCK: Command =
    Command::new(CommandIndex::WriteSingleBlock, ResponseType::Short48)
        .with_data(Direction::HostToCard);
pub const WRITE_MULTIPLE_BLOCK: Command =
    Command::new(CommandIndex::WriteMultipleBlock, ResponseType::Short48)
        .with_data(Direction::HostToCard)
        .with_multiblock();
pub const APP_SEND_OP_COND: Command =
    Command::new(CommandIndex::AppSendOpCond, ResponseType::Short48).without_checks();
pub const APP_SEND_SCR: Command = Command::new(CommandIndex::AppSendScr, ResponseType::Short48)
    .with_data(Direction::CardToHost);
pub const APP_CMD: Command = Command::new(CommandIndex::AppCmd, ResponseType::Short48);

/// Response words as read from the response registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Response {
    pub words: [u32; 4],
}

impl Response {
    /// The 32-bit payload of a 48-bit response
    pub fn short(&self) -> u32 {
        self.words[0]
    }

    /// The 128-bit register of an R2 response.
    ///
    /// The host strips the CRC byte and stores bits 127:8 in bits 119:0 of
    /// the response registers; shifting back restores the register layout
    /// (bits 7:0 read as zero).
    pub fn long(&self) -> u128 {
        let raw = u128::from(self.words[0])
            | (u128::from(self.words[1]) << 32)
            | (u128::from(self.words[2]) << 64)
            | (u128::from(self.words[3]) << 96);
        raw << 8
    }
}

impl<R: RegisterAccess, D: DelayNs> SdhciController<R, D> {
    /// Wait until the CMD line (and the DAT line if `data` is set) is free
    pub(super) fn wait_inhibit(&mut self, data: bool) -> Result<(), SdhciError> {
        let free = self.poll(|c| {
            let state = c.regs.present_state();
            !state.is_set(PRESENT::COMMAND_INHIBIT_CMD)
                && !(data && state.is_set(PRESENT::COMMAND_INHIBIT_DAT))
        });
        if free {
            Ok(())
        } else {
            log::debug!("SDHCI: Inhibit never cleared (data={})", data);
            Err(SdhciError::IoTimeout)
        }
    }

    /// Dispatch `command` with `argument`.
    ///
    /// Abort commands do not wait for the DAT line since they are what frees it.
    pub fn issue(&mut self, command: Command, argument: u32) -> Result<(), SdhciError> {
        log::trace!(
            "SDHCI: CMD{} ({:?}) arg={:#010x}",
            command.index as u8,
            command.index,
            argument
        );

        self.wait_inhibit(
            command.requires_dat_line() && command.command_type != CommandType::Abort,
        )?;

        self.regs.set_argument_1(argument);
        self.regs.set_transfer_mode_and_command(command.to_register());
        self.last_command = command;
        Ok(())
    }

    /// Wait for the last issued command to complete and collect its response.
    ///
    /// A busy response (R1b) is read like a plain 48-bit response; the end of
    /// the busy period is not waited for here, only before the next command
    /// that needs the DAT line.
    pub fn wait_for_response(&mut self) -> Result<Response, SdhciError> {
        let command = self.last_command;

        if !self.poll(|c| c.regs.interrupt_status().is_set(INTERRUPT::COMMAND_COMPLETE)) {
            log::debug!("SDHCI: CMD{} timeout", command.index as u8);
            return Err(SdhciError::IoTimeout);
        }
        self.regs.clear_interrupt_status(INTERRUPT::COMMAND_COMPLETE::SET);

        let mut response = Response::default();
        match command.response_type {
            ResponseType::None => {}
            ResponseType::Short48 | ResponseType::Short48Busy => {
                response.words[0] = self.regs.response(0);
            }
            ResponseType::Long136 => {
                for (index, word) in response.words.iter_mut().enumerate() {
                    *word = self.regs.response(index);
                }
            }
        }

        if command.uses_transfer_complete_interrupt {
            unimplemented!("SDHCI: transfer complete wait outside of data transfers");
        }

        if command.response_type != ResponseType::Long136
            && card_status_contains_errors(command.index, response.short())
        {
            log::debug!(
                "SDHCI: CMD{} card status error {:#010x}",
                command.index as u8,
                response.short()
            );
            return Err(SdhciError::IoError);
        }

        Ok(response)
    }

    /// Issue `command` and wait for its response
    pub fn send_command(
        &mut self,
        command: Command,
        argument: u32,
    ) -> Result<Response, SdhciError> {
        self.issue(command, argument)?;
        self.wait_for_response()
    }

    /// Issue APP_CMD followed by the application command `command`
    pub fn send_app_command(
        &mut self,
        rca: u32,
        command: Command,
        argument: u32,
    ) -> Result<Response, SdhciError> {
        self.send_command(APP_CMD, rca)?;
        self.send_command(command, argument)
    }
}
