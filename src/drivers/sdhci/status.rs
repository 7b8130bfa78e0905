//! Card status (R1) interpretation
//!
//! Decides, per command, whether the 32-bit card status returned in a short
//! response reports an error.

use bitflags::bitflags;

use super::command::CommandIndex;

bitflags! {
    /// Card status bits of an R1 response (PLSS 4.10.1)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CardStatus: u32 {
        const AKE_SEQ_ERROR = 1 << 3;
        const APP_CMD = 1 << 5;
        const READY_FOR_DATA = 1 << 8;
        /// CURRENT_STATE, bits 12:9
        const CURRENT_STATE = 0xf << 9;
        const ERASE_RESET = 1 << 13;
        const CARD_ECC_DISABLED = 1 << 14;
        const WP_ERASE_SKIP = 1 << 15;
        const CSD_OVERWRITE = 1 << 16;
        const ERROR = 1 << 19;
        const CC_ERROR = 1 << 20;
        const CARD_ECC_FAILED = 1 << 21;
        const ILLEGAL_COMMAND = 1 << 22;
        const COM_CRC_ERROR = 1 << 23;
        const LOCK_UNLOCK_FAILED = 1 << 24;
        const CARD_IS_LOCKED = 1 << 25;
        const WP_VIOLATION = 1 << 26;
        const ERASE_PARAM = 1 << 27;
        const ERASE_SEQ_ERROR = 1 << 28;
        const BLOCK_LEN_ERROR = 1 << 29;
        const ADDRESS_ERROR = 1 << 30;
        const OUT_OF_RANGE = 1 << 31;
    }
}

/// Errors any addressed command can report
const GENERIC_ERRORS: CardStatus = CardStatus::ERROR
    .union(CardStatus::CC_ERROR)
    .union(CardStatus::CARD_ECC_FAILED)
    .union(CardStatus::ILLEGAL_COMMAND)
    .union(CardStatus::COM_CRC_ERROR)
    .union(CardStatus::LOCK_UNLOCK_FAILED)
    .union(CardStatus::CARD_IS_LOCKED)
    .union(CardStatus::WP_VIOLATION)
    .union(CardStatus::ERASE_PARAM)
    .union(CardStatus::CSD_OVERWRITE);

/// The only error bits an R6 response carries
const R6_ERRORS: CardStatus = CardStatus::ERROR
    .union(CardStatus::ILLEGAL_COMMAND)
    .union(CardStatus::COM_CRC_ERROR);

const READ_ERRORS: CardStatus = GENERIC_ERRORS
    .union(CardStatus::ADDRESS_ERROR)
    .union(CardStatus::OUT_OF_RANGE);

const WRITE_ERRORS: CardStatus = READ_ERRORS.union(CardStatus::BLOCK_LEN_ERROR);

/// Card states reported in CURRENT_STATE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Idle,
    Ready,
    Identification,
    Standby,
    Transfer,
    Data,
    Receive,
    Program,
    Disconnect,
    Reserved(u8),
}

impl CardStatus {
    /// CURRENT_STATE field
    pub fn state(self) -> CardState {
        match (self.bits() >> 9) & 0xf {
            0 => CardState::Idle,
            1 => CardState::Ready,
            2 => CardState::Identification,
            3 => CardState::Standby,
            4 => CardState::Transfer,
            5 => CardState::Data,
            6 => CardState::Receive,
            7 => CardState::Program,
            8 => CardState::Disconnect,
            other => CardState::Reserved(other as u8),
        }
    }
}

/// Expand the 16 status bits of an R6 response to R1 positions.
///
/// R6 packs status bits 23, 22 and 19 into bits 15, 14 and 13; bits 12:0 are
/// already in place. The upper half (the new RCA) is dropped.
pub fn remap_r6(response: u32) -> CardStatus {
    let bits = (response & 0x1fff)
        | ((response & 0x2000) << 6)
        | ((response & 0x4000) << 8)
        | ((response & 0x8000) << 8);
    CardStatus::from_bits_retain(bits)
}

/// Whether `response` (the first response word of command `index`) reports
/// a card error.
///
/// Commands without card status (R2, R3, R7) never report one.
pub fn card_status_contains_errors(index: CommandIndex, response: u32) -> bool {
    let mask = match index {
        CommandIndex::SendRelativeAddr => {
            return remap_r6(response).intersects(R6_ERRORS);
        }
        CommandIndex::SelectCard | CommandIndex::AppCmd | CommandIndex::AppSendScr => {
            GENERIC_ERRORS
        }
        CommandIndex::SetBlockLen => GENERIC_ERRORS.union(CardStatus::BLOCK_LEN_ERROR),
        CommandIndex::ReadSingleBlock | CommandIndex::ReadMultipleBlock => READ_ERRORS,
        CommandIndex::WriteSingleBlock | CommandIndex::WriteMultipleBlock => WRITE_ERRORS,
        _ => return false,
    };
    CardStatus::from_bits_retain(response).intersects(mask)
}
