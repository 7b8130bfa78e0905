//! Block transfers
//!
//! PIO moves every word through the buffer data port. ADMA2 stages data in
//! the DMA arena and lets the host walk a descriptor table; the block count
//! register is left disabled so one command can cover a whole table.

use core::ops::Range;
use core::sync::atomic::{Ordering, fence};

use embedded_hal::delay::DelayNs;
use tock_registers::fields::Field;

use super::adma;
use super::command::{
    Command, Direction, READ_MULTIPLE_BLOCK, READ_SINGLE_BLOCK, Response, WRITE_MULTIPLE_BLOCK,
    WRITE_SINGLE_BLOCK,
};
use super::regs::{ADMA_ERROR, INTERRUPT, RegisterAccess};
use super::status::card_status_contains_errors;
use super::{CardIdentity, OperatingMode, SdhciController, SdhciError};
use crate::block::{BLOCK_LEN, BLOCK_LEN_U32};

/// Largest block count the 16-bit block count register holds
const MAX_PIO_BLOCKS: u32 = 0xffff;

/// Caller memory of one transfer, tagged with its direction
pub(super) enum DataBuffer<'a> {
    /// Card to host
    Read(&'a mut [u8]),
    /// Host to card
    Write(&'a [u8]),
}

impl DataBuffer<'_> {
    fn len(&self) -> usize {
        match self {
            DataBuffer::Read(buffer) => buffer.len(),
            DataBuffer::Write(buffer) => buffer.len(),
        }
    }

    fn direction(&self) -> Direction {
        match self {
            DataBuffer::Read(_) => Direction::CardToHost,
            DataBuffer::Write(_) => Direction::HostToCard,
        }
    }

    /// Reborrow `range` of the buffer
    fn slice(&mut self, range: Range<usize>) -> DataBuffer<'_> {
        match self {
            DataBuffer::Read(buffer) => DataBuffer::Read(&mut buffer[range]),
            DataBuffer::Write(buffer) => DataBuffer::Write(&buffer[range]),
        }
    }
}

/// Byte length of `block_count` blocks, if it fits in `usize`
fn checked_blocks_len(block_count: u64) -> Option<usize> {
    usize::try_from(block_count).ok()?.checked_mul(BLOCK_LEN)
}

/// Byte length of a block count already bounded by a validated transfer
fn blocks_len(block_count: u64) -> usize {
    block_count as usize * BLOCK_LEN
}

impl<R: RegisterAccess, D: DelayNs> SdhciController<R, D> {
    /// Read `block_count` blocks starting at `block_address` into `buffer`.
    pub fn read_block(
        &mut self,
        block_address: u64,
        block_count: u32,
        buffer: &mut [u8],
    ) -> Result<(), SdhciError> {
        self.transfer(block_address, block_count, DataBuffer::Read(buffer))
    }

    /// Write `block_count` blocks from `buffer` starting at `block_address`.
    pub fn write_block(
        &mut self,
        block_address: u64,
        block_count: u32,
        buffer: &[u8],
    ) -> Result<(), SdhciError> {
        self.transfer(block_address, block_count, DataBuffer::Write(buffer))
    }

    fn transfer(
        &mut self,
        block_address: u64,
        block_count: u32,
        mut buffer: DataBuffer<'_>,
    ) -> Result<(), SdhciError> {
        let identity = self.card.ok_or(SdhciError::NoDevice)?;

        let Some(len) = checked_blocks_len(u64::from(block_count)) else {
            log::error!("SDHCI: {} blocks exceed the address space", block_count);
            return Err(SdhciError::InvalidParameter);
        };
        if buffer.len() < len {
            log::error!(
                "SDHCI: Buffer of {} bytes too small for {} blocks",
                buffer.len(),
                block_count
            );
            return Err(SdhciError::InvalidParameter);
        }
        match block_address.checked_add(u64::from(block_count)) {
            Some(end) if end <= identity.block_count => {}
            _ => {
                log::error!(
                    "SDHCI: Blocks {}+{} beyond the end of the card",
                    block_address,
                    block_count
                );
                return Err(SdhciError::InvalidParameter);
            }
        }
        if block_count == 0 {
            return Ok(());
        }

        let buffer = buffer.slice(0..len);
        match self.mode {
            OperatingMode::Pio => {
                self.transfer_blocks_pio(&identity, block_address, block_count, buffer)
            }
            OperatingMode::Adma2Addr32 | OperatingMode::Adma2Addr64 => {
                self.transfer_blocks_adma2(&identity, block_address, block_count, buffer)
            }
        }
    }

    /// Poll for `field` in the interrupt status and clear it
    fn wait_for_interrupt(
        &mut self,
        field: Field<u32, INTERRUPT::Register>,
    ) -> Result<(), SdhciError> {
        if !self.poll(|c| c.regs.interrupt_status().is_set(field)) {
            log::debug!(
                "SDHCI: Interrupt status {:#010x} never raised (status={:#010x})",
                field.mask << field.shift,
                self.regs.interrupt_status().get()
            );
            return Err(SdhciError::IoError);
        }
        self.regs.clear_interrupt_status(field.val(1));
        Ok(())
    }

    /// Read the R1 status of the data command just completed
    fn check_data_command_status(&mut self, command: Command) -> Result<Response, SdhciError> {
        let status = self.regs.response(0);
        if card_status_contains_errors(command.index, status) {
            log::error!(
                "SDHCI: CMD{} card status error {:#010x}",
                command.index as u8,
                status
            );
            return Err(SdhciError::IoError);
        }
        Ok(Response {
            words: [status, 0, 0, 0],
        })
    }

    fn transfer_blocks_pio(
        &mut self,
        identity: &CardIdentity,
        block_address: u64,
        block_count: u32,
        mut buffer: DataBuffer<'_>,
    ) -> Result<(), SdhciError> {
        let mut done = 0u32;
        while done < block_count {
            let count = (block_count - done).min(MAX_PIO_BLOCKS);
            let command = match (buffer.direction(), count) {
                (Direction::CardToHost, 1) => READ_SINGLE_BLOCK,
                (Direction::HostToCard, 1) => WRITE_SINGLE_BLOCK,
                (Direction::CardToHost, _) => {
                    READ_MULTIPLE_BLOCK.with_block_count().with_auto_cmd12()
                }
                (Direction::HostToCard, _) => {
                    WRITE_MULTIPLE_BLOCK.with_block_count().with_auto_cmd12()
                }
            };
            let argument = identity.data_address(block_address + u64::from(done))?;
            let start = blocks_len(u64::from(done));
            let end = start + blocks_len(u64::from(count));

            self.transaction_control_with_data_transfer_using_the_dat_line_without_dma(
                command,
                argument,
                BLOCK_LEN_U32,
                count,
                buffer.slice(start..end),
            )?;
            done += count;
        }
        Ok(())
    }

    /// One data command moved through the buffer data port.
    ///
    /// `block_size` must be a multiple of 4 and `buffer` must hold
    /// `block_size * block_count` bytes.
    pub(super) fn transaction_control_with_data_transfer_using_the_dat_line_without_dma(
        &mut self,
        command: Command,
        argument: u32,
        block_size: u32,
        block_count: u32,
        mut buffer: DataBuffer<'_>,
    ) -> Result<Response, SdhciError> {
        let block_len = block_size as usize;
        assert!(block_len % 4 == 0);
        assert!(buffer.len() >= block_len * block_count as usize);

        log::trace!(
            "SDHCI: CMD{} PIO {} x {} bytes arg={:#010x}",
            command.index as u8,
            block_count,
            block_size,
            argument
        );

        self.wait_inhibit(true)?;
        self.regs.set_block_size_and_block_count(block_size, block_count);
        self.regs.set_argument_1(argument);
        self.regs.set_transfer_mode_and_command(command.to_register());
        self.last_command = command;

        self.wait_for_interrupt(INTERRUPT::COMMAND_COMPLETE)?;
        let response = self.check_data_command_status(command)?;

        let ready = match buffer.direction() {
            Direction::CardToHost => INTERRUPT::BUFFER_READ_READY,
            Direction::HostToCard => INTERRUPT::BUFFER_WRITE_READY,
        };
        for block in 0..block_count as usize {
            self.wait_for_interrupt(ready)?;
            let range = block * block_len..(block + 1) * block_len;
            match &mut buffer {
                DataBuffer::Read(data) => {
                    for word in data[range].chunks_exact_mut(4) {
                        word.copy_from_slice(&self.regs.read_buffer_data_port().to_le_bytes());
                    }
                }
                DataBuffer::Write(data) => {
                    for word in data[range].chunks_exact(4) {
                        let mut bytes = [0u8; 4];
                        bytes.copy_from_slice(word);
                        self.regs.write_buffer_data_port(u32::from_le_bytes(bytes));
                    }
                }
            }
        }

        self.wait_for_interrupt(INTERRUPT::TRANSFER_COMPLETE)?;
        Ok(response)
    }

    /// Move blocks through the DMA arena, one descriptor table per sweep.
    fn transfer_blocks_adma2(
        &mut self,
        identity: &CardIdentity,
        block_address: u64,
        block_count: u32,
        mut buffer: DataBuffer<'_>,
    ) -> Result<(), SdhciError> {
        let mode = self.mode;
        let direction = buffer.direction();
        let mut address = block_address;
        let mut offset = 0usize;
        let mut remaining = u64::from(block_count);

        while remaining > 0 {
            let Some(arena) = self.dma.as_mut() else {
                unreachable!("SDHCI: ADMA2 mode without a DMA arena");
            };

            let sweep = remaining.min(adma::blocks_per_sweep(mode));
            let sweep_len = blocks_len(sweep);
            if let DataBuffer::Write(data) = &buffer {
                arena.staging()[..sweep_len].copy_from_slice(&data[offset..offset + sweep_len]);
            }

            let described = adma::build_table(arena, mode, remaining);
            debug_assert_eq!(u64::from(described), sweep);
            let table = arena.descriptor_table_phys();
            if mode == OperatingMode::Adma2Addr32 {
                assert!(table >> 32 == 0, "SDHCI: descriptor table beyond 32 bits");
            }
            fence(Ordering::SeqCst);

            log::trace!(
                "SDHCI: ADMA2 sweep of {} blocks at {} (table {:#x})",
                described,
                address,
                table
            );

            self.wait_inhibit(true)?;
            self.regs.set_adma_system_address(0, table as u32);
            self.regs.set_adma_system_address(1, (table >> 32) as u32);
            // Block count disabled: the descriptor table ends the transfer
            self.regs.set_block_size_and_block_count(BLOCK_LEN_U32, 0);
            self.regs.set_argument_1(identity.data_address(address)?);

            let command = match (direction, described > 1) {
                (Direction::CardToHost, false) => READ_SINGLE_BLOCK,
                (Direction::HostToCard, false) => WRITE_SINGLE_BLOCK,
                (Direction::CardToHost, true) => READ_MULTIPLE_BLOCK.with_auto_cmd12(),
                (Direction::HostToCard, true) => WRITE_MULTIPLE_BLOCK.with_auto_cmd12(),
            }
            .with_dma();
            self.regs.set_transfer_mode_and_command(command.to_register());
            self.last_command = command;

            self.wait_for_interrupt(INTERRUPT::COMMAND_COMPLETE)?;
            self.check_data_command_status(command)?;

            let finished = self.poll(|c| {
                let status = c.regs.interrupt_status();
                status.is_set(INTERRUPT::TRANSFER_COMPLETE) || status.is_set(INTERRUPT::ADMA_ERROR)
            });
            if !finished {
                log::error!("SDHCI: ADMA2 transfer timeout");
                return Err(SdhciError::IoError);
            }

            if self.regs.interrupt_status().is_set(INTERRUPT::ADMA_ERROR) {
                self.regs.clear_interrupt_status(INTERRUPT::ADMA_ERROR::SET);
                let error = self.regs.adma_error_status();
                log::error!(
                    "SDHCI: ADMA error (state={}, length mismatch={})",
                    error.read(ADMA_ERROR::ERROR_STATE),
                    error.is_set(ADMA_ERROR::LENGTH_MISMATCH)
                );
                self.abort_transaction();
                return Err(SdhciError::IoError);
            }
            self.regs.clear_interrupt_status(INTERRUPT::TRANSFER_COMPLETE::SET);
            fence(Ordering::SeqCst);

            if let DataBuffer::Read(data) = &mut buffer {
                let Some(arena) = self.dma.as_mut() else {
                    unreachable!("SDHCI: ADMA2 mode without a DMA arena");
                };
                data[offset..offset + sweep_len].copy_from_slice(&arena.staging()[..sweep_len]);
            }

            address += u64::from(described);
            offset += sweep_len;
            remaining -= u64::from(described);
        }

        Ok(())
    }

    /// Recovery after a failed DMA transfer.
    ///
    /// The abort sequence (STOP_TRANSMISSION as an abort command followed by
    /// CMD and DAT line resets) is not implemented; the controller is left
    /// as the error found it.
    fn abort_transaction(&mut self) {
        log::warn!(
            "SDHCI: abort not implemented, last command CMD{}",
            self.last_command.index as u8
        );
    }
}
