//! ADMA2 descriptor tables
//!
//! The DMA arena is one physically contiguous region handed over at attach
//! time: a page holding the descriptor table, followed by the staging area
//! the descriptors point into.

use core::ptr::NonNull;

use bitflags::bitflags;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::OperatingMode;
use crate::block::BLOCK_LEN;

/// Size of the descriptor table page
pub const DESCRIPTOR_TABLE_SIZE: usize = 4096;

/// Largest transfer one descriptor can describe (length field 0)
pub const MAX_DESCRIPTOR_LENGTH: usize = 65536;

/// Blocks covered by one full descriptor
pub const BLOCKS_PER_DESCRIPTOR: u64 = (MAX_DESCRIPTOR_LENGTH / BLOCK_LEN) as u64;

/// Descriptors in the table with 32-bit addressing
pub const DESCRIPTORS_32: usize = 64;

/// Descriptors in the table with 64-bit addressing
pub const DESCRIPTORS_64: usize = 32;

/// Staging area size; enough for the largest sweep
pub const STAGING_SIZE: usize = DESCRIPTORS_32 * MAX_DESCRIPTOR_LENGTH;

/// Minimum arena size
pub const ARENA_SIZE: usize = DESCRIPTOR_TABLE_SIZE + STAGING_SIZE;

bitflags! {
    /// Attribute bits of an ADMA2 descriptor
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescriptorAttributes: u16 {
        const VALID = 1 << 0;
        const END = 1 << 1;
        const INTERRUPT = 1 << 2;
        /// Act2:Act1 = 10b, transfer data
        const ACT_TRANSFER = 0b10 << 4;
    }
}

/// ADMA2 descriptor, 32-bit addressing
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Adma2Descriptor32 {
    pub attributes: U16,
    /// Transfer length in bytes, 0 means 65536
    pub length: U16,
    pub address: U32,
}

/// ADMA2 descriptor, 64-bit addressing (96-bit layout)
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Adma2Descriptor64 {
    pub attributes: U16,
    /// Transfer length in bytes, 0 means 65536
    pub length: U16,
    pub address_low: U32,
    pub address_high: U32,
}

const _: () = assert!(core::mem::size_of::<Adma2Descriptor32>() == 8);
const _: () = assert!(core::mem::size_of::<Adma2Descriptor64>() == 12);
const _: () = assert!(DESCRIPTORS_32 * 8 <= DESCRIPTOR_TABLE_SIZE);
const _: () = assert!(DESCRIPTORS_64 * 12 <= DESCRIPTOR_TABLE_SIZE);

impl DescriptorAttributes {
    pub fn from_descriptor(raw: U16) -> Self {
        Self::from_bits_retain(raw.get())
    }
}

/// Physically contiguous DMA memory owned by one controller
#[derive(Debug)]
pub struct DmaArena {
    virt: NonNull<u8>,
    len: usize,
    phys: u64,
}

// Safety: the arena is only reachable through its owning controller
unsafe impl Send for DmaArena {}

impl DmaArena {
    /// Take over a DMA region.
    ///
    /// # Safety
    ///
    /// `virt` must be valid for reads and writes of `len` bytes for the
    /// lifetime of the arena, nothing else may access that memory, and the
    /// device must see it at bus address `phys`.
    pub unsafe fn from_raw_parts(virt: NonNull<u8>, len: usize, phys: u64) -> Self {
        assert!(
            len >= ARENA_SIZE,
            "SDHCI: DMA arena of {} bytes is smaller than {}",
            len,
            ARENA_SIZE
        );
        assert!(phys % 8 == 0, "SDHCI: DMA arena must be 8-byte aligned");
        Self { virt, len, phys }
    }

    fn bytes(&mut self) -> &mut [u8] {
        // Safety: guaranteed by the contract of `from_raw_parts`
        unsafe { core::slice::from_raw_parts_mut(self.virt.as_ptr(), self.len) }
    }

    /// Split into (descriptor table, staging area)
    pub fn split(&mut self) -> (&mut [u8], &mut [u8]) {
        let (table, rest) = self.bytes().split_at_mut(DESCRIPTOR_TABLE_SIZE);
        (table, &mut rest[..STAGING_SIZE])
    }

    pub fn descriptor_table(&mut self) -> &mut [u8] {
        self.split().0
    }

    pub fn staging(&mut self) -> &mut [u8] {
        self.split().1
    }

    /// Bus address of the descriptor table
    pub fn descriptor_table_phys(&self) -> u64 {
        self.phys
    }

    /// Bus address of the staging area
    pub fn staging_phys(&self) -> u64 {
        self.phys + DESCRIPTOR_TABLE_SIZE as u64
    }

    /// Bus address one past the last byte the device may touch
    pub fn phys_end(&self) -> u64 {
        self.staging_phys() + STAGING_SIZE as u64
    }
}

/// Number of descriptors in the table for `mode`
pub fn descriptor_capacity(mode: OperatingMode) -> usize {
    match mode {
        OperatingMode::Adma2Addr32 => DESCRIPTORS_32,
        OperatingMode::Adma2Addr64 => DESCRIPTORS_64,
        OperatingMode::Pio => unreachable!("SDHCI: ADMA2 table requested in PIO mode"),
    }
}

/// Most blocks a single table can describe in `mode`
pub fn blocks_per_sweep(mode: OperatingMode) -> u64 {
    descriptor_capacity(mode) as u64 * BLOCKS_PER_DESCRIPTOR
}

/// Describe up to `remaining_blocks` blocks of the staging area.
///
/// Entries advance through the staging area in 64 KiB strides. The entry that
/// exhausts the count, or the last entry of the table, carries END. Returns
/// the number of blocks described; the caller builds another table for the
/// rest.
pub fn build_table(arena: &mut DmaArena, mode: OperatingMode, remaining_blocks: u64) -> u32 {
    assert!(remaining_blocks > 0, "SDHCI: empty ADMA2 table");

    let capacity = descriptor_capacity(mode);
    let staging_phys = arena.staging_phys();
    let table = arena.descriptor_table();
    let mut described = 0u64;

    for entry in 0..capacity {
        let chunk = (remaining_blocks - described).min(BLOCKS_PER_DESCRIPTOR);
        let address = staging_phys + (entry * MAX_DESCRIPTOR_LENGTH) as u64;
        let last = described + chunk == remaining_blocks || entry + 1 == capacity;

        let mut attributes = DescriptorAttributes::VALID | DescriptorAttributes::ACT_TRANSFER;
        if last {
            attributes |= DescriptorAttributes::END;
        }
        let length = if chunk == BLOCKS_PER_DESCRIPTOR {
            0
        } else {
            (chunk as usize * BLOCK_LEN) as u16
        };

        match mode {
            OperatingMode::Adma2Addr32 => {
                assert!(
                    address + MAX_DESCRIPTOR_LENGTH as u64 <= 1 << 32,
                    "SDHCI: ADMA2 address {:#x} beyond 32 bits",
                    address
                );
                let descriptor = Adma2Descriptor32 {
                    attributes: U16::new(attributes.bits()),
                    length: U16::new(length),
                    address: U32::new(address as u32),
                };
                let offset = entry * core::mem::size_of::<Adma2Descriptor32>();
                table[offset..offset + core::mem::size_of::<Adma2Descriptor32>()]
                    .copy_from_slice(descriptor.as_bytes());
            }
            OperatingMode::Adma2Addr64 => {
                let descriptor = Adma2Descriptor64 {
                    attributes: U16::new(attributes.bits()),
                    length: U16::new(length),
                    address_low: U32::new(address as u32),
                    address_high: U32::new((address >> 32) as u32),
                };
                let offset = entry * core::mem::size_of::<Adma2Descriptor64>();
                table[offset..offset + core::mem::size_of::<Adma2Descriptor64>()]
                    .copy_from_slice(descriptor.as_bytes());
            }
            OperatingMode::Pio => unreachable!(),
        }

        described += chunk;
        if last {
            break;
        }
    }

    log::trace!(
        "SDHCI: ADMA2 table describes {} of {} blocks",
        described,
        remaining_blocks
    );
    described as u32
}
