//! Block device capability
//!
//! The storage layer above this crate only needs to move whole blocks and
//! to know the geometry of the medium.

/// SD cards are always driven with 512 byte blocks.
pub const BLOCK_LEN: usize = 512;

/// Sometimes we want `BLOCK_LEN` as a `u32` and the casts don't look nice.
pub const BLOCK_LEN_U32: u32 = 512;

/// Sometimes we want `BLOCK_LEN` as a `u64` and the casts don't look nice.
pub const BLOCK_LEN_U64: u64 = 512;

/// A device addressed in fixed-size blocks.
pub trait BlockDevice {
    /// Error type returned by the transfer methods
    type Error: core::fmt::Debug;

    /// Read `block_count` blocks starting at `block_address` into `buffer`.
    ///
    /// `buffer` must hold at least `block_count * block_size()` bytes.
    fn read_block(
        &mut self,
        block_address: u64,
        block_count: u32,
        buffer: &mut [u8],
    ) -> Result<(), Self::Error>;

    /// Write `block_count` blocks from `buffer` starting at `block_address`.
    fn write_block(
        &mut self,
        block_address: u64,
        block_count: u32,
        buffer: &[u8],
    ) -> Result<(), Self::Error>;

    /// Size of one block in bytes
    fn block_size(&self) -> u32;

    /// Number of blocks on the medium
    fn block_count(&self) -> u64;

    /// Total capacity in bytes
    fn capacity(&self) -> u64 {
        self.block_count() * u64::from(self.block_size())
    }
}
