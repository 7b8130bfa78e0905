//! SD host controller driver
//!
//! Drives a standard SDHCI slot: resets and powers the host, brings an SD
//! memory card from idle to the transfer state, then moves 512-byte blocks
//! using programmed I/O or ADMA2 scatter-gather DMA.
//!
//! The crate is `no_std` and allocation free. The platform provides the
//! mapped register window ([`RegisterAccess`]), a delay
//! ([`embedded_hal::delay::DelayNs`]) and optionally a DMA arena
//! ([`DmaArena`]).
//!
//! ```rust,ignore
//! let window = unsafe { MmioWindow::new(base) };
//! let config = ControllerConfig::default();
//! let mut controller = SdhciController::new(window, delay, Some(arena), config);
//! controller.initialize()?;
//! if let Some(mut card) = controller.device(0) {
//!     let mut block = [0u8; BLOCK_LEN];
//!     card.read_block(0, 1, &mut block)?;
//! }
//! ```

#![cfg_attr(not(test), no_std)]

pub mod block;
pub mod drivers;
pub mod time;

pub use block::{BLOCK_LEN, BlockDevice};
pub use drivers::sdhci::{
    Adma64Policy, CardIdentity, ControllerConfig, DmaArena, HostVersion, LunAddress, MmioWindow,
    OperatingMode, RegisterAccess, SdCard, SdhciController, SdhciError,
};
pub use time::RetryPolicy;
