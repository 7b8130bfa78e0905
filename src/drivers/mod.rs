//! Hardware drivers
//!
//! This module contains the SD host controller driver.

pub mod sdhci;
