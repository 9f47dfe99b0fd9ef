//! # `w5500-mac`
//! This is a driver for the raw MAC mode of the W5500 SPI Ethernet controller.
//! The chip's TCP/IP offload engine is left unused; a single socket carries
//! whole Ethernet frames and the host network stack does everything above
//! the MAC.
//! ## Hardware overview
//! This chapter gives a short overview of how the chip is driven.
//!
//! ### SPI access
//! Every register and buffer access is one SPI transaction: a three byte
//! header selecting a block, an offset and a direction, followed by the data
//! phase. Multi-byte values travel big-endian. The driver serializes all
//! access through one bounded lock, so a wedged task cannot hold the bus
//! forever; see [MacConfig::lock_timeout].
//!
//! ### Buffer memory
//! The chip has 16 KiB of TX and 16 KiB of RX buffer memory, which the
//! driver assigns entirely to socket 0. Both windows behave as rings
//! addressed by free-running 16-bit pointers, so transfers that span the
//! window boundary are split in two. Received frames carry a 2-byte length
//! header; transmitted frames are written at the TX write pointer and
//! kicked off with a SEND command.
//!
//! ### Receive (RX)
//! The chip signals received frames on an active-low interrupt line. The
//! platform's interrupt handler forwards the edge through
//! [W5500Mac::on_interrupt], which only raises a saturating signal; all bus
//! work happens on the receive task running [W5500Mac::run]. The task
//! drains every queued frame per wake-up and hands each one to the
//! [EthMediator]. Waits are bounded and the line level is re-checked, so a
//! missed edge delays reception instead of stopping it.

#![cfg_attr(not(test), no_std)]
pub(crate) mod fmt;

extern crate alloc;

mod bus;
mod mac;
#[cfg(test)]
mod mock;
mod regs;
mod ring;
mod sync;

pub use mac::*;

#[cfg(not(feature = "critical_section"))]
type DefaultRawMutex = embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(feature = "critical_section")]
type DefaultRawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
