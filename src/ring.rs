//! Offset-wrapping access to the chip's TX and RX memory windows.
//!
//! Both windows are 16 KiB rings addressed by free-running 16-bit pointers.
//! A transfer whose span crosses the window boundary must be split into the
//! tail before the wrap and the head after it; a single transfer across the
//! boundary corrupts silently.

use embedded_hal::spi::SpiDevice;

use crate::{
    bus::RegisterBus,
    mac::MacResult,
    regs::{socket, Register, RAW_SOCKET},
};

/// Size of each of the TX and RX memory windows.
pub(crate) const WINDOW_SIZE: u16 = 0x4000;

/// Which on-chip memory window a transfer targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RingWindow {
    Tx,
    Rx,
}

impl RingWindow {
    const fn register(self, offset: u16) -> Register {
        match self {
            RingWindow::Tx => Register::tx_buffer(offset),
            RingWindow::Rx => Register::rx_buffer(offset),
        }
    }
}

/// Write `data` into `window` starting at `offset`, splitting at the wrap.
pub(crate) async fn write_buffer<SPI: SpiDevice>(
    bus: &RegisterBus<SPI>,
    window: RingWindow,
    data: &[u8],
    offset: u16,
) -> MacResult<()> {
    let mut offset = offset % WINDOW_SIZE;
    let mut data = data;
    if offset as usize + data.len() > WINDOW_SIZE as usize {
        let first_len = (WINDOW_SIZE - offset) as usize;
        let (tail, head) = data.split_at(first_len);
        bus.write(window.register(offset), tail).await?;
        offset = 0;
        data = head;
    }
    bus.write(window.register(offset), data).await
}

/// Read `data.len()` bytes from `window` starting at `offset`, splitting at
/// the wrap.
pub(crate) async fn read_buffer<SPI: SpiDevice>(
    bus: &RegisterBus<SPI>,
    window: RingWindow,
    data: &mut [u8],
    offset: u16,
) -> MacResult<()> {
    let mut offset = offset % WINDOW_SIZE;
    let mut data = data;
    if offset as usize + data.len() > WINDOW_SIZE as usize {
        let first_len = (WINDOW_SIZE - offset) as usize;
        let (tail, head) = data.split_at_mut(first_len);
        bus.read(window.register(offset), tail).await?;
        offset = 0;
        data = head;
    }
    bus.read(window.register(offset), data).await
}

/// Free space in the TX window.
///
/// The chip updates the 16-bit size registers while a transaction is in
/// flight, so the value is read until two consecutive reads agree.
pub(crate) async fn tx_free_size<SPI: SpiDevice>(bus: &RegisterBus<SPI>) -> MacResult<u16> {
    let register = Register::socket(RAW_SOCKET, socket::TX_FSR);
    loop {
        let first = bus.read_u16(register).await?;
        let second = bus.read_u16(register).await?;
        if first == second {
            return Ok(first);
        }
    }
}

/// Bytes queued in the RX window, with the same double-read guard.
pub(crate) async fn rx_received_size<SPI: SpiDevice>(bus: &RegisterBus<SPI>) -> MacResult<u16> {
    let register = Register::socket(RAW_SOCKET, socket::RX_RSR);
    loop {
        let first = bus.read_u16(register).await?;
        let second = bus.read_u16(register).await?;
        if first == second {
            return Ok(first);
        }
    }
}
