//! Register map of the W5500 and the framing of its SPI transactions.
//!
//! Every transaction starts with a three byte header: a 16-bit offset into
//! the selected block, followed by a control byte carrying the block select
//! bits, the read/write bit and the operation mode. Only the variable length
//! data mode (OM = 00) is used, so chip select frames each transfer.

use bitfield_struct::bitfield;
use macro_bits::{bit, serializable_enum};

/// Raw MAC mode is restricted to socket 0 by the hardware.
pub(crate) const RAW_SOCKET: u8 = 0;

/// Number of hardware sockets sharing the buffer memory.
pub(crate) const SOCKET_COUNT: u8 = 8;

/// Control byte of the SPI header.
#[bitfield(u8)]
pub(crate) struct ControlByte {
    /// Operation mode. 00 selects variable length data mode.
    #[bits(2)]
    pub op_mode: u8,
    /// Read/write select. Set for writes.
    pub write: bool,
    /// Block select bits.
    #[bits(5)]
    pub block: u8,
}

/// The memory block a register offset is relative to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Block {
    /// Common register block.
    Common,
    /// Register block of socket `n`.
    Socket(u8),
    /// TX memory window of socket 0.
    TxBuffer,
    /// RX memory window of socket 0.
    RxBuffer,
}

impl Block {
    pub(crate) const fn select_bits(self) -> u8 {
        match self {
            Block::Common => 0b00000,
            Block::Socket(socket) => socket * 4 + 1,
            Block::TxBuffer => 0b00010,
            Block::RxBuffer => 0b00011,
        }
    }
}

/// A chip-internal location, constructed per transaction and never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Register {
    pub block: Block,
    pub offset: u16,
}

impl Register {
    pub(crate) const fn common(offset: u16) -> Self {
        Self {
            block: Block::Common,
            offset,
        }
    }
    pub(crate) const fn socket(socket: u8, offset: u16) -> Self {
        Self {
            block: Block::Socket(socket),
            offset,
        }
    }
    pub(crate) const fn tx_buffer(offset: u16) -> Self {
        Self {
            block: Block::TxBuffer,
            offset,
        }
    }
    pub(crate) const fn rx_buffer(offset: u16) -> Self {
        Self {
            block: Block::RxBuffer,
            offset,
        }
    }
    /// Encode the three byte SPI header for this location.
    pub(crate) fn header(self, write: bool) -> [u8; 3] {
        let control = ControlByte::new()
            .with_op_mode(0)
            .with_write(write)
            .with_block(self.block.select_bits());
        let [hi, lo] = self.offset.to_be_bytes();
        [hi, lo, control.into_bits()]
    }
}

/// Common register block offsets.
pub(crate) mod common {
    /// Mode register.
    pub const MR: u16 = 0x0000;
    /// Source hardware (MAC) address, 6 bytes.
    pub const SHAR: u16 = 0x0009;
    /// Interrupt low level timer, controls interrupt re-assertion.
    pub const INTLEVEL: u16 = 0x0013;
    /// Socket interrupt mask.
    pub const SIMR: u16 = 0x0018;
    /// Combined PHY configuration/status register, the chip's only PHY register.
    pub const PHYCFGR: u16 = 0x002E;
    /// Chip version.
    pub const VERSIONR: u16 = 0x0039;
}

/// Per-socket register block offsets.
pub(crate) mod socket {
    /// Socket mode register.
    pub const MR: u16 = 0x0000;
    /// Socket command register, auto-cleared on command acceptance.
    pub const CR: u16 = 0x0001;
    /// Socket interrupt status, write 1 to clear.
    pub const IR: u16 = 0x0002;
    /// RX buffer size in KiB.
    pub const RXBUF_SIZE: u16 = 0x001E;
    /// TX buffer size in KiB.
    pub const TXBUF_SIZE: u16 = 0x001F;
    /// TX free size, 16 bits.
    pub const TX_FSR: u16 = 0x0020;
    /// TX write pointer, 16 bits.
    pub const TX_WR: u16 = 0x0024;
    /// RX received size, 16 bits.
    pub const RX_RSR: u16 = 0x0026;
    /// RX read pointer, 16 bits.
    pub const RX_RD: u16 = 0x0028;
    /// Socket interrupt mask.
    pub const IMR: u16 = 0x002C;
}

/// `MR` software reset bit, auto-clearing.
pub(crate) const MR_RST: u8 = bit!(7);
/// `MR` ping block bit.
pub(crate) const MR_PB: u8 = bit!(4);
/// `Sn_MR` MAC address filtering.
pub(crate) const SN_MR_MFEN: u8 = bit!(7);
/// `Sn_MR` raw MAC mode.
pub(crate) const SN_MR_MACRAW: u8 = bit!(2);
/// `Sn_IR` frame received.
pub(crate) const SN_IR_RECV: u8 = bit!(2);
/// `Sn_IR` send complete.
pub(crate) const SN_IR_SENDOK: u8 = bit!(4);
/// `SIMR` socket 0 interrupt enable.
pub(crate) const SIMR_SOCK0: u8 = bit!(0);

serializable_enum! {
    /// Command codes accepted by the socket command register.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum SocketCommand: u8 {
        Open => 0x01,
        Close => 0x10,
        Send => 0x20,
        Recv => 0x40
    }
}

/// Layout of `PHYCFGR`.
#[bitfield(u8)]
pub(crate) struct PhyConfig {
    pub link_up: bool,
    pub speed_100m: bool,
    pub full_duplex: bool,
    #[bits(3)]
    pub op_mode_config: u8,
    pub op_mode: bool,
    /// Cleared while the PHY is held in reset.
    pub reset_complete: bool,
}
