//! Locked read/write primitives over the SPI bus.
//!
//! Every register access is one SPI transaction and holds the bus lock for
//! exactly that transaction. Lock acquisition is bounded; a caller that
//! cannot take the bus within the bound fails with [MacError::Timeout]
//! without touching the hardware.

use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{with_timeout, Duration};
use embedded_hal::spi::{Operation, SpiDevice};

use crate::{
    mac::{MacError, MacResult},
    regs::Register,
    DefaultRawMutex,
};

/// Register reads of this size or less go through an inline scratch buffer,
/// mirroring how short chip register reads are kept off the caller's buffer
/// until the transaction has completed.
const INLINE_READ_LEN: usize = 4;

pub(crate) struct RegisterBus<SPI> {
    spi: Mutex<DefaultRawMutex, SPI>,
    lock_timeout: Duration,
}

impl<SPI: SpiDevice> RegisterBus<SPI> {
    pub fn new(spi: SPI, lock_timeout: Duration) -> Self {
        Self {
            spi: Mutex::new(spi),
            lock_timeout,
        }
    }

    async fn device(&self) -> MacResult<MutexGuard<'_, DefaultRawMutex, SPI>> {
        with_timeout(self.lock_timeout, self.spi.lock())
            .await
            .map_err(|_| MacError::Timeout)
    }

    /// Write `data` to `register` in one transaction.
    pub async fn write(&self, register: Register, data: &[u8]) -> MacResult<()> {
        let header = register.header(true);
        let mut spi = self.device().await?;
        spi.transaction(&mut [Operation::Write(&header), Operation::Write(data)])
            .map_err(|_| {
                error!("SPI write transaction failed");
                MacError::HardwareFault
            })
    }

    /// Read `data.len()` bytes from `register` in one transaction.
    pub async fn read(&self, register: Register, data: &mut [u8]) -> MacResult<()> {
        let header = register.header(false);
        let mut spi = self.device().await?;
        if data.len() <= INLINE_READ_LEN {
            let mut scratch = [0u8; INLINE_READ_LEN];
            let scratch = &mut scratch[..data.len()];
            spi.transaction(&mut [Operation::Write(&header), Operation::Read(scratch)])
                .map_err(|_| {
                    error!("SPI read transaction failed");
                    MacError::HardwareFault
                })?;
            data.copy_from_slice(scratch);
        } else {
            spi.transaction(&mut [Operation::Write(&header), Operation::Read(data)])
                .map_err(|_| {
                    error!("SPI read transaction failed");
                    MacError::HardwareFault
                })?;
        }
        Ok(())
    }

    pub async fn read_u8(&self, register: Register) -> MacResult<u8> {
        let mut value = [0u8; 1];
        self.read(register, &mut value).await?;
        Ok(value[0])
    }

    pub async fn write_u8(&self, register: Register, value: u8) -> MacResult<()> {
        self.write(register, &[value]).await
    }

    /// Read a 16-bit register, swapping from wire (big-endian) to host order.
    pub async fn read_u16(&self, register: Register) -> MacResult<u16> {
        let mut value = [0u8; 2];
        self.read(register, &mut value).await?;
        Ok(u16::from_be_bytes(value))
    }

    /// Write a 16-bit register in wire (big-endian) order.
    pub async fn write_u16(&self, register: Register, value: u16) -> MacResult<()> {
        self.write(register, &value.to_be_bytes()).await
    }

    #[cfg(test)]
    pub async fn lock_for_test(&self) -> MutexGuard<'_, DefaultRawMutex, SPI> {
        self.spi.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mock::MockSpi,
        regs::{common, socket, Register},
    };
    use embassy_futures::block_on;

    fn bus() -> (RegisterBus<MockSpi>, MockSpi) {
        let spi = MockSpi::new();
        let handle = spi.clone();
        (RegisterBus::new(spi, Duration::from_millis(50)), handle)
    }

    #[test]
    fn short_reads_use_the_inline_path_and_return_correct_data() {
        let (bus, spi) = bus();
        spi.expect_read(Register::common(common::VERSIONR), &[0x04]);
        let version = block_on(bus.read_u8(Register::common(common::VERSIONR))).unwrap();
        assert_eq!(version, 0x04);
        assert_eq!(spi.transaction_count(), 1);
    }

    #[test]
    fn u16_reads_are_byte_swapped_from_wire_order() {
        let (bus, spi) = bus();
        spi.expect_read(Register::socket(0, socket::TX_WR), &[0x12, 0x34]);
        let value = block_on(bus.read_u16(Register::socket(0, socket::TX_WR))).unwrap();
        assert_eq!(value, 0x1234);
    }

    #[test]
    fn u16_writes_are_big_endian_on_the_wire() {
        let (bus, spi) = bus();
        block_on(bus.write_u16(Register::socket(0, socket::RX_RD), 0xABCD)).unwrap();
        let writes = spi.register_writes(Register::socket(0, socket::RX_RD));
        assert_eq!(writes, [[0xAB, 0xCD].to_vec()]);
    }

    #[test]
    fn long_reads_bypass_the_scratch_buffer() {
        let (bus, spi) = bus();
        spi.expect_read(Register::common(common::SHAR), &[1, 2, 3, 4, 5, 6]);
        let mut addr = [0u8; 6];
        block_on(bus.read(Register::common(common::SHAR), &mut addr)).unwrap();
        assert_eq!(addr, [1, 2, 3, 4, 5, 6]);
        assert_eq!(spi.transaction_count(), 1);
    }

    #[test]
    fn a_held_lock_times_out_without_touching_the_bus() {
        let (bus, spi) = bus();
        let _guard = block_on(bus.lock_for_test());
        let res = block_on(bus.write_u8(Register::common(common::MR), 0x80));
        assert_eq!(res, Err(MacError::Timeout));
        assert_eq!(spi.transaction_count(), 0);
    }

    #[test]
    fn transport_failures_surface_as_hardware_faults() {
        let (bus, spi) = bus();
        spi.fail_transactions(true);
        let res = block_on(bus.read_u8(Register::common(common::MR)));
        assert_eq!(res, Err(MacError::HardwareFault));
        let res = block_on(bus.write_u8(Register::common(common::MR), 0));
        assert_eq!(res, Err(MacError::HardwareFault));
    }
}
