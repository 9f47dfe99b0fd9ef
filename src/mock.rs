//! Scripted SPI and GPIO doubles used by the driver tests.
//!
//! The SPI double decodes the three byte transaction header and models both
//! 16 KiB memory windows, so buffer transfers round-trip through real wrap
//! arithmetic. Register reads are served from a per-register script, then
//! from a sticky value, then as zeros.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    rc::Rc,
    vec::Vec,
};

use embedded_hal::{
    digital,
    spi::{ErrorKind, ErrorType, Operation, SpiDevice},
};

use crate::{regs::Register, ring::WINDOW_SIZE};

const TX_BLOCK: u8 = 0b00010;
const RX_BLOCK: u8 = 0b00011;

type RegKey = (u8, u16);

fn key(register: Register) -> RegKey {
    (register.block.select_bits(), register.offset)
}

#[derive(Default)]
struct MockState {
    transactions: usize,
    fail: bool,
    tx_mem: Vec<u8>,
    rx_mem: Vec<u8>,
    scripted: HashMap<RegKey, VecDeque<Vec<u8>>>,
    sticky: HashMap<RegKey, Vec<u8>>,
    reads: Vec<(RegKey, usize)>,
    writes: Vec<(RegKey, Vec<u8>)>,
}

#[derive(Clone)]
pub(crate) struct MockSpi {
    state: Rc<RefCell<MockState>>,
}

impl MockSpi {
    pub fn new() -> Self {
        let state = MockState {
            tx_mem: vec![0; WINDOW_SIZE as usize],
            rx_mem: vec![0; WINDOW_SIZE as usize],
            ..Default::default()
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// Queue one scripted response for a register read.
    pub fn expect_read(&self, register: Register, data: &[u8]) {
        self.state
            .borrow_mut()
            .scripted
            .entry(key(register))
            .or_default()
            .push_back(data.to_vec());
    }

    /// Serve every unscripted read of `register` with `data`.
    pub fn sticky_read(&self, register: Register, data: &[u8]) {
        self.state
            .borrow_mut()
            .sticky
            .insert(key(register), data.to_vec());
    }

    pub fn clear_sticky_read(&self, register: Register) {
        self.state.borrow_mut().sticky.remove(&key(register));
    }

    pub fn fail_transactions(&self, fail: bool) {
        self.state.borrow_mut().fail = fail;
    }

    pub fn transaction_count(&self) -> usize {
        self.state.borrow().transactions
    }

    pub fn register_read_count(&self, register: Register) -> usize {
        let k = key(register);
        self.state.borrow().reads.iter().filter(|(r, _)| *r == k).count()
    }

    /// Number of reads issued against the RX memory window.
    pub fn rx_buffer_read_count(&self) -> usize {
        self.state
            .borrow()
            .reads
            .iter()
            .filter(|((block, _), _)| *block == RX_BLOCK)
            .count()
    }

    /// Payloads of every write issued against `register`, in order.
    pub fn register_writes(&self, register: Register) -> Vec<Vec<u8>> {
        let k = key(register);
        self.state
            .borrow()
            .writes
            .iter()
            .filter(|(r, _)| *r == k)
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub fn total_write_count(&self) -> usize {
        self.state.borrow().writes.len()
    }

    /// Place raw bytes into the RX memory window, wrapping at the boundary.
    pub fn fill_rx_mem(&self, offset: u16, data: &[u8]) {
        let mut state = self.state.borrow_mut();
        for (i, byte) in data.iter().enumerate() {
            let at = (offset as usize + i) % WINDOW_SIZE as usize;
            state.rx_mem[at] = *byte;
        }
    }

    /// Read back raw bytes from the TX memory window, wrapping at the boundary.
    pub fn tx_mem_at(&self, offset: u16, len: usize) -> Vec<u8> {
        let state = self.state.borrow();
        (0..len)
            .map(|i| state.tx_mem[(offset as usize + i) % WINDOW_SIZE as usize])
            .collect()
    }

    fn serve_read(state: &mut MockState, k: RegKey, buf: &mut [u8]) {
        state.reads.push((k, buf.len()));
        match k.0 {
            TX_BLOCK | RX_BLOCK => {
                let mem = if k.0 == TX_BLOCK {
                    &state.tx_mem
                } else {
                    &state.rx_mem
                };
                let offset = k.1 as usize;
                assert!(
                    offset + buf.len() <= WINDOW_SIZE as usize,
                    "memory window access crosses the boundary unsplit: offset {} len {}",
                    offset,
                    buf.len()
                );
                buf.copy_from_slice(&mem[offset..offset + buf.len()]);
            }
            _ => {
                let scripted = state
                    .scripted
                    .get_mut(&k)
                    .and_then(|queue| queue.pop_front());
                let value = scripted.or_else(|| state.sticky.get(&k).cloned());
                match value {
                    Some(value) => {
                        assert_eq!(
                            value.len(),
                            buf.len(),
                            "scripted read length mismatch for block {} offset {:#06x}",
                            k.0,
                            k.1
                        );
                        buf.copy_from_slice(&value);
                    }
                    None => buf.fill(0),
                }
            }
        }
    }

    fn serve_write(state: &mut MockState, k: RegKey, data: &[u8]) {
        state.writes.push((k, data.to_vec()));
        if k.0 == TX_BLOCK || k.0 == RX_BLOCK {
            let offset = k.1 as usize;
            assert!(
                offset + data.len() <= WINDOW_SIZE as usize,
                "memory window access crosses the boundary unsplit: offset {} len {}",
                offset,
                data.len()
            );
            let mem = if k.0 == TX_BLOCK {
                &mut state.tx_mem
            } else {
                &mut state.rx_mem
            };
            mem[offset..offset + data.len()].copy_from_slice(data);
        }
    }
}

impl ErrorType for MockSpi {
    type Error = ErrorKind;
}

impl SpiDevice for MockSpi {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.fail {
            return Err(ErrorKind::Other);
        }
        state.transactions += 1;

        let (header, rest) = operations.split_first_mut().expect("empty transaction");
        let header = match header {
            Operation::Write(header) => *header,
            other => panic!("transaction must start with a header write, got {other:?}"),
        };
        assert_eq!(header.len(), 3, "header must be offset (2 bytes) + control");
        let offset = u16::from_be_bytes([header[0], header[1]]);
        let control = header[2];
        let block = control >> 3;
        let is_write = control & 0b100 != 0;
        assert_eq!(control & 0b11, 0, "only variable length data mode is valid");
        let k = (block, offset);

        match rest {
            [Operation::Write(data)] => {
                assert!(is_write, "write payload on a read transaction");
                Self::serve_write(&mut state, k, data);
            }
            [Operation::Read(buf)] => {
                assert!(!is_write, "read payload on a write transaction");
                Self::serve_read(&mut state, k, buf);
            }
            other => panic!("unexpected transaction shape: {other:?}"),
        }
        Ok(())
    }
}

/// Interrupt line double. The line is active low.
#[derive(Clone)]
pub(crate) struct MockIntPin {
    asserted: Rc<Cell<bool>>,
}

impl MockIntPin {
    pub fn new() -> Self {
        Self {
            asserted: Rc::new(Cell::new(false)),
        }
    }

    pub fn set_asserted(&self, asserted: bool) {
        self.asserted.set(asserted);
    }
}

impl digital::ErrorType for MockIntPin {
    type Error = core::convert::Infallible;
}

impl digital::InputPin for MockIntPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.asserted.get())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.asserted.get())
    }
}
