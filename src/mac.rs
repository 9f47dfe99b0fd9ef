//! Driver for the raw MAC of the W5500.
//!
//! The chip is driven through three cooperating pieces: the host network
//! stack calling the lifecycle and transmit operations from its own tasks,
//! the platform interrupt handler forwarding the chip's active-low INT edge
//! through [W5500Mac::on_interrupt], and the receive task running
//! [W5500Mac::run], which drains queued frames and hands them to the
//! mediator. All hardware access funnels through the locked register bus;
//! the interrupt handler itself never touches the bus.

use core::cell::{Cell, RefCell};

use alloc::vec::Vec;

use embassy_futures::yield_now;
use embassy_sync::blocking_mutex;
use embassy_time::{with_timeout, Duration, Timer};
use embedded_hal::{digital::InputPin, spi::SpiDevice};
use portable_atomic::{AtomicBool, AtomicU8, Ordering};

use crate::{
    bus::RegisterBus,
    regs::{
        common, socket, PhyConfig, Register, SocketCommand, MR_PB, MR_RST, RAW_SOCKET, SIMR_SOCK0,
        SN_IR_RECV, SN_IR_SENDOK, SN_MR_MACRAW, SN_MR_MFEN, SOCKET_COUNT,
    },
    ring::{self, RingWindow},
    sync::RxSignal,
    DefaultRawMutex,
};

/// Largest Ethernet frame the receive path allocates for.
pub const MAX_FRAME_LEN: usize = 1518;

/// Lower bound of the supported SPI clock. Below this the chip cannot keep
/// up with raw-mode streaming.
pub const SPI_CLOCK_MIN_HZ: u32 = 14_000_000;
/// Upper bound of the supported SPI clock.
pub const SPI_CLOCK_MAX_HZ: u32 = 25_000_000;

/// Minimum time chip select must stay asserted after a transfer.
const CS_HOLD_TIME_MIN_NS: u32 = 210;

/// Interval between polls of an auto-clearing register.
const CMD_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Completion bound for socket commands.
const CMD_TIMEOUT: Duration = Duration::from_millis(100);
/// Bound on one wait of the receive task before it re-checks the interrupt
/// line level.
const RX_WAIT_BOUND: Duration = Duration::from_secs(1);
/// Send-completion polls before the PHY liveness probe kicks in.
const TX_LIVENESS_RETRIES: u32 = 3;
/// Send-completion polls before the transmit fails outright.
const TX_MAX_RETRIES: u32 = 10;

/// Number of SPI clock cycles chip select must stay asserted after a
/// transfer to meet the chip's CS hold time. Platforms program this into
/// their SPI peripheral alongside the clock they pass to [MacConfig].
pub const fn cs_hold_cycles(spi_clock_hz: u32) -> u32 {
    let mhz = spi_clock_hz / 1_000_000;
    (mhz * CS_HOLD_TIME_MIN_NS).div_ceil(1000)
}

/// Errors returned by the MAC driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacError {
    /// Bus lock acquisition or a chip-side completion poll ran out of time.
    Timeout,
    /// A parameter the chip cannot act on, e.g. a register that is not the
    /// PHY configuration register.
    InvalidArgument,
    /// The frame does not fit the free TX memory, or no receive buffer could
    /// be allocated.
    NoMemory,
    /// The chip has no hardware for the requested feature.
    Unsupported,
    /// An SPI transaction failed at the transport layer.
    HardwareFault,
}

pub type MacResult<T> = Result<T, MacError>;

/// Link status reported by the PHY collaborator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkStatus {
    #[default]
    Down,
    Up,
}

/// Negotiated link speed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Speed {
    Mbps10,
    Mbps100,
}

/// Negotiated duplex mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Duplex {
    Half,
    Full,
}

/// Lifecycle states of the driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacState {
    #[default]
    Uninitialized,
    Initialized,
    Started,
    Stopped,
    Deinitialized,
    Deleted,
}

impl MacState {
    const fn into_bits(self) -> u8 {
        self as u8
    }
    const fn from_bits(bits: u8) -> Self {
        match bits {
            1 => MacState::Initialized,
            2 => MacState::Started,
            3 => MacState::Stopped,
            4 => MacState::Deinitialized,
            5 => MacState::Deleted,
            _ => MacState::Uninitialized,
        }
    }
}

/// State changes reported to the mediator at the init/deinit boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MediatorEvent {
    /// Low-level initialization is about to run.
    LowLevelInit,
    /// The driver released the chip, either on deinit or while rolling back
    /// a failed init.
    Deinit,
}

/// The host network stack's side of the driver contract.
///
/// Callbacks run on the task that triggered them; `stack_input` runs on the
/// receive task. Implementations must not call back into the driver.
pub trait EthMediator {
    /// Hands one received frame to the stack. Ownership of the buffer moves
    /// to the stack.
    fn stack_input(&self, frame: Vec<u8>) -> MacResult<()>;
    /// Notifies the stack of a low-level driver state change.
    fn on_state_changed(&self, event: MediatorEvent) -> MacResult<()>;
}

/// Static configuration of one attached chip.
#[derive(Clone, Copy, Debug)]
pub struct MacConfig {
    /// SPI clock the bus was set up with, in Hz. Must be within
    /// [SPI_CLOCK_MIN_HZ]..=[SPI_CLOCK_MAX_HZ].
    pub spi_clock_hz: u32,
    /// Hardware address programmed into the chip.
    pub mac_address: [u8; 6],
    /// Bound on software reset completion.
    pub reset_timeout: Duration,
    /// Bound on SPI bus lock acquisition.
    pub lock_timeout: Duration,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            spi_clock_hz: 25_000_000,
            mac_address: [0; 6],
            reset_timeout: Duration::from_millis(500),
            lock_timeout: Duration::from_millis(50),
        }
    }
}

/// Driver handle for one W5500 in raw MAC mode.
///
/// Exactly one handle exists per attached chip. The platform wires its
/// interrupt for the chip's INT line to [on_interrupt](Self::on_interrupt)
/// and spawns [run](Self::run) as the receive task; the host network stack
/// drives everything else.
pub struct W5500Mac<SPI, INT, M> {
    bus: RegisterBus<SPI>,
    int_pin: blocking_mutex::Mutex<DefaultRawMutex, RefCell<INT>>,
    mediator: blocking_mutex::Mutex<DefaultRawMutex, RefCell<Option<M>>>,
    mac_address: blocking_mutex::Mutex<DefaultRawMutex, Cell<[u8; 6]>>,
    rx_signal: RxSignal,
    state: AtomicU8,
    int_armed: AtomicBool,
    packets_remain: AtomicBool,
    reset_timeout: Duration,
}

fn sock_reg(offset: u16) -> Register {
    Register::socket(RAW_SOCKET, offset)
}

impl<SPI, INT, M> W5500Mac<SPI, INT, M>
where
    SPI: SpiDevice,
    INT: InputPin,
    M: EthMediator,
{
    /// Create the handle. Fails with [MacError::InvalidArgument] if the SPI
    /// clock is outside the range the chip supports.
    pub fn new(spi: SPI, int_pin: INT, config: MacConfig) -> MacResult<Self> {
        if !(SPI_CLOCK_MIN_HZ..=SPI_CLOCK_MAX_HZ).contains(&config.spi_clock_hz) {
            error!(
                "SPI clock {} Hz outside the supported 14-25 MHz range",
                config.spi_clock_hz
            );
            return Err(MacError::InvalidArgument);
        }
        Ok(Self {
            bus: RegisterBus::new(spi, config.lock_timeout),
            int_pin: blocking_mutex::Mutex::new(RefCell::new(int_pin)),
            mediator: blocking_mutex::Mutex::new(RefCell::new(None)),
            mac_address: blocking_mutex::Mutex::new(Cell::new(config.mac_address)),
            rx_signal: RxSignal::new(),
            state: AtomicU8::new(MacState::Uninitialized.into_bits()),
            int_armed: AtomicBool::new(false),
            packets_remain: AtomicBool::new(false),
            reset_timeout: config.reset_timeout,
        })
    }

    /// Attach the host network stack.
    pub fn set_mediator(&self, mediator: M) {
        self.mediator
            .lock(|cell| *cell.borrow_mut() = Some(mediator));
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MacState {
        MacState::from_bits(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: MacState) {
        self.state.store(state.into_bits(), Ordering::Release);
    }

    fn notify_mediator(&self, event: MediatorEvent) -> MacResult<()> {
        self.mediator.lock(|cell| match &*cell.borrow() {
            Some(mediator) => mediator.on_state_changed(event),
            None => Err(MacError::InvalidArgument),
        })
    }

    /// Bring up the chip: reset, identity check, default register program.
    ///
    /// The interrupt hand-off is armed for the duration of the attempt; on
    /// any failure it is rolled back so a later attempt starts from a clean
    /// slate, and the mediator sees a [MediatorEvent::Deinit].
    pub async fn init(&self) -> MacResult<()> {
        self.rx_signal.reset();
        self.int_armed.store(true, Ordering::Release);
        match self.init_chip().await {
            Ok(()) => {
                self.set_state(MacState::Initialized);
                Ok(())
            }
            Err(err) => {
                self.int_armed.store(false, Ordering::Release);
                if self.notify_mediator(MediatorEvent::Deinit).is_err() {
                    warn!("mediator deinit notification failed during init rollback");
                }
                Err(err)
            }
        }
    }

    async fn init_chip(&self) -> MacResult<()> {
        self.notify_mediator(MediatorEvent::LowLevelInit)?;
        self.reset().await?;
        self.verify_identity().await?;
        self.setup_defaults().await?;
        let address = self.address();
        self.bus
            .write(Register::common(common::SHAR), &address)
            .await
    }

    /// Release the chip. Teardown is best effort: a failing step is logged
    /// and the remaining steps still run.
    pub async fn deinit(&self) -> MacResult<()> {
        if let Err(err) = self.stop().await {
            warn!("stopping the socket during deinit failed: {:?}", err);
        }
        self.int_armed.store(false, Ordering::Release);
        if self.notify_mediator(MediatorEvent::Deinit).is_err() {
            warn!("mediator deinit notification failed");
        }
        self.set_state(MacState::Deinitialized);
        Ok(())
    }

    /// Tear down the worker: the receive task observes the state change and
    /// returns. The handle itself is released by dropping it.
    pub fn delete(&self) {
        self.set_state(MacState::Deleted);
        self.rx_signal.put();
    }

    /// Open the socket and enable its receive interrupt.
    pub async fn start(&self) -> MacResult<()> {
        self.send_command(SocketCommand::Open, CMD_TIMEOUT).await?;
        self.bus
            .write_u8(Register::common(common::SIMR), SIMR_SOCK0)
            .await?;
        self.set_state(MacState::Started);
        debug!("socket opened, receive interrupt enabled");
        Ok(())
    }

    /// Disable the socket interrupt and close the socket.
    pub async fn stop(&self) -> MacResult<()> {
        self.bus.write_u8(Register::common(common::SIMR), 0).await?;
        self.send_command(SocketCommand::Close, CMD_TIMEOUT).await?;
        self.set_state(MacState::Stopped);
        debug!("socket closed, receive interrupt disabled");
        Ok(())
    }

    /// Drive start/stop from the PHY's link state.
    pub async fn set_link(&self, link: LinkStatus) -> MacResult<()> {
        match link {
            LinkStatus::Up => {
                debug!("link is up");
                self.start().await
            }
            LinkStatus::Down => {
                debug!("link is down");
                self.stop().await
            }
        }
    }

    /// The chip negotiates speed on its own and exposes no write path, so
    /// this only acknowledges the value.
    pub fn set_speed(&self, speed: Speed) -> MacResult<()> {
        match speed {
            Speed::Mbps10 => debug!("speed set to 10 Mbps"),
            Speed::Mbps100 => debug!("speed set to 100 Mbps"),
        }
        Ok(())
    }

    /// Duplex is negotiated by the chip as well; see [set_speed](Self::set_speed).
    pub fn set_duplex(&self, duplex: Duplex) -> MacResult<()> {
        match duplex {
            Duplex::Half => debug!("duplex set to half"),
            Duplex::Full => debug!("duplex set to full"),
        }
        Ok(())
    }

    /// Read a PHY register. MAC and PHY registers share one address space on
    /// this chip and the only PHY register is the configuration register;
    /// any other address is rejected.
    pub async fn read_phy_register(&self, register: u16) -> MacResult<u8> {
        if register != common::PHYCFGR {
            debug!("PHY register {:#x} does not exist on this chip", register);
            return Err(MacError::InvalidArgument);
        }
        self.bus.read_u8(Register::common(common::PHYCFGR)).await
    }

    /// Write a PHY register, with the same restriction as
    /// [read_phy_register](Self::read_phy_register).
    pub async fn write_phy_register(&self, register: u16, value: u8) -> MacResult<()> {
        if register != common::PHYCFGR {
            debug!("PHY register {:#x} does not exist on this chip", register);
            return Err(MacError::InvalidArgument);
        }
        self.bus
            .write_u8(Register::common(common::PHYCFGR), value)
            .await
    }

    /// Program the hardware address into the chip and cache it.
    pub async fn set_address(&self, address: [u8; 6]) -> MacResult<()> {
        self.mac_address.lock(|cell| cell.set(address));
        self.bus
            .write(Register::common(common::SHAR), &address)
            .await
    }

    /// The cached hardware address.
    pub fn address(&self) -> [u8; 6] {
        self.mac_address.lock(|cell| cell.get())
    }

    /// Toggle hardware address filtering. Promiscuous mode clears the
    /// filter bit of the socket mode register.
    pub async fn set_promiscuous(&self, enable: bool) -> MacResult<()> {
        let mut mode = self.bus.read_u8(sock_reg(socket::MR)).await?;
        if enable {
            mode &= !SN_MR_MFEN;
        } else {
            mode |= SN_MR_MFEN;
        }
        self.bus.write_u8(sock_reg(socket::MR), mode).await
    }

    /// The chip has no flow control hardware.
    pub fn enable_flow_control(&self, _enable: bool) -> MacResult<()> {
        Err(MacError::Unsupported)
    }

    /// The chip cannot honor a peer's PAUSE ability.
    pub fn set_peer_pause_ability(&self, _ability: u32) -> MacResult<()> {
        Err(MacError::Unsupported)
    }

    /// Queue one frame in the TX window and wait for the chip to send it.
    pub async fn transmit(&self, frame: &[u8]) -> MacResult<()> {
        let free = ring::tx_free_size(&self.bus).await?;
        if frame.len() > free as usize {
            debug!(
                "TX free size {} cannot hold a {} byte frame",
                free,
                frame.len()
            );
            return Err(MacError::NoMemory);
        }

        let pointer = self.bus.read_u16(sock_reg(socket::TX_WR)).await?;
        ring::write_buffer(&self.bus, RingWindow::Tx, frame, pointer).await?;
        self.bus
            .write_u16(sock_reg(socket::TX_WR), pointer.wrapping_add(frame.len() as u16))
            .await?;
        self.send_command(SocketCommand::Send, CMD_TIMEOUT).await?;

        // Poll for send completion. After a few empty polls, probe the PHY
        // to distinguish "still transmitting" from a dead link.
        let mut retries = 0u32;
        loop {
            let status = self.bus.read_u8(sock_reg(socket::IR)).await?;
            if status & SN_IR_SENDOK != 0 {
                break;
            }
            retries += 1;
            if (retries > TX_LIVENESS_RETRIES && !self.phy_ready().await)
                || retries > TX_MAX_RETRIES
            {
                debug!("send completion not signalled after {} polls", retries);
                return Err(MacError::Timeout);
            }
            yield_now().await;
        }
        self.bus.write_u8(sock_reg(socket::IR), SN_IR_SENDOK).await
    }

    /// Pull one frame out of the RX window.
    ///
    /// Returns the payload length, or zero when nothing is queued. When more
    /// bytes remain beyond this frame, the handle's "more frames remain"
    /// flag stays set so the drain loop keeps going.
    pub async fn receive(&self, frame: &mut [u8]) -> MacResult<usize> {
        self.packets_remain.store(false, Ordering::Release);
        let queued = ring::rx_received_size(&self.bus).await?;
        if queued == 0 {
            return Ok(0);
        }

        let pointer = self.bus.read_u16(sock_reg(socket::RX_RD)).await?;
        let mut header = [0u8; 2];
        ring::read_buffer(&self.bus, RingWindow::Rx, &mut header, pointer).await?;
        // The 2-byte header length includes the header itself.
        let length = u16::from_be_bytes(header).wrapping_sub(2);
        if length as usize > frame.len() {
            debug!("frame of {} bytes exceeds the receive buffer", length);
            return Err(MacError::InvalidArgument);
        }
        ring::read_buffer(
            &self.bus,
            RingWindow::Rx,
            &mut frame[..length as usize],
            pointer.wrapping_add(2),
        )
        .await?;

        self.bus
            .write_u16(
                sock_reg(socket::RX_RD),
                pointer.wrapping_add(2).wrapping_add(length),
            )
            .await?;
        self.send_command(SocketCommand::Recv, CMD_TIMEOUT).await?;

        let consumed = length.wrapping_add(2);
        self.packets_remain
            .store(queued > consumed, Ordering::Release);
        Ok(length as usize)
    }

    /// Entry point for the platform's INT line interrupt. Performs no bus
    /// access; it only wakes the receive task.
    pub fn on_interrupt(&self) {
        if self.int_armed.load(Ordering::Acquire) {
            self.rx_signal.put();
        }
    }

    /// The receive task. Runs until [delete](Self::delete).
    ///
    /// Each wait is bounded so a missed edge cannot stall reception: when
    /// the wait expires the interrupt line level itself decides whether the
    /// chip still wants service.
    pub async fn run(&self) {
        loop {
            if self.state() == MacState::Deleted {
                debug!("receive task exiting");
                return;
            }
            let notified = with_timeout(RX_WAIT_BOUND, self.rx_signal.wait())
                .await
                .is_ok();
            if !notified && !self.interrupt_asserted() {
                continue;
            }

            let status = match self.bus.read_u8(sock_reg(socket::IR)).await {
                Ok(status) => status,
                Err(err) => {
                    debug!("reading socket interrupt status failed: {:?}", err);
                    continue;
                }
            };
            if status & SN_IR_RECV == 0 {
                continue;
            }
            if let Err(err) = self.bus.write_u8(sock_reg(socket::IR), SN_IR_RECV).await {
                debug!("clearing the receive interrupt failed: {:?}", err);
                continue;
            }

            // A single wake-up may stand for several frames.
            loop {
                let mut frame = Vec::new();
                if frame.try_reserve_exact(MAX_FRAME_LEN).is_err() {
                    error!("no memory for a receive buffer, dropping frame");
                    break;
                }
                frame.resize(MAX_FRAME_LEN, 0);
                match self.receive(&mut frame).await {
                    Ok(0) => {}
                    Ok(length) => {
                        frame.truncate(length);
                        self.input_to_stack(frame);
                    }
                    Err(err) => debug!("receive failed: {:?}", err),
                }
                if !self.packets_remain.load(Ordering::Acquire) {
                    break;
                }
            }
        }
    }

    fn input_to_stack(&self, frame: Vec<u8>) {
        self.mediator.lock(|cell| match &*cell.borrow() {
            Some(mediator) => {
                if let Err(err) = mediator.stack_input(frame) {
                    debug!("stack rejected a frame: {:?}", err);
                }
            }
            None => warn!("no mediator attached, dropping frame"),
        });
    }

    fn interrupt_asserted(&self) -> bool {
        // The line is active low.
        self.int_pin
            .lock(|pin| pin.borrow_mut().is_low().unwrap_or(false))
    }

    async fn phy_ready(&self) -> bool {
        match self.bus.read_u8(Register::common(common::PHYCFGR)).await {
            Ok(value) => {
                let cfg = PhyConfig::from_bits(value);
                cfg.reset_complete() || cfg.link_up()
            }
            Err(_) => false,
        }
    }

    /// Issue a socket command and poll until the chip accepts it.
    async fn send_command(&self, command: SocketCommand, timeout: Duration) -> MacResult<()> {
        let register = sock_reg(socket::CR);
        self.bus.write_u8(register, command.into_bits()).await?;
        // The chip clears the register once it accepts the command.
        let mut waited = Duration::from_millis(0);
        loop {
            if self.bus.read_u8(register).await? == 0 {
                return Ok(());
            }
            if waited >= timeout {
                debug!("socket command {:#x} not accepted in time", command.into_bits());
                return Err(MacError::Timeout);
            }
            Timer::after(CMD_POLL_INTERVAL).await;
            waited += CMD_POLL_INTERVAL;
        }
    }

    /// Software-reset the chip and wait for the reset bit to clear.
    async fn reset(&self) -> MacResult<()> {
        let register = Register::common(common::MR);
        self.bus.write_u8(register, MR_RST).await?;
        let mut waited = Duration::from_millis(0);
        loop {
            if self.bus.read_u8(register).await? & MR_RST == 0 {
                return Ok(());
            }
            if waited >= self.reset_timeout {
                error!("chip reset did not complete in time");
                return Err(MacError::Timeout);
            }
            Timer::after(CMD_POLL_INTERVAL).await;
            waited += CMD_POLL_INTERVAL;
        }
    }

    /// The chip exposes no unique ID; the version read is diagnostic only
    /// and any value passes.
    async fn verify_identity(&self) -> MacResult<()> {
        let version = self.bus.read_u8(Register::common(common::VERSIONR)).await?;
        info!("chip version 0x{:x}", version);
        Ok(())
    }

    /// Program the register defaults for single-socket raw MAC operation.
    async fn setup_defaults(&self) -> MacResult<()> {
        // Socket 0 claims the whole 16 KiB TX and RX memory, the others get none.
        self.bus.write_u8(sock_reg(socket::RXBUF_SIZE), 16).await?;
        self.bus.write_u8(sock_reg(socket::TXBUF_SIZE), 16).await?;
        for sock in 1..SOCKET_COUNT {
            self.bus
                .write_u8(Register::socket(sock, socket::RXBUF_SIZE), 0)
                .await?;
            self.bus
                .write_u8(Register::socket(sock, socket::TXBUF_SIZE), 0)
                .await?;
        }
        // Block ping, leave PPPoE and wake-on-LAN off.
        self.bus
            .write_u8(Register::common(common::MR), MR_PB)
            .await?;
        // All socket interrupts start masked; start() unmasks socket 0.
        self.bus.write_u8(Register::common(common::SIMR), 0).await?;
        // Raw MAC mode with hardware address filtering on socket 0.
        self.bus
            .write_u8(sock_reg(socket::MR), SN_MR_MACRAW | SN_MR_MFEN)
            .await?;
        // Only the receive event may interrupt.
        self.bus.write_u8(sock_reg(socket::IMR), SN_IR_RECV).await?;
        // Maximum re-assert interval to lower the chance of a missed edge.
        self.bus
            .write_u16(Register::common(common::INTLEVEL), 0xFFFF)
            .await?;
        Ok(())
    }
}
