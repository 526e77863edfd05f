//! Blocking, thread-safe driver for the STM32F103 bxCAN peripheral.
//!
//! The driver is hosted on an RTOS kernel: producers block on a counting
//! semaphore gating the three transmit mailboxes, consumers block on
//! per-FIFO semaphores fed by the receive interrupts, and the controller
//! is brought up and torn down through its init-mode handshake. The
//! kernel's mutex/semaphore primitives and the interrupt controller are
//! consumed through the traits in [`os`].

#![no_std]

#[cfg(test)]
extern crate std;

pub mod filter;
mod frame;
mod id;
pub mod interrupt;
pub mod os;
pub mod pac;
mod util;

mod embedded_hal;
mod readme;
mod rx;
mod sce;
mod tx;

pub use crate::embedded_hal::Channel;
pub use crate::filter::{BankConfig, ListEntry16, ListEntry32, Mask16, Mask32, RxFilter};
pub use crate::frame::{Data, Frame};
pub use crate::id::{ExtendedId, Id, StandardId};
pub use crate::interrupt::Interrupts;
pub use crate::pac::Peripherals;
pub use crate::sce::{BusHealth, LastErrorCode};
pub use crate::util::StaticRef;

use core::ops::Deref;
use core::sync::atomic::{AtomicU8, Ordering};

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};

use crate::os::{InterruptController, Kernel};
use crate::pac::can::{BTR, MCR, MSR};
use crate::pac::dbg::CR;
use crate::pac::gpio::{BSRR, CRH};
use crate::pac::rcc::{APB1ENR, APB2ENR};
use crate::rx::Rx;
use crate::sce::Sce;
use crate::tx::Tx;
use crate::util::OnceInit;

/// The CPU core clock the bit-timing table is computed for (PCLK1 at
/// 36 MHz behind the APB1 prescaler).
const CPU_CLOCK_HZ: u32 = 72_000_000;

/// Iteration budget for the INAK handshake polls.
const INIT_ACK_TIMEOUT: u32 = 0x0000_FFFF;

/// BTR bit-timing entries (SJW/TS1/TS2/BRP), indexed by sample point and
/// bit rate. Pre-computed for a 36 MHz PCLK1; see
/// <http://www.bittiming.can-wiki.info/>.
const BIT_TIMING: [[u32; 9]; 2] = [
    [
        // CANopen, 87.5% sample point.
        0x001e0001, // 1000 kbit/s
        0x001b0002, // 800
        0x001e0003, // 500
        0x001c0008, // 250
        0x001c0011, // 125
        0x001e0013, // 100
        0x001c002c, // 50
        0x001e0063, // 20
        0x001c00e0, // 10
    ],
    [
        // ARINC 825, 75% sample point.
        0x003c0001, // 1000 kbit/s
        0x00390002, // 800
        0x003c0003, // 500
        0x003a0008, // 250
        0x003a0011, // 125
        0x004d0011, // 100
        0x004d0023, // 50
        0x004d0059, // 20
        0x003a00e0, // 10
    ],
];

/// CAN controller instances.
///
/// The target device routes only CAN1 to pins; CAN2 exists on
/// connectivity-line parts and is rejected by [`Controller::create`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Number {
    Can1,
    Can2,
}

/// CAN bus bit rate.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitRate {
    Kbit1000,
    Kbit800,
    Kbit500,
    Kbit250,
    Kbit125,
    Kbit100,
    Kbit50,
    Kbit20,
    Kbit10,
}

/// Position of the bus sample point within a bit.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SamplePoint {
    /// 87.5%, the CANopen recommendation.
    CanOpen,
    /// 75%, per ARINC 825.
    Arinc825,
}

/// Master control and mode options, applied once during construction.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Options {
    /// Transmit FIFO priority (by request order instead of identifier).
    pub txfp: bool,
    /// Receive FIFO locked mode: drop on overrun instead of overwriting.
    pub rflm: bool,
    /// No automatic retransmission.
    pub nart: bool,
    /// Automatic wakeup on bus activity.
    pub awum: bool,
    /// Automatic bus-off recovery.
    pub abom: bool,
    /// Time triggered communication mode.
    pub ttcm: bool,
    /// Freeze the controller while the core is halted by a debugger.
    pub dbf: bool,
    /// Loop back mode (transmitted frames are also received).
    pub lbkm: bool,
    /// Silent mode (no dominant bits are driven on the bus).
    pub silm: bool,
}

/// Immutable driver configuration, consumed by [`Controller::create`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub number: Number,
    pub bit_rate: BitRate,
    pub sample_point: SamplePoint,
    pub options: Options,
}

impl Config {
    /// Creates a configuration with default options.
    pub fn new(number: Number, bit_rate: BitRate, sample_point: SamplePoint) -> Config {
        Config {
            number,
            bit_rate,
            sample_point,
            options: Options::default(),
        }
    }
}

/// A receive FIFO of the controller.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fifo {
    Fifo0,
    Fifo1,
}

impl Fifo {
    pub(crate) fn index(self) -> usize {
        match self {
            Fifo::Fifo0 => 0,
            Fifo::Fifo1 => 1,
        }
    }
}

/// Device life-cycle state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Clock gated off, interrupts unbound.
    Uninitialized,
    /// Clocked, controller in sleep mode.
    Sleep,
    /// Initialization mode (INAK acknowledged).
    Init,
    /// Ready for transfers.
    Normal,
    /// A construction step failed.
    Error,
}

/// Error type of the blocking [`embedded_can`] channel.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferError;

/// The CAN device: transmit engine, receive engine and status engine
/// over one bxCAN controller.
///
/// Created through [`Controller::create`]; all operations take `&self`
/// and may be called from any thread.
pub struct Can<K: Kernel, N: InterruptController> {
    periph: Peripherals,
    config: Config,
    state: AtomicU8,
    tx: Tx<K, N>,
    rx: Rx<K, N>,
    sce: Sce<N>,
}

// Safety: the engines carry their own thread/interrupt synchronisation;
// the remaining shared state is the atomic life-cycle state and the
// volatile register windows.
unsafe impl<K: Kernel, N: InterruptController> Sync for Can<K, N> {}

impl<K: Kernel, N: InterruptController> Can<K, N> {
    fn new(periph: Peripherals, config: Config, kernel: &K) -> Option<Can<K, N>> {
        Some(Can {
            tx: Tx::new(periph.can, kernel)?,
            rx: Rx::new(periph.can, config.options.rflm, kernel)?,
            sce: Sce::new(periph.can),
            state: AtomicU8::new(State::Uninitialized as u8),
            periph,
            config,
        })
    }

    /// Returns the device life-cycle state.
    pub fn state(&self) -> State {
        match self.state.load(Ordering::Acquire) {
            x if x == State::Uninitialized as u8 => State::Uninitialized,
            x if x == State::Sleep as u8 => State::Sleep,
            x if x == State::Init as u8 => State::Init,
            x if x == State::Normal as u8 => State::Normal,
            _ => State::Error,
        }
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Blocks until a transmit mailbox is free, then queues `frame` for
    /// transmission.
    ///
    /// Frames from a single thread reach the hardware in call order; bus
    /// arbitration may still reorder them on the wire.
    pub fn transmit(&self, frame: &Frame) -> bool {
        self.state() == State::Normal && self.tx.transmit(frame)
    }

    /// Blocks until a frame arrives on `fifo` and stores it in `*frame`.
    ///
    /// Returns `false` on a spurious wakeup or when the device is not in
    /// normal mode.
    pub fn receive(&self, frame: &mut Frame, fifo: Fifo) -> bool {
        self.state() == State::Normal && self.rx.receive(fifo, frame)
    }

    /// Programs one acceptance filter bank.
    pub fn set_receive_filter(&self, filter: &RxFilter) -> bool {
        self.state() == State::Normal && self.rx.set_filter(filter)
    }

    /// Accumulated failed-transmission count, summed over the three
    /// mailboxes. Returns `-1` when the device is not operational.
    pub fn transmit_error_counter(&self) -> i32 {
        if self.state() == State::Normal {
            self.tx.error_counter_total().min(i32::MAX as u32) as i32
        } else {
            -1
        }
    }

    /// Snapshot of the bus-health observables, or `None` when the device
    /// is not operational.
    pub fn bus_health(&self) -> Option<BusHealth> {
        if self.state() == State::Normal {
            Some(self.sce.health())
        } else {
            None
        }
    }

    /// Count of hardware overruns observed on `fifo`.
    pub fn fifo_overruns(&self, fifo: Fifo) -> u32 {
        self.rx.hardware_overruns(fifo)
    }

    /// Returns a blocking [`embedded_can`] channel receiving from `fifo`.
    pub fn channel(&self, fifo: Fifo) -> Channel<'_, K, N> {
        Channel { can: self, fifo }
    }

    /// Drives the controller from reset into normal mode.
    ///
    /// # Safety
    ///
    /// `self` must stay at its current address until
    /// [`deinitialize`](Self::deinitialize) has run (the interrupt
    /// routines hold raw back-references).
    unsafe fn initialize(&self, interrupts: &'static N) -> bool {
        self.enable_clock(true);
        self.configure_pins();
        self.set_state(State::Sleep);

        let can = &*self.periph.can;
        can.mcr.modify(MCR::SLEEP::CLEAR);
        can.mcr.modify(MCR::INRQ::SET);
        if !self.wait_for_inak(true) {
            self.set_state(State::Error);
            return false;
        }
        self.set_state(State::Init);

        let opts = &self.config.options;
        can.mcr.modify(
            MCR::TXFP.val(opts.txfp as u32)
                + MCR::RFLM.val(opts.rflm as u32)
                + MCR::NART.val(opts.nart as u32)
                + MCR::AWUM.val(opts.awum as u32)
                + MCR::ABOM.val(opts.abom as u32)
                + MCR::TTCM.val(opts.ttcm as u32)
                + MCR::DBF.val(opts.dbf as u32),
        );
        if opts.dbf {
            self.periph.dbg.cr.modify(CR::DBG_CAN1_STOP::SET);
        }
        can.btr
            .modify(BTR::LBKM.val(opts.lbkm as u32) + BTR::SILM.val(opts.silm as u32));
        self.set_bit_rate();

        can.mcr.modify(MCR::INRQ::CLEAR);
        if !self.wait_for_inak(false) {
            self.set_state(State::Error);
            return false;
        }

        if !self.tx.install(interrupts)
            || !self.rx.install(interrupts)
            || !self.sce.install(interrupts)
        {
            self.set_state(State::Error);
            return false;
        }
        can.ier
            .set((Interrupts::TX | Interrupts::RX | Interrupts::SCE).bits());

        self.set_state(State::Normal);
        true
    }

    /// Quiesces the controller: interrupts disabled, clock gated off.
    ///
    /// Safe to call from any state; repeated calls are no-ops.
    fn deinitialize(&self) {
        self.periph.can.ier.set(0);
        self.tx.uninstall();
        self.rx.uninstall();
        self.sce.uninstall();
        self.enable_clock(false);
        self.set_state(State::Uninitialized);
    }

    /// Polls MSR.INAK until it reaches `asserted`, within a bounded
    /// iteration budget. Busy-polls without suspending.
    fn wait_for_inak(&self, asserted: bool) -> bool {
        let mut budget = INIT_ACK_TIMEOUT;
        loop {
            if self.periph.can.msr.is_set(MSR::INAK) == asserted {
                return true;
            }
            if budget == 0 {
                return false;
            }
            budget -= 1;
        }
    }

    fn enable_clock(&self, enable: bool) {
        self.periph
            .rcc
            .apb1enr
            .modify(APB1ENR::CAN1EN.val(enable as u32));
    }

    /// PA11 is CAN_RX (input, pull-up), PA12 is CAN_TX (alternate
    /// function push-pull, 50 MHz).
    fn configure_pins(&self) {
        self.periph.rcc.apb2enr.modify(APB2ENR::IOPAEN::SET);
        let gpioa = &*self.periph.gpioa;
        gpioa.crh.modify(CRH::MODE11::Input + CRH::CNF11::InputPull);
        gpioa.bsrr.write(BSRR::BS11::SET);
        gpioa
            .crh
            .modify(CRH::MODE12::Output50MHz + CRH::CNF12::AlternatePushPull);
    }

    fn set_bit_rate(&self) {
        let entry = BIT_TIMING[self.config.sample_point as usize][self.config.bit_rate as usize];
        self.periph.can.btr.modify(
            BTR::BRP.val(entry & 0x3FF)
                + BTR::TS1.val(entry >> 16 & 0xF)
                + BTR::TS2.val(entry >> 20 & 0x7)
                + BTR::SJW.val(entry >> 24 & 0x3),
        );
    }
}

/// Factory singleton vending the one CAN device of the chip.
///
/// Holds the storage slot for the device; the slot is a process-wide
/// cell initialised at most once at a time.
pub struct Controller<K: Kernel, N: InterruptController> {
    device: OnceInit<Can<K, N>>,
}

impl<K: Kernel, N: InterruptController> Controller<K, N> {
    /// Creates an empty controller. Intended to back a `static`.
    pub const fn new() -> Controller<K, N> {
        Controller {
            device: OnceInit::new(),
        }
    }

    /// Returns the live device, if one has been created.
    pub fn device(&'static self) -> Option<&'static Can<K, N>> {
        self.device.get()
    }

    /// Builds and initialises the CAN device.
    ///
    /// Validates the configuration, checks the clock tree, claims the
    /// device slot, and drives the controller into normal mode. Any
    /// failure releases the slot and yields `None`.
    pub fn create(
        &'static self,
        config: &Config,
        peripherals: Peripherals,
        kernel: &'static K,
        interrupts: &'static N,
    ) -> Option<CanHandle<K, N>> {
        if config.number != Number::Can1 {
            return None;
        }
        if kernel.core_clock() != CPU_CLOCK_HZ {
            return None;
        }
        if !self.device.claim() {
            return None;
        }
        let device = match Can::new(peripherals, *config, kernel) {
            Some(device) => device,
            None => {
                self.device.abort();
                return None;
            }
        };
        // The slot pins the device until the handle is dropped.
        let device = unsafe { self.device.emplace(device) };
        if unsafe { device.initialize(interrupts) } {
            Some(CanHandle {
                controller: self,
                device,
            })
        } else {
            device.deinitialize();
            unsafe { self.device.vacate() };
            None
        }
    }
}

impl<K: Kernel, N: InterruptController> Default for Controller<K, N> {
    fn default() -> Self {
        Controller::new()
    }
}

/// Owning handle to the created [`Can`] device.
///
/// Dropping the handle deinitialises the device and returns its slot to
/// the controller. Blocked `transmit`/`receive` calls must be drained
/// before dropping.
pub struct CanHandle<K: Kernel, N: InterruptController> {
    controller: &'static Controller<K, N>,
    device: &'static Can<K, N>,
}

impl<K: Kernel, N: InterruptController> CanHandle<K, N> {
    /// Deinitialises the device. Equivalent to dropping the handle.
    pub fn release(self) {}
}

impl<K: Kernel, N: InterruptController> Deref for CanHandle<K, N> {
    type Target = Can<K, N>;

    fn deref(&self) -> &Can<K, N> {
        self.device
    }
}

impl<K: Kernel, N: InterruptController> Drop for CanHandle<K, N> {
    fn drop(&mut self) {
        self.device.deinitialize();
        // The handle is the only owner; no other reference can be live.
        unsafe { self.controller.device.vacate() };
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use core::sync::atomic::{AtomicU32, Ordering};

    use crate::os::{
        InterruptController, InterruptHandle, Kernel, RawMutex, Routine, Semaphore, Vector,
    };
    use crate::pac::can::CanRegisters;
    use crate::util::StaticRef;
    use std::boxed::Box;

    /// Leaks a zeroed CAN register block as a stand-in for the hardware.
    pub(crate) fn leak_can_registers() -> StaticRef<CanRegisters> {
        let regs: &'static mut CanRegisters = Box::leak(Box::new(unsafe { core::mem::zeroed() }));
        unsafe { StaticRef::new(regs) }
    }

    pub(crate) struct NullInterruptController;

    pub(crate) struct NullHandle;

    impl InterruptHandle for NullHandle {
        fn enable(&self) {}
        fn disable(&self) {}
    }

    impl InterruptController for NullInterruptController {
        type Handle = NullHandle;

        unsafe fn bind(&self, _vector: Vector, _routine: Routine) -> Option<NullHandle> {
            Some(NullHandle)
        }
    }

    /// Single-threaded kernel double: mutexes are no-ops and semaphore
    /// acquisition fails instead of blocking, so unit tests can probe the
    /// permit accounting directly.
    pub(crate) struct StubKernel;

    pub(crate) struct StubMutex;

    impl RawMutex for StubMutex {
        fn lock(&self) {}
        fn unlock(&self) {}
    }

    pub(crate) struct StubSemaphore {
        permits: AtomicU32,
        maximum: u32,
    }

    impl Semaphore for StubSemaphore {
        fn acquire(&self) -> bool {
            let permits = self.permits.load(Ordering::Relaxed);
            if permits == 0 {
                return false;
            }
            self.permits.store(permits - 1, Ordering::Relaxed);
            true
        }

        fn release(&self) {
            let permits = self.permits.load(Ordering::Relaxed);
            if permits < self.maximum {
                self.permits.store(permits + 1, Ordering::Relaxed);
            }
        }

        fn release_from_interrupt(&self) -> bool {
            self.release();
            false
        }
    }

    impl Kernel for StubKernel {
        type Mutex = StubMutex;
        type Semaphore = StubSemaphore;

        fn create_mutex(&self) -> Option<StubMutex> {
            Some(StubMutex)
        }

        fn create_semaphore(&self, initial: u32, maximum: u32) -> Option<StubSemaphore> {
            Some(StubSemaphore {
                permits: AtomicU32::new(initial),
                maximum,
            })
        }

        fn core_clock(&self) -> u32 {
            72_000_000
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BIT_TIMING;

    #[test]
    fn bit_timing_rows_are_the_published_constants() {
        assert_eq!(
            BIT_TIMING[0],
            [
                0x001e0001, 0x001b0002, 0x001e0003, 0x001c0008, 0x001c0011, 0x001e0013,
                0x001c002c, 0x001e0063, 0x001c00e0
            ]
        );
        assert_eq!(
            BIT_TIMING[1],
            [
                0x003c0001, 0x00390002, 0x003c0003, 0x003a0008, 0x003a0011, 0x004d0011,
                0x004d0023, 0x004d0059, 0x003a00e0
            ]
        );
    }

    #[test]
    fn bit_timing_entries_divide_pclk1_to_the_nominal_rates() {
        const PCLK1: u32 = 36_000_000;
        const RATES: [u32; 9] = [
            1_000_000, 800_000, 500_000, 250_000, 125_000, 100_000, 50_000, 20_000, 10_000,
        ];
        for row in BIT_TIMING {
            for (entry, rate) in row.into_iter().zip(RATES) {
                let brp = (entry & 0x3FF) + 1;
                let ts1 = (entry >> 16 & 0xF) + 1;
                let ts2 = (entry >> 20 & 0x7) + 1;
                let quanta = 1 + ts1 + ts2;
                assert_eq!(PCLK1 / (brp * quanta), rate);
            }
        }
    }
}
