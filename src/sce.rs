//! Status change error handling.

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};

use crate::os::{InterruptController, InterruptHandle, IsrHandler, Routine, Vector};
use crate::pac::can::{CanRegisters, ESR, MSR};
use crate::util::StaticRef;

/// The error code latched by the protocol controller for the last failed
/// transfer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LastErrorCode {
    /// No error since the code was last cleared.
    NoError,
    /// Stuff error.
    Stuff,
    /// Form error.
    Form,
    /// Acknowledgment error.
    Ack,
    /// Bit recessive error.
    BitRecessive,
    /// Bit dominant error.
    BitDominant,
    /// CRC error.
    Crc,
    /// Set by software.
    Software,
}

impl LastErrorCode {
    fn from_bits(bits: u32) -> LastErrorCode {
        match bits & 0b111 {
            0b000 => LastErrorCode::NoError,
            0b001 => LastErrorCode::Stuff,
            0b010 => LastErrorCode::Form,
            0b011 => LastErrorCode::Ack,
            0b100 => LastErrorCode::BitRecessive,
            0b101 => LastErrorCode::BitDominant,
            0b110 => LastErrorCode::Crc,
            _ => LastErrorCode::Software,
        }
    }
}

/// Snapshot of the bus-health observables maintained by the status engine.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusHealth {
    /// Events observed with the error warning flag set (an error counter
    /// crossed 96).
    pub error_warnings: u32,
    /// Events observed with the error passive flag set (an error counter
    /// crossed 127).
    pub error_passives: u32,
    /// Events observed with the bus-off flag set.
    pub bus_offs: u32,
    /// Wakeup events.
    pub wakeups: u32,
    /// Sleep acknowledge events.
    pub sleep_acks: u32,
    /// The last protocol error latched by the controller.
    pub last_error_code: LastErrorCode,
    /// Hardware transmit error counter.
    pub tx_errors: u8,
    /// Hardware receive error counter.
    pub rx_errors: u8,
}

/// Services the status-change-error interrupt.
///
/// No recovery is attempted here; bus-off recovery is governed by the
/// `abom` configuration bit.
pub(crate) struct Sce<N: InterruptController> {
    regs: StaticRef<CanRegisters>,
    error_warnings: AtomicU32,
    error_passives: AtomicU32,
    bus_offs: AtomicU32,
    wakeups: AtomicU32,
    sleep_acks: AtomicU32,
    last_error_code: AtomicU8,
    irq: Cell<Option<N::Handle>>,
}

// Safety: the counters are atomics; `irq` is only touched during device
// init/deinit.
unsafe impl<N: InterruptController> Sync for Sce<N> {}

impl<N: InterruptController> Sce<N> {
    pub(crate) fn new(regs: StaticRef<CanRegisters>) -> Sce<N> {
        Sce {
            regs,
            error_warnings: AtomicU32::new(0),
            error_passives: AtomicU32::new(0),
            bus_offs: AtomicU32::new(0),
            wakeups: AtomicU32::new(0),
            sleep_acks: AtomicU32::new(0),
            last_error_code: AtomicU8::new(0),
            irq: Cell::new(None),
        }
    }

    pub(crate) fn health(&self) -> BusHealth {
        let esr = self.regs.esr.extract();
        BusHealth {
            error_warnings: self.error_warnings.load(Ordering::Relaxed),
            error_passives: self.error_passives.load(Ordering::Relaxed),
            bus_offs: self.bus_offs.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            sleep_acks: self.sleep_acks.load(Ordering::Relaxed),
            last_error_code: LastErrorCode::from_bits(u32::from(
                self.last_error_code.load(Ordering::Relaxed),
            )),
            tx_errors: esr.read(ESR::TEC) as u8,
            rx_errors: esr.read(ESR::REC) as u8,
        }
    }

    /// # Safety
    ///
    /// `self` must stay at its current address until
    /// [`uninstall`](Self::uninstall) has run.
    pub(crate) unsafe fn install(&self, interrupts: &N) -> bool {
        match interrupts.bind(Vector::Can1Sce, Routine::new(self)) {
            Some(handle) => {
                handle.enable();
                self.irq.set(Some(handle));
                true
            }
            None => false,
        }
    }

    pub(crate) fn uninstall(&self) {
        if let Some(handle) = self.irq.take() {
            handle.disable();
        }
    }
}

impl<N: InterruptController> IsrHandler for Sce<N> {
    fn on_interrupt(&self) -> bool {
        let esr = self.regs.esr.extract();
        if esr.is_set(ESR::EWGF) {
            self.error_warnings.fetch_add(1, Ordering::Relaxed);
        }
        if esr.is_set(ESR::EPVF) {
            self.error_passives.fetch_add(1, Ordering::Relaxed);
        }
        if esr.is_set(ESR::BOFF) {
            self.bus_offs.fetch_add(1, Ordering::Relaxed);
        }
        let lec = esr.read(ESR::LEC);
        if lec != 0 {
            self.last_error_code.store(lec as u8, Ordering::Relaxed);
            // Rearm the latch for the next protocol error.
            self.regs.esr.modify(ESR::LEC.val(0));
        }

        let msr = self.regs.msr.extract();
        if msr.is_set(MSR::WKUI) {
            self.wakeups.fetch_add(1, Ordering::Relaxed);
        }
        if msr.is_set(MSR::SLAKI) {
            self.sleep_acks.fetch_add(1, Ordering::Relaxed);
        }
        // All three flags are write-1-to-clear; this de-asserts the vector.
        self.regs
            .msr
            .write(MSR::ERRI::SET + MSR::WKUI::SET + MSR::SLAKI::SET);

        false
    }
}
