//! Transmit path: three hardware mailboxes behind a counting semaphore.

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};

use crate::frame::Frame;
use crate::id::Id;
use crate::os::{
    InterruptController, InterruptHandle, IsrHandler, Kernel, MutexGuard, Routine, Semaphore,
    Vector,
};
use crate::pac::can::{CanRegisters, TDTR, TIR};
use crate::util::StaticRef;

/// Number of hardware transmit mailboxes.
pub(crate) const TX_MAILBOX_COUNT: usize = 3;

/// The per-mailbox error counter saturates here (project convention, not a
/// hardware boundary).
const ERROR_COUNTER_LIMIT: u32 = 0x2000_0000;

const fn rqcp_mask(index: usize) -> u32 {
    0x01 << (8 * index)
}

const fn txok_mask(index: usize) -> u32 {
    0x02 << (8 * index)
}

const fn alst_mask(index: usize) -> u32 {
    0x04 << (8 * index)
}

const fn terr_mask(index: usize) -> u32 {
    0x08 << (8 * index)
}

const fn tme_mask(index: usize) -> u32 {
    1 << (26 + index)
}

/// Captured TSR status of one mailbox, taken by the interrupt routine
/// before it decides whether a request completed.
#[derive(Debug, Copy, Clone, Default)]
struct RequestStatus {
    rqcp: bool,
    txok: bool,
    alst: bool,
    terr: bool,
    tme: bool,
}

/// One hardware transmit mailbox.
pub(crate) struct TxMailbox {
    index: usize,
    regs: StaticRef<CanRegisters>,
    /// Only touched from the TX interrupt routine.
    status: Cell<RequestStatus>,
    /// Completions with TXOK deasserted; read from thread context.
    error_counter: AtomicU32,
}

impl TxMailbox {
    fn new(index: usize, regs: StaticRef<CanRegisters>) -> TxMailbox {
        TxMailbox {
            index,
            regs,
            status: Cell::new(RequestStatus::default()),
            error_counter: AtomicU32::new(0),
        }
    }

    /// Tests if the mailbox is ready to accept a frame (`TME` set).
    pub(crate) fn is_empty(&self) -> bool {
        self.regs.tsr.get() & tme_mask(self.index) != 0
    }

    /// Writes `frame` into the mailbox registers and requests transmission.
    ///
    /// Returns `false` if the mailbox is occupied. Must be called with the
    /// transmit engine mutex held.
    pub(crate) fn transmit(&self, frame: &Frame) -> bool {
        if !self.is_empty() {
            return false;
        }

        let mb = &self.regs.tx[self.index];
        mb.tir.modify(TIR::TXRQ::CLEAR);
        let rtr = if frame.is_remote_frame() {
            TIR::RTR::SET
        } else {
            TIR::RTR::CLEAR
        };
        match frame.id() {
            Id::Standard(id) => {
                mb.tir.modify(
                    rtr + TIR::IDE::CLEAR + TIR::EXID.val(0) + TIR::STID.val(u32::from(id.as_raw())),
                );
            }
            Id::Extended(id) => {
                mb.tir.modify(
                    rtr + TIR::IDE::SET
                        + TIR::EXID.val(id.as_raw() & 0x3_FFFF)
                        + TIR::STID.val(id.as_raw() >> 18),
                );
            }
        }
        mb.tdtr.modify(TDTR::DLC.val(u32::from(frame.dlc())));
        let [low, high] = frame.data.words32();
        mb.tdlr.set(low);
        mb.tdhr.set(high);
        mb.tir.modify(TIR::TXRQ::SET);
        true
    }

    /// Services the mailbox from the TX interrupt.
    ///
    /// Returns `true` exactly when a request newly completed; the
    /// request-completed flag is cleared as a side effect.
    pub(crate) fn routine(&self) -> bool {
        self.capture_request_status();
        if self.is_captured_request_completed() {
            self.clear_request_status();
            true
        } else {
            false
        }
    }

    pub(crate) fn error_counter(&self) -> u32 {
        self.error_counter.load(Ordering::Relaxed)
    }

    fn capture_request_status(&self) {
        let tsr = self.regs.tsr.get();
        self.status.set(RequestStatus {
            rqcp: tsr & rqcp_mask(self.index) != 0,
            txok: tsr & txok_mask(self.index) != 0,
            alst: tsr & alst_mask(self.index) != 0,
            terr: tsr & terr_mask(self.index) != 0,
            tme: tsr & tme_mask(self.index) != 0,
        });
    }

    fn is_captured_request_completed(&self) -> bool {
        let status = self.status.get();
        let completed = status.rqcp && status.tme;
        if completed && !status.txok {
            let count = self.error_counter.load(Ordering::Relaxed);
            if count < ERROR_COUNTER_LIMIT {
                self.error_counter.store(count + 1, Ordering::Relaxed);
            }
        }
        completed
    }

    fn clear_request_status(&self) {
        // RQCP is write-1-to-clear; zeroes leave the other mailboxes alone.
        self.regs.tsr.set(rqcp_mask(self.index));
    }
}

/// The transmit engine: arbitrates the three mailboxes among producers.
pub(crate) struct Tx<K: Kernel, N: InterruptController> {
    mailboxes: [TxMailbox; TX_MAILBOX_COUNT],
    mutex: K::Mutex,
    /// One permit per free mailbox.
    sem: K::Semaphore,
    irq: Cell<Option<N::Handle>>,
}

// Safety: thread-context access is serialised by `mutex` (and `irq` is
// only touched during device init/deinit); the interrupt routine touches
// only the TSR registers, the mailbox status snapshots and the semaphore's
// interrupt release path.
unsafe impl<K: Kernel, N: InterruptController> Sync for Tx<K, N> {}

impl<K: Kernel, N: InterruptController> Tx<K, N> {
    pub(crate) fn new(regs: StaticRef<CanRegisters>, kernel: &K) -> Option<Tx<K, N>> {
        let count = TX_MAILBOX_COUNT as u32;
        Some(Tx {
            mailboxes: [
                TxMailbox::new(0, regs),
                TxMailbox::new(1, regs),
                TxMailbox::new(2, regs),
            ],
            mutex: kernel.create_mutex()?,
            sem: kernel.create_semaphore(count, count)?,
            irq: Cell::new(None),
        })
    }

    /// Blocks until a mailbox is free, then hands `frame` to it.
    pub(crate) fn transmit(&self, frame: &Frame) -> bool {
        if !self.sem.acquire() {
            return false;
        }
        let _guard = MutexGuard::lock(&self.mutex);
        for mailbox in &self.mailboxes {
            if mailbox.is_empty() {
                return mailbox.transmit(frame);
            }
        }
        // A permit was granted but no mailbox is empty. Possible only with
        // a hardware fault; the permit stays lost and the call fails.
        false
    }

    /// Sum of the per-mailbox error counters, saturating.
    pub(crate) fn error_counter_total(&self) -> u32 {
        self.mailboxes
            .iter()
            .fold(0u32, |acc, mb| acc.saturating_add(mb.error_counter()))
    }

    /// Binds and unmasks the TX interrupt.
    ///
    /// # Safety
    ///
    /// `self` must stay at its current address until
    /// [`uninstall`](Self::uninstall) has run.
    pub(crate) unsafe fn install(&self, interrupts: &N) -> bool {
        match interrupts.bind(Vector::UsbHpCan1Tx, Routine::new(self)) {
            Some(handle) => {
                handle.enable();
                self.irq.set(Some(handle));
                true
            }
            None => false,
        }
    }

    /// Masks and releases the TX interrupt binding.
    pub(crate) fn uninstall(&self) {
        if let Some(handle) = self.irq.take() {
            handle.disable();
        }
    }
}

impl<K: Kernel, N: InterruptController> IsrHandler for Tx<K, N> {
    fn on_interrupt(&self) -> bool {
        let mut switch_context = false;
        for mailbox in &self.mailboxes {
            if mailbox.routine() {
                switch_context |= self.sem.release_from_interrupt();
            }
        }
        switch_context
    }
}
