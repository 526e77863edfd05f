//! Receive path: two hardware FIFOs, each drained into a small software
//! queue by its interrupt routine, plus the acceptance filter programmer.

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};

use crate::filter::{RxFilter, FILTER_BANK_COUNT};
use crate::frame::{Data, Frame};
use crate::id::{ExtendedId, Id, StandardId};
use crate::os::{
    InterruptController, InterruptHandle, IsrHandler, Kernel, MutexGuard, Routine, Semaphore,
    Vector,
};
use crate::pac::can::{CanRegisters, FMR, RDTR, RFR, RIR};
use crate::util::StaticRef;
use crate::Fifo;

/// Depth of a hardware FIFO, and of the software queue shadowing it.
pub(crate) const RX_FIFO_DEPTH: usize = 3;

/// Outcome of offering a frame to the software queue.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Enqueue {
    /// The frame was appended; a permit must be released.
    Added,
    /// The queue was full and unlocked: the oldest entry was replaced.
    /// The permit balance is unchanged.
    Replaced,
    /// The queue was full and locked: the frame was dropped.
    Dropped,
}

/// Bounded ring of frames with the two bxCAN overflow policies.
struct FrameQueue {
    /// Mirrors `RFLM`: drop new arrivals instead of overwriting.
    locked: bool,
    head: Cell<usize>,
    len: Cell<usize>,
    slots: [Cell<Frame>; RX_FIFO_DEPTH],
}

impl FrameQueue {
    fn new(locked: bool) -> FrameQueue {
        let empty = Frame::new_data(StandardId::ZERO, Data::empty());
        FrameQueue {
            locked,
            head: Cell::new(0),
            len: Cell::new(0),
            slots: [Cell::new(empty), Cell::new(empty), Cell::new(empty)],
        }
    }

    fn push(&self, frame: Frame) -> Enqueue {
        let len = self.len.get();
        if len == RX_FIFO_DEPTH {
            if self.locked {
                return Enqueue::Dropped;
            }
            // Replace the oldest entry; the tail slot of a full ring is
            // the head slot.
            self.slots[self.head.get()].set(frame);
            self.head.set((self.head.get() + 1) % RX_FIFO_DEPTH);
            return Enqueue::Replaced;
        }
        self.slots[(self.head.get() + len) % RX_FIFO_DEPTH].set(frame);
        self.len.set(len + 1);
        Enqueue::Added
    }

    fn pop(&self) -> Option<Frame> {
        let len = self.len.get();
        if len == 0 {
            return None;
        }
        let frame = self.slots[self.head.get()].get();
        self.head.set((self.head.get() + 1) % RX_FIFO_DEPTH);
        self.len.set(len - 1);
        Some(frame)
    }
}

/// One hardware receive FIFO with its software overflow queue.
pub(crate) struct RxFifo<K: Kernel, N: InterruptController> {
    index: Fifo,
    regs: StaticRef<CanRegisters>,
    queue: FrameQueue,
    mutex: K::Mutex,
    /// One permit per queued frame.
    sem: K::Semaphore,
    irq: Cell<Option<N::Handle>>,
    hardware_overruns: AtomicU32,
}

// Safety: consumers are serialised by `mutex` and access the queue only
// with the FIFO's vector masked; the interrupt routine is the only other
// party touching the queue. `irq` crosses contexts only through
// take/mask/restore under that same mutex (or during init/deinit).
unsafe impl<K: Kernel, N: InterruptController> Sync for RxFifo<K, N> {}

impl<K: Kernel, N: InterruptController> RxFifo<K, N> {
    fn new(
        index: Fifo,
        locked: bool,
        regs: StaticRef<CanRegisters>,
        kernel: &K,
    ) -> Option<RxFifo<K, N>> {
        Some(RxFifo {
            index,
            regs,
            queue: FrameQueue::new(locked),
            mutex: kernel.create_mutex()?,
            sem: kernel.create_semaphore(0, RX_FIFO_DEPTH as u32)?,
            irq: Cell::new(None),
            hardware_overruns: AtomicU32::new(0),
        })
    }

    /// Blocks until a frame is queued, then pops it into `*frame`.
    ///
    /// Returns `false` on a spurious wakeup.
    pub(crate) fn receive(&self, frame: &mut Frame) -> bool {
        if !self.sem.acquire() {
            return false;
        }
        let _guard = MutexGuard::lock(&self.mutex);
        match self.with_vector_masked(|| self.queue.pop()) {
            Some(popped) => {
                *frame = popped;
                true
            }
            None => false,
        }
    }

    pub(crate) fn hardware_overruns(&self) -> u32 {
        self.hardware_overruns.load(Ordering::Relaxed)
    }

    /// Runs `f` with this FIFO's interrupt vector masked.
    fn with_vector_masked<R>(&self, f: impl FnOnce() -> R) -> R {
        let handle = self.irq.take();
        if let Some(handle) = &handle {
            handle.disable();
        }
        let result = f();
        if let Some(handle) = &handle {
            handle.enable();
        }
        self.irq.set(handle);
        result
    }

    fn vector(&self) -> Vector {
        match self.index {
            Fifo::Fifo0 => Vector::UsbLpCan1Rx0,
            Fifo::Fifo1 => Vector::Can1Rx1,
        }
    }

    /// # Safety
    ///
    /// `self` must stay at its current address until
    /// [`uninstall`](Self::uninstall) has run.
    unsafe fn install(&self, interrupts: &N) -> bool {
        match interrupts.bind(self.vector(), Routine::new(self)) {
            Some(handle) => {
                handle.enable();
                self.irq.set(Some(handle));
                true
            }
            None => false,
        }
    }

    fn uninstall(&self) {
        if let Some(handle) = self.irq.take() {
            handle.disable();
        }
    }

    /// Decodes the FIFO output mailbox into a frame.
    fn read_frame(&self) -> Frame {
        let mb = &self.regs.rx[self.index.index()];
        let rir = mb.rir.extract();
        let stid = rir.read(RIR::STID);
        let id: Id = if rir.is_set(RIR::IDE) {
            let raw = stid << 18 | rir.read(RIR::EXID);
            // Assembled from an 11-bit and an 18-bit field.
            unsafe { ExtendedId::new_unchecked(raw) }.into()
        } else {
            unsafe { StandardId::new_unchecked(stid as u16) }.into()
        };
        let dlc = (mb.rdtr.read(RDTR::DLC) as u8).min(8);
        if rir.is_set(RIR::RTR) {
            Frame {
                id,
                rtr: true,
                data: Data {
                    len: dlc,
                    bytes: [0; 8],
                },
            }
        } else {
            Frame {
                id,
                rtr: false,
                data: Data::from_words(mb.rdlr.get(), mb.rdhr.get(), dlc),
            }
        }
    }
}

impl<K: Kernel, N: InterruptController> IsrHandler for RxFifo<K, N> {
    fn on_interrupt(&self) -> bool {
        let rfr = &self.regs.rfr[self.index.index()];
        let mut switch_context = false;

        if rfr.read(RFR::FMP) > 0 {
            let frame = self.read_frame();
            if self.queue.push(frame) == Enqueue::Added {
                switch_context = self.sem.release_from_interrupt();
            }
            // Advance the hardware FIFO regardless of the queue outcome.
            rfr.write(RFR::RFOM::SET);
        }

        if rfr.is_set(RFR::FOVR) {
            self.hardware_overruns.fetch_add(1, Ordering::Relaxed);
            rfr.write(RFR::FOVR::SET);
        }
        if rfr.is_set(RFR::FULL) {
            rfr.write(RFR::FULL::SET);
        }

        switch_context
    }
}

/// The receive engine: both FIFOs and the filter bank programmer.
pub(crate) struct Rx<K: Kernel, N: InterruptController> {
    regs: StaticRef<CanRegisters>,
    fifos: [RxFifo<K, N>; 2],
    filter_mutex: K::Mutex,
}

// Safety: filter programming is serialised by `filter_mutex`; the FIFOs
// carry their own synchronisation.
unsafe impl<K: Kernel, N: InterruptController> Sync for Rx<K, N> {}

impl<K: Kernel, N: InterruptController> Rx<K, N> {
    pub(crate) fn new(
        regs: StaticRef<CanRegisters>,
        locked: bool,
        kernel: &K,
    ) -> Option<Rx<K, N>> {
        Some(Rx {
            regs,
            fifos: [
                RxFifo::new(Fifo::Fifo0, locked, regs, kernel)?,
                RxFifo::new(Fifo::Fifo1, locked, regs, kernel)?,
            ],
            filter_mutex: kernel.create_mutex()?,
        })
    }

    pub(crate) fn receive(&self, fifo: Fifo, frame: &mut Frame) -> bool {
        self.fifos[fifo.index()].receive(frame)
    }

    pub(crate) fn hardware_overruns(&self, fifo: Fifo) -> u32 {
        self.fifos[fifo.index()].hardware_overruns()
    }

    /// Programs one acceptance filter bank.
    ///
    /// The write transaction is bracketed by the filter-init mode the
    /// hardware requires for safe modification; concurrent updates are
    /// serialised by the filter mutex.
    pub(crate) fn set_filter(&self, filter: &RxFilter) -> bool {
        if filter.index >= FILTER_BANK_COUNT {
            return false;
        }

        let _guard = MutexGuard::lock(&self.filter_mutex);
        let regs = &*self.regs;
        let bit = 1u32 << filter.index;

        regs.fmr.modify(FMR::FINIT::SET);
        // Deactivate the bank while its words and routing change.
        regs.fa1r.set(regs.fa1r.get() & !bit);
        if filter.config.is_list_mode() {
            regs.fm1r.set(regs.fm1r.get() | bit);
        } else {
            regs.fm1r.set(regs.fm1r.get() & !bit);
        }
        if filter.config.is_32bit_scale() {
            regs.fs1r.set(regs.fs1r.get() | bit);
        } else {
            regs.fs1r.set(regs.fs1r.get() & !bit);
        }
        match filter.fifo {
            Fifo::Fifo0 => regs.ffa1r.set(regs.ffa1r.get() & !bit),
            Fifo::Fifo1 => regs.ffa1r.set(regs.ffa1r.get() | bit),
        }
        let (fr1, fr2) = filter.config.to_words();
        let bank = &regs.fb[usize::from(filter.index)];
        bank.fr1.set(fr1);
        bank.fr2.set(fr2);
        regs.fa1r.set(regs.fa1r.get() | bit);
        regs.fmr.modify(FMR::FINIT::CLEAR);
        true
    }

    /// # Safety
    ///
    /// `self` must stay at its current address until
    /// [`uninstall`](Self::uninstall) has run.
    pub(crate) unsafe fn install(&self, interrupts: &N) -> bool {
        for fifo in &self.fifos {
            if !fifo.install(interrupts) {
                return false;
            }
        }
        true
    }

    pub(crate) fn uninstall(&self) {
        for fifo in &self.fifos {
            fifo.uninstall();
        }
    }
}
