//! Interfaces to the hosting kernel and interrupt controller.
//!
//! The driver never talks to a scheduler directly; it blocks on the
//! semaphores and mutexes the kernel hands out, and it registers its
//! interrupt routines with the interrupt controller. Implementations of
//! these traits are provided by the platform integration (and by the test
//! suite, which backs them with `std` primitives).

/// Kernel services consumed by the driver.
pub trait Kernel: 'static {
    /// The kernel's mutex primitive.
    type Mutex: RawMutex + Send + Sync;
    /// The kernel's counting semaphore primitive.
    type Semaphore: Semaphore + Send + Sync;

    /// Creates a mutex. Returns `None` if the kernel is out of resources.
    fn create_mutex(&self) -> Option<Self::Mutex>;

    /// Creates a counting semaphore with `initial` permits and a capacity
    /// of `maximum` permits.
    fn create_semaphore(&self, initial: u32, maximum: u32) -> Option<Self::Semaphore>;

    /// Probes the clock tree for the CPU core frequency in hertz.
    fn core_clock(&self) -> u32;
}

/// A mutual exclusion primitive without a guard of its own.
///
/// Use [`MutexGuard::lock`] for scoped locking.
pub trait RawMutex {
    /// Blocks until the mutex is acquired.
    fn lock(&self);

    /// Releases the mutex.
    fn unlock(&self);
}

/// Scoped lock on a [`RawMutex`]; unlocks on drop.
pub struct MutexGuard<'a, M: RawMutex> {
    mutex: &'a M,
}

impl<'a, M: RawMutex> MutexGuard<'a, M> {
    /// Blocks until `mutex` is acquired.
    pub fn lock(mutex: &'a M) -> MutexGuard<'a, M> {
        mutex.lock();
        MutexGuard { mutex }
    }
}

impl<M: RawMutex> Drop for MutexGuard<'_, M> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

/// A counting semaphore with distinct thread and interrupt release paths.
pub trait Semaphore {
    /// Blocks until a permit is available and takes it.
    ///
    /// Returns `false` if the kernel refused the wait (for example during
    /// system shutdown); callers treat that as a failed operation.
    fn acquire(&self) -> bool;

    /// Releases one permit from thread context.
    fn release(&self);

    /// Releases one permit from interrupt context.
    ///
    /// Returns `true` when the release unblocked a waiter of higher
    /// priority than the preempted thread, in which case the interrupt
    /// routine requests a context switch on return.
    fn release_from_interrupt(&self) -> bool;
}

/// Interrupt vectors used by the CAN controller.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Vector {
    /// Transmit mailbox interrupt (shared with USB high priority).
    UsbHpCan1Tx,
    /// Receive FIFO 0 interrupt (shared with USB low priority).
    UsbLpCan1Rx0,
    /// Receive FIFO 1 interrupt.
    Can1Rx1,
    /// Status change error interrupt.
    Can1Sce,
}

/// A driver object that services an interrupt vector.
pub trait IsrHandler {
    /// Runs in interrupt context. Returns `true` to request a context
    /// switch when the handler unblocked a higher-priority thread.
    fn on_interrupt(&self) -> bool;
}

/// An interrupt routine as a first-class value: a raw back-reference to
/// the handler plus a monomorphised trampoline.
///
/// The routine is registered when its owning engine is constructed and
/// must be disabled and discarded before the engine is torn down.
pub struct Routine {
    data: *const (),
    invoke: unsafe fn(*const ()) -> bool,
}

// The handler behind `data` is required to be `Sync` by `Routine::new`,
// and the pointer is only dereferenced through `invoke`.
unsafe impl Send for Routine {}
unsafe impl Sync for Routine {}

impl Routine {
    /// Creates a routine dispatching to `handler`.
    ///
    /// # Safety
    ///
    /// `handler` must stay at its current address, alive, until every
    /// interrupt binding holding this routine has been disabled and
    /// dropped.
    pub unsafe fn new<T: IsrHandler + Sync>(handler: &T) -> Routine {
        unsafe fn trampoline<T: IsrHandler>(data: *const ()) -> bool {
            (*(data as *const T)).on_interrupt()
        }

        Routine {
            data: handler as *const T as *const (),
            invoke: trampoline::<T>,
        }
    }

    /// Invokes the routine.
    ///
    /// # Safety
    ///
    /// The handler passed to [`Routine::new`] must still be alive.
    pub unsafe fn invoke(&self) -> bool {
        (self.invoke)(self.data)
    }
}

/// Creates masked CPU interrupt resources bound to a routine.
pub trait InterruptController: 'static {
    /// Handle to one bound vector; dropping it releases the binding.
    type Handle: InterruptHandle + Send;

    /// Binds `routine` to `vector`. The binding starts out masked.
    ///
    /// Returns `None` if the vector is unavailable.
    ///
    /// # Safety
    ///
    /// The caller guarantees the routine's handler outlives the returned
    /// handle (see [`Routine::new`]).
    unsafe fn bind(&self, vector: Vector, routine: Routine) -> Option<Self::Handle>;
}

/// One bound interrupt vector.
pub trait InterruptHandle {
    /// Unmasks the vector.
    fn enable(&self);

    /// Masks the vector.
    fn disable(&self);
}
