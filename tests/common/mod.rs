//! Test doubles: a std-backed kernel, a manually-fired interrupt
//! controller, RAM-backed register blocks and a small hardware model for
//! the init-mode handshake.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use bxcan_rtos::os::{
    InterruptController, InterruptHandle, Kernel, RawMutex, Routine, Semaphore, Vector,
};
use bxcan_rtos::pac::{CanRegisters, DbgRegisters, GpioRegisters, Peripherals, RccRegisters};
use bxcan_rtos::StaticRef;
use tock_registers::interfaces::{Readable, Writeable};

/// Kernel backed by std synchronisation primitives.
pub struct TestKernel {
    clock: u32,
}

impl TestKernel {
    pub fn new() -> TestKernel {
        TestKernel { clock: 72_000_000 }
    }

    pub fn with_clock(clock: u32) -> TestKernel {
        TestKernel { clock }
    }

    pub fn leak(self) -> &'static TestKernel {
        Box::leak(Box::new(self))
    }
}

impl Kernel for TestKernel {
    type Mutex = TestMutex;
    type Semaphore = TestSemaphore;

    fn create_mutex(&self) -> Option<TestMutex> {
        Some(TestMutex {
            locked: Mutex::new(false),
            cv: Condvar::new(),
        })
    }

    fn create_semaphore(&self, initial: u32, maximum: u32) -> Option<TestSemaphore> {
        Some(TestSemaphore {
            permits: Mutex::new(initial),
            maximum,
            cv: Condvar::new(),
        })
    }

    fn core_clock(&self) -> u32 {
        self.clock
    }
}

pub struct TestMutex {
    locked: Mutex<bool>,
    cv: Condvar,
}

impl RawMutex for TestMutex {
    fn lock(&self) {
        let mut locked = self.locked.lock().unwrap();
        while *locked {
            locked = self.cv.wait(locked).unwrap();
        }
        *locked = true;
    }

    fn unlock(&self) {
        *self.locked.lock().unwrap() = false;
        self.cv.notify_one();
    }
}

pub struct TestSemaphore {
    permits: Mutex<u32>,
    maximum: u32,
    cv: Condvar,
}

impl Semaphore for TestSemaphore {
    fn acquire(&self) -> bool {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.cv.wait(permits).unwrap();
        }
        *permits -= 1;
        true
    }

    fn release(&self) {
        let mut permits = self.permits.lock().unwrap();
        if *permits < self.maximum {
            *permits += 1;
        }
        self.cv.notify_one();
    }

    fn release_from_interrupt(&self) -> bool {
        self.release();
        false
    }
}

struct Binding {
    vector: Vector,
    routine: Routine,
    enabled: Arc<AtomicBool>,
}

/// Interrupt controller that records bindings and lets the test fire
/// vectors by hand.
pub struct TestIntc {
    bindings: Mutex<Vec<Binding>>,
}

impl TestIntc {
    pub fn new() -> TestIntc {
        TestIntc {
            bindings: Mutex::new(Vec::new()),
        }
    }

    pub fn leak(self) -> &'static TestIntc {
        Box::leak(Box::new(self))
    }

    /// Invokes every enabled routine bound to `vector`, returning the
    /// aggregated context-switch request.
    pub fn fire(&self, vector: Vector) -> bool {
        let bindings = self.bindings.lock().unwrap();
        let mut switch_context = false;
        for binding in bindings.iter() {
            if binding.vector == vector && binding.enabled.load(Ordering::SeqCst) {
                switch_context |= unsafe { binding.routine.invoke() };
            }
        }
        switch_context
    }

    /// Returns whether any binding for `vector` is currently enabled.
    pub fn is_enabled(&self, vector: Vector) -> bool {
        self.bindings
            .lock()
            .unwrap()
            .iter()
            .any(|b| b.vector == vector && b.enabled.load(Ordering::SeqCst))
    }
}

pub struct TestHandle {
    enabled: Arc<AtomicBool>,
}

impl InterruptHandle for TestHandle {
    fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }
}

impl InterruptController for TestIntc {
    type Handle = TestHandle;

    unsafe fn bind(&self, vector: Vector, routine: Routine) -> Option<TestHandle> {
        let enabled = Arc::new(AtomicBool::new(false));
        self.bindings.lock().unwrap().push(Binding {
            vector,
            routine,
            enabled: enabled.clone(),
        });
        Some(TestHandle { enabled })
    }
}

fn leak_zeroed<T>() -> &'static T {
    // Register blocks are plain volatile cells; all-zero is their reset
    // stand-in here.
    Box::leak(Box::new(unsafe { std::mem::zeroed() }))
}

/// RAM-backed register blocks plus the `Peripherals` window over them.
pub struct FakeHardware {
    pub can: &'static CanRegisters,
    pub rcc: &'static RccRegisters,
    pub gpioa: &'static GpioRegisters,
    pub dbg: &'static DbgRegisters,
}

impl FakeHardware {
    pub fn new() -> FakeHardware {
        FakeHardware {
            can: leak_zeroed(),
            rcc: leak_zeroed(),
            gpioa: leak_zeroed(),
            dbg: leak_zeroed(),
        }
    }

    pub fn peripherals(&self) -> Peripherals {
        unsafe {
            Peripherals::from_parts(
                StaticRef::new(self.can),
                StaticRef::new(self.rcc),
                StaticRef::new(self.gpioa),
                StaticRef::new(self.dbg),
            )
        }
    }
}

/// Hardware model thread mirroring MCR.INRQ into MSR.INAK, the way the
/// controller acknowledges init-mode entry and exit.
pub struct InakMirror {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl InakMirror {
    pub fn spawn(can: &'static CanRegisters) -> InakMirror {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let can_addr = can as *const CanRegisters as usize;
        let thread = thread::spawn(move || {
            let can = unsafe { &*(can_addr as *const CanRegisters) };
            while !stop_flag.load(Ordering::Relaxed) {
                let inrq = can.mcr.get() & 1;
                let current = can.msr.get();
                let want = if inrq != 0 { current | 1 } else { current & !1 };
                if want != current {
                    can.msr.set(want);
                }
                std::hint::spin_loop();
            }
        });
        InakMirror {
            stop,
            thread: Some(thread),
        }
    }

    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap();
        }
    }
}

impl Drop for InakMirror {
    fn drop(&mut self) {
        self.halt();
    }
}

/// All three TME bits: every transmit mailbox empty.
pub const TME_ALL: u32 = 0b111 << 26;
