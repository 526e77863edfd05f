//! Register-level models of the peripherals this driver consumes.
//!
//! The blocks are plain `#[repr(C)]` structs of volatile register cells
//! with the field layouts of the STM32F103 reference manual. Access goes
//! through [`StaticRef`] windows so tests can aim the driver at RAM.

pub mod can;
pub mod dbg;
pub mod gpio;
pub mod rcc;

use crate::util::StaticRef;

pub use can::CanRegisters;
pub use dbg::DbgRegisters;
pub use gpio::GpioRegisters;
pub use rcc::RccRegisters;

/// CAN1 register block base address.
pub const CAN1_BASE: usize = 0x4000_6400;
/// RCC register block base address.
pub const RCC_BASE: usize = 0x4002_1000;
/// GPIO port A register block base address.
pub const GPIOA_BASE: usize = 0x4001_0800;
/// DBGMCU register block base address.
pub const DBGMCU_BASE: usize = 0xE004_2000;

/// The register windows consumed by the driver.
///
/// Owned by the [`Controller`](crate::Controller) and lent to the device
/// by non-owning reference.
#[derive(Clone, Copy)]
pub struct Peripherals {
    pub can: StaticRef<CanRegisters>,
    pub rcc: StaticRef<RccRegisters>,
    pub gpioa: StaticRef<GpioRegisters>,
    pub dbg: StaticRef<DbgRegisters>,
}

impl Peripherals {
    /// Conjures the register windows at their hardware addresses.
    ///
    /// # Safety
    ///
    /// The caller must be the sole owner of the CAN1, RCC, GPIOA and
    /// DBGMCU register blocks for the lifetime of the returned value.
    pub const unsafe fn steal() -> Peripherals {
        Peripherals {
            can: StaticRef::new(CAN1_BASE as *const CanRegisters),
            rcc: StaticRef::new(RCC_BASE as *const RccRegisters),
            gpioa: StaticRef::new(GPIOA_BASE as *const GpioRegisters),
            dbg: StaticRef::new(DBGMCU_BASE as *const DbgRegisters),
        }
    }

    /// Builds the window set from caller-provided references.
    ///
    /// Intended for test harnesses that substitute RAM-backed register
    /// blocks for the real peripherals.
    pub fn from_parts(
        can: StaticRef<CanRegisters>,
        rcc: StaticRef<RccRegisters>,
        gpioa: StaticRef<GpioRegisters>,
        dbg: StaticRef<DbgRegisters>,
    ) -> Peripherals {
        Peripherals {
            can,
            rcc,
            gpioa,
            dbg,
        }
    }
}
