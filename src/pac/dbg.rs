//! MCU debug component registers.

use tock_registers::register_bitfields;
use tock_registers::registers::{ReadOnly, ReadWrite};

#[repr(C)]
pub struct DbgRegisters {
    pub idcode: ReadOnly<u32>,
    pub cr: ReadWrite<u32, CR::Register>,
}

register_bitfields![u32,
    pub CR [
        /// Debug CAN1 stopped when core is halted
        DBG_CAN1_STOP OFFSET(14) NUMBITS(1) []
    ]
];
