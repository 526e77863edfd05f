//! Reset and clock control registers (the slice this driver touches).

use tock_registers::register_bitfields;
use tock_registers::registers::ReadWrite;

#[repr(C)]
pub struct RccRegisters {
    pub cr: ReadWrite<u32>,
    pub cfgr: ReadWrite<u32>,
    pub cir: ReadWrite<u32>,
    pub apb2rstr: ReadWrite<u32>,
    pub apb1rstr: ReadWrite<u32>,
    pub ahbenr: ReadWrite<u32>,
    pub apb2enr: ReadWrite<u32, APB2ENR::Register>,
    pub apb1enr: ReadWrite<u32, APB1ENR::Register>,
    pub bdcr: ReadWrite<u32>,
    pub csr: ReadWrite<u32>,
}

register_bitfields![u32,
    pub APB2ENR [
        /// Alternate function I/O clock enable
        AFIOEN OFFSET(0) NUMBITS(1) [],
        /// I/O port A clock enable
        IOPAEN OFFSET(2) NUMBITS(1) []
    ],
    pub APB1ENR [
        /// CAN1 clock enable
        CAN1EN OFFSET(25) NUMBITS(1) []
    ]
];
