//! General-purpose I/O port registers (F1 layout).

use tock_registers::register_bitfields;
use tock_registers::registers::{ReadOnly, ReadWrite};

#[repr(C)]
pub struct GpioRegisters {
    pub crl: ReadWrite<u32>,
    pub crh: ReadWrite<u32, CRH::Register>,
    pub idr: ReadOnly<u32>,
    pub odr: ReadWrite<u32>,
    pub bsrr: ReadWrite<u32, BSRR::Register>,
    pub brr: ReadWrite<u32>,
    pub lckr: ReadWrite<u32>,
}

register_bitfields![u32,
    pub CRH [
        /// Pin 11 mode (00: input)
        MODE11 OFFSET(12) NUMBITS(2) [
            Input = 0b00,
            Output10MHz = 0b01,
            Output2MHz = 0b10,
            Output50MHz = 0b11
        ],
        /// Pin 11 configuration
        CNF11 OFFSET(14) NUMBITS(2) [
            InputAnalog = 0b00,
            InputFloating = 0b01,
            InputPull = 0b10
        ],
        /// Pin 12 mode
        MODE12 OFFSET(16) NUMBITS(2) [
            Input = 0b00,
            Output10MHz = 0b01,
            Output2MHz = 0b10,
            Output50MHz = 0b11
        ],
        /// Pin 12 configuration
        CNF12 OFFSET(18) NUMBITS(2) [
            OutputPushPull = 0b00,
            OutputOpenDrain = 0b01,
            AlternatePushPull = 0b10,
            AlternateOpenDrain = 0b11
        ]
    ],
    pub BSRR [
        /// Set pin 11 (pull-up select while the pin is an input)
        BS11 OFFSET(11) NUMBITS(1) [],
        /// Set pin 12
        BS12 OFFSET(12) NUMBITS(1) []
    ]
];
