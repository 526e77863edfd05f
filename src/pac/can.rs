//! bxCAN register block.

use tock_registers::register_bitfields;
use tock_registers::registers::ReadWrite;

/// One transmit mailbox: identifier, length/time, low and high data words.
#[repr(C)]
pub struct TxMailboxRegisters {
    pub tir: ReadWrite<u32, TIR::Register>,
    pub tdtr: ReadWrite<u32, TDTR::Register>,
    pub tdlr: ReadWrite<u32>,
    pub tdhr: ReadWrite<u32>,
}

/// One receive mailbox at the output of a FIFO.
#[repr(C)]
pub struct RxMailboxRegisters {
    pub rir: ReadWrite<u32, RIR::Register>,
    pub rdtr: ReadWrite<u32, RDTR::Register>,
    pub rdlr: ReadWrite<u32>,
    pub rdhr: ReadWrite<u32>,
}

/// One acceptance filter bank: two 32-bit filter words.
#[repr(C)]
pub struct FilterBankRegisters {
    pub fr1: ReadWrite<u32>,
    pub fr2: ReadWrite<u32>,
}

/// The bxCAN register map (single-CAN device: 14 filter banks).
#[repr(C)]
pub struct CanRegisters {
    pub mcr: ReadWrite<u32, MCR::Register>,
    pub msr: ReadWrite<u32, MSR::Register>,
    pub tsr: ReadWrite<u32, TSR::Register>,
    /// Receive FIFO registers, indexed by FIFO number.
    pub rfr: [ReadWrite<u32, RFR::Register>; 2],
    pub ier: ReadWrite<u32>,
    pub esr: ReadWrite<u32, ESR::Register>,
    pub btr: ReadWrite<u32, BTR::Register>,
    _reserved0: [u8; 0x160],
    /// Transmit mailboxes 0..2.
    pub tx: [TxMailboxRegisters; 3],
    /// Receive mailboxes for FIFO0 and FIFO1.
    pub rx: [RxMailboxRegisters; 2],
    _reserved1: [u8; 0x30],
    pub fmr: ReadWrite<u32, FMR::Register>,
    pub fm1r: ReadWrite<u32>,
    _reserved2: [u8; 4],
    pub fs1r: ReadWrite<u32>,
    _reserved3: [u8; 4],
    pub ffa1r: ReadWrite<u32>,
    _reserved4: [u8; 4],
    pub fa1r: ReadWrite<u32>,
    _reserved5: [u8; 0x20],
    /// Filter banks 0..13.
    pub fb: [FilterBankRegisters; 14],
}

register_bitfields![u32,
    pub MCR [
        /// Initialization request
        INRQ OFFSET(0) NUMBITS(1) [],
        /// Sleep mode request
        SLEEP OFFSET(1) NUMBITS(1) [],
        /// Transmit FIFO priority
        TXFP OFFSET(2) NUMBITS(1) [],
        /// Receive FIFO locked mode
        RFLM OFFSET(3) NUMBITS(1) [],
        /// No automatic retransmission
        NART OFFSET(4) NUMBITS(1) [],
        /// Automatic wakeup mode
        AWUM OFFSET(5) NUMBITS(1) [],
        /// Automatic bus-off management
        ABOM OFFSET(6) NUMBITS(1) [],
        /// Time triggered communication mode
        TTCM OFFSET(7) NUMBITS(1) [],
        /// Software master reset
        RESET OFFSET(15) NUMBITS(1) [],
        /// Debug freeze
        DBF OFFSET(16) NUMBITS(1) []
    ],
    pub MSR [
        /// Initialization acknowledge
        INAK OFFSET(0) NUMBITS(1) [],
        /// Sleep acknowledge
        SLAK OFFSET(1) NUMBITS(1) [],
        /// Error interrupt flag (write 1 to clear)
        ERRI OFFSET(2) NUMBITS(1) [],
        /// Wakeup interrupt flag (write 1 to clear)
        WKUI OFFSET(3) NUMBITS(1) [],
        /// Sleep acknowledge interrupt flag (write 1 to clear)
        SLAKI OFFSET(4) NUMBITS(1) [],
        /// Transmit mode
        TXM OFFSET(8) NUMBITS(1) [],
        /// Receive mode
        RXM OFFSET(9) NUMBITS(1) [],
        /// Last sample point
        SAMP OFFSET(10) NUMBITS(1) [],
        /// CAN RX signal
        RX OFFSET(11) NUMBITS(1) []
    ],
    pub TSR [
        RQCP0 OFFSET(0) NUMBITS(1) [],
        TXOK0 OFFSET(1) NUMBITS(1) [],
        ALST0 OFFSET(2) NUMBITS(1) [],
        TERR0 OFFSET(3) NUMBITS(1) [],
        ABRQ0 OFFSET(7) NUMBITS(1) [],
        RQCP1 OFFSET(8) NUMBITS(1) [],
        TXOK1 OFFSET(9) NUMBITS(1) [],
        ALST1 OFFSET(10) NUMBITS(1) [],
        TERR1 OFFSET(11) NUMBITS(1) [],
        ABRQ1 OFFSET(15) NUMBITS(1) [],
        RQCP2 OFFSET(16) NUMBITS(1) [],
        TXOK2 OFFSET(17) NUMBITS(1) [],
        ALST2 OFFSET(18) NUMBITS(1) [],
        TERR2 OFFSET(19) NUMBITS(1) [],
        ABRQ2 OFFSET(23) NUMBITS(1) [],
        /// Mailbox code: the next free (or lowest priority) mailbox
        CODE OFFSET(24) NUMBITS(2) [],
        TME0 OFFSET(26) NUMBITS(1) [],
        TME1 OFFSET(27) NUMBITS(1) [],
        TME2 OFFSET(28) NUMBITS(1) [],
        LOW0 OFFSET(29) NUMBITS(1) [],
        LOW1 OFFSET(30) NUMBITS(1) [],
        LOW2 OFFSET(31) NUMBITS(1) []
    ],
    pub RFR [
        /// FIFO message pending count
        FMP OFFSET(0) NUMBITS(2) [],
        /// FIFO full (write 1 to clear)
        FULL OFFSET(3) NUMBITS(1) [],
        /// FIFO overrun (write 1 to clear)
        FOVR OFFSET(4) NUMBITS(1) [],
        /// Release FIFO output mailbox
        RFOM OFFSET(5) NUMBITS(1) []
    ],
    pub ESR [
        /// Error warning flag
        EWGF OFFSET(0) NUMBITS(1) [],
        /// Error passive flag
        EPVF OFFSET(1) NUMBITS(1) [],
        /// Bus-off flag
        BOFF OFFSET(2) NUMBITS(1) [],
        /// Last error code
        LEC OFFSET(4) NUMBITS(3) [],
        /// Transmit error counter
        TEC OFFSET(16) NUMBITS(8) [],
        /// Receive error counter
        REC OFFSET(24) NUMBITS(8) []
    ],
    pub BTR [
        /// Baud rate prescaler
        BRP OFFSET(0) NUMBITS(10) [],
        /// Time segment 1
        TS1 OFFSET(16) NUMBITS(4) [],
        /// Time segment 2
        TS2 OFFSET(20) NUMBITS(3) [],
        /// Resynchronization jump width
        SJW OFFSET(24) NUMBITS(2) [],
        /// Loop back mode
        LBKM OFFSET(30) NUMBITS(1) [],
        /// Silent mode
        SILM OFFSET(31) NUMBITS(1) []
    ],
    pub TIR [
        /// Transmit mailbox request
        TXRQ OFFSET(0) NUMBITS(1) [],
        /// Remote transmission request
        RTR OFFSET(1) NUMBITS(1) [],
        /// Identifier extension
        IDE OFFSET(2) NUMBITS(1) [],
        /// Extended identifier (low 18 bits of a 29-bit identifier)
        EXID OFFSET(3) NUMBITS(18) [],
        /// Standard identifier (or the high 11 bits of a 29-bit identifier)
        STID OFFSET(21) NUMBITS(11) []
    ],
    pub TDTR [
        /// Data length code
        DLC OFFSET(0) NUMBITS(4) [],
        /// Transmit global time
        TGT OFFSET(8) NUMBITS(1) [],
        /// Message time stamp
        TIME OFFSET(16) NUMBITS(16) []
    ],
    pub RIR [
        RTR OFFSET(1) NUMBITS(1) [],
        IDE OFFSET(2) NUMBITS(1) [],
        EXID OFFSET(3) NUMBITS(18) [],
        STID OFFSET(21) NUMBITS(11) []
    ],
    pub RDTR [
        DLC OFFSET(0) NUMBITS(4) [],
        /// Filter match index
        FMI OFFSET(8) NUMBITS(8) [],
        TIME OFFSET(16) NUMBITS(16) []
    ],
    pub FMR [
        /// Filter init mode
        FINIT OFFSET(0) NUMBITS(1) [],
        /// CAN2 start bank (dual-CAN devices only)
        CAN2SB OFFSET(8) NUMBITS(6) []
    ]
];

#[cfg(test)]
mod tests {
    use super::CanRegisters;
    use core::mem::{offset_of, size_of};

    #[test]
    fn register_map_matches_reference_manual() {
        assert_eq!(offset_of!(CanRegisters, mcr), 0x000);
        assert_eq!(offset_of!(CanRegisters, rfr), 0x00C);
        assert_eq!(offset_of!(CanRegisters, ier), 0x014);
        assert_eq!(offset_of!(CanRegisters, btr), 0x01C);
        assert_eq!(offset_of!(CanRegisters, tx), 0x180);
        assert_eq!(offset_of!(CanRegisters, rx), 0x1B0);
        assert_eq!(offset_of!(CanRegisters, fmr), 0x200);
        assert_eq!(offset_of!(CanRegisters, fs1r), 0x20C);
        assert_eq!(offset_of!(CanRegisters, ffa1r), 0x214);
        assert_eq!(offset_of!(CanRegisters, fa1r), 0x21C);
        assert_eq!(offset_of!(CanRegisters, fb), 0x240);
        assert_eq!(size_of::<CanRegisters>(), 0x2B0);
    }
}
