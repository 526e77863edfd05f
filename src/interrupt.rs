//! Interrupt enable sets.

bitflags::bitflags! {
    /// A set of bxCAN interrupt sources, laid out like the IER register.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct Interrupts: u32 {
        const TRANSMIT_MAILBOX_EMPTY = 1 << 0;
        const FIFO0_MESSAGE_PENDING = 1 << 1;
        const FIFO0_FULL = 1 << 2;
        const FIFO0_OVERRUN = 1 << 3;
        const FIFO1_MESSAGE_PENDING = 1 << 4;
        const FIFO1_FULL = 1 << 5;
        const FIFO1_OVERRUN = 1 << 6;
        const ERROR_WARNING = 1 << 8;
        const ERROR_PASSIVE = 1 << 9;
        const BUS_OFF = 1 << 10;
        const LAST_ERROR_CODE = 1 << 11;
        const ERROR = 1 << 15;
        const WAKEUP = 1 << 16;
        const SLEEP = 1 << 17;
    }
}

impl Interrupts {
    /// The sources serviced by the transmit engine.
    pub const TX: Interrupts = Interrupts::TRANSMIT_MAILBOX_EMPTY;

    /// The sources serviced by the two receive FIFOs.
    pub const RX: Interrupts = Interrupts::FIFO0_MESSAGE_PENDING
        .union(Interrupts::FIFO0_FULL)
        .union(Interrupts::FIFO0_OVERRUN)
        .union(Interrupts::FIFO1_MESSAGE_PENDING)
        .union(Interrupts::FIFO1_FULL)
        .union(Interrupts::FIFO1_OVERRUN);

    /// The sources serviced by the status engine.
    pub const SCE: Interrupts = Interrupts::ERROR_WARNING
        .union(Interrupts::ERROR_PASSIVE)
        .union(Interrupts::BUS_OFF)
        .union(Interrupts::LAST_ERROR_CODE)
        .union(Interrupts::ERROR)
        .union(Interrupts::WAKEUP)
        .union(Interrupts::SLEEP);
}
