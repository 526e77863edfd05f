mod common;

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use common::{FakeHardware, InakMirror, TestIntc, TestKernel, TME_ALL};

use bxcan_rtos::os::Vector;
use bxcan_rtos::{
    BitRate, Can, CanHandle, Config, Controller, Data, ExtendedId, Fifo, Frame, Mask32, Number,
    RxFilter, SamplePoint, StandardId,
};
use tock_registers::interfaces::{Readable, Writeable};

type TestController = Controller<TestKernel, TestIntc>;
type TestCan = Can<TestKernel, TestIntc>;

const RQCP0: u32 = 0x01;
const TXOK0: u32 = 0x02;
const TERR0: u32 = 0x08;

struct Rig {
    hw: FakeHardware,
    controller: &'static TestController,
    kernel: &'static TestKernel,
    intc: &'static TestIntc,
}

impl Rig {
    fn new() -> Rig {
        Rig {
            hw: FakeHardware::new(),
            controller: Box::leak(Box::new(Controller::new())),
            kernel: TestKernel::new().leak(),
            intc: TestIntc::new().leak(),
        }
    }

    fn loopback_config() -> Config {
        let mut config = Config::new(Number::Can1, BitRate::Kbit500, SamplePoint::CanOpen);
        config.options.lbkm = true;
        config.options.silm = true;
        config
    }

    /// Creates the device with the INAK hardware model running and all
    /// transmit mailboxes reported empty.
    fn create(&self, config: &Config) -> CanHandle<TestKernel, TestIntc> {
        let mirror = InakMirror::spawn(self.hw.can);
        let handle = self
            .controller
            .create(config, self.hw.peripherals(), self.kernel, self.intc)
            .expect("device construction failed");
        mirror.stop();
        self.hw.can.tsr.set(TME_ALL);
        handle
    }

    /// Places a received frame in the FIFO0 output mailbox and fires the
    /// FIFO0 vector.
    fn inject_fifo0(&self, rir: u32, dlc: u32, low: u32, high: u32) {
        self.hw.can.rx[0].rir.set(rir);
        self.hw.can.rx[0].rdtr.set(dlc);
        self.hw.can.rx[0].rdlr.set(low);
        self.hw.can.rx[0].rdhr.set(high);
        self.hw.can.rfr[0].set(1); // one message pending
        self.intc.fire(Vector::UsbLpCan1Rx0);
    }

    /// Reflects the frame sitting in TX mailbox 0 into the FIFO0 output
    /// mailbox, the way loopback mode hands transmissions back.
    fn reflect_tx0_to_fifo0(&self) {
        let can = self.hw.can;
        self.inject_fifo0(
            can.tx[0].tir.get() & !1, // TXRQ is not part of RIR
            can.tx[0].tdtr.get() & 0xF,
            can.tx[0].tdlr.get(),
            can.tx[0].tdhr.get(),
        );
    }

    /// Completes mailbox 0 with the given TXOK/TERR flags and fires the
    /// TX vector; repaints TME afterwards (the fake TSR has no
    /// write-1-to-clear hardware behind it).
    fn complete_tx0(&self, flags: u32) {
        self.hw.can.tsr.set(TME_ALL | RQCP0 | flags);
        self.intc.fire(Vector::UsbHpCan1Tx);
        self.hw.can.tsr.set(TME_ALL);
    }
}

fn blocking_receive(can: &TestCan, fifo: Fifo) -> Frame {
    let mut frame = Frame::new_data(StandardId::ZERO, Data::empty());
    assert!(can.receive(&mut frame, fifo));
    frame
}

#[test]
fn create_rejects_can2() {
    let rig = Rig::new();
    let mut config = Rig::loopback_config();
    config.number = Number::Can2;
    assert!(rig
        .controller
        .create(&config, rig.hw.peripherals(), rig.kernel, rig.intc)
        .is_none());
}

#[test]
fn create_rejects_wrong_core_clock() {
    let rig = Rig::new();
    let kernel = TestKernel::with_clock(48_000_000).leak();
    assert!(rig
        .controller
        .create(
            &Rig::loopback_config(),
            rig.hw.peripherals(),
            kernel,
            rig.intc
        )
        .is_none());
}

#[test]
fn create_times_out_without_init_acknowledge() {
    let rig = Rig::new();
    // No hardware model: INAK never asserts, the bounded poll expires.
    assert!(rig
        .controller
        .create(
            &Rig::loopback_config(),
            rig.hw.peripherals(),
            rig.kernel,
            rig.intc
        )
        .is_none());

    // The slot was released; construction works once the controller
    // acknowledges mode changes.
    let handle = rig.create(&Rig::loopback_config());
    assert_eq!(handle.state(), bxcan_rtos::State::Normal);
}

#[test]
fn create_programs_the_controller_and_deinit_reverts_it() {
    let rig = Rig::new();
    let mut config = Rig::loopback_config();
    config.options.dbf = true;
    let handle = rig.create(&config);

    let can = rig.hw.can;
    // 500 kbit/s at the CANopen sample point, loopback + silent.
    assert_eq!(can.btr.get(), 0xC01E_0003);
    // MCR: DBF only (INRQ and SLEEP both cleared).
    assert_eq!(can.mcr.get(), 1 << 16);
    assert_eq!(rig.hw.dbg.cr.get(), 1 << 14);
    // IER: TX + RX + SCE sources.
    assert_eq!(can.ier.get(), 0x0003_8F7F);
    // APB1 clock gated on, port A clocked, PA11 pull-up input, PA12
    // alternate push-pull.
    assert_eq!(rig.hw.rcc.apb1enr.get(), 1 << 25);
    assert_eq!(rig.hw.rcc.apb2enr.get(), 1 << 2);
    assert_eq!(rig.hw.gpioa.crh.get() >> 12 & 0xF, 0b1000);
    assert_eq!(rig.hw.gpioa.crh.get() >> 16 & 0xF, 0b1011);
    assert_eq!(rig.hw.gpioa.bsrr.get(), 1 << 11);
    for vector in [
        Vector::UsbHpCan1Tx,
        Vector::UsbLpCan1Rx0,
        Vector::Can1Rx1,
        Vector::Can1Sce,
    ] {
        assert!(rig.intc.is_enabled(vector));
    }

    // Only one device per controller.
    assert!(rig
        .controller
        .create(&config, rig.hw.peripherals(), rig.kernel, rig.intc)
        .is_none());

    handle.release();
    assert_eq!(can.ier.get(), 0);
    assert_eq!(rig.hw.rcc.apb1enr.get(), 0);
    for vector in [
        Vector::UsbHpCan1Tx,
        Vector::UsbLpCan1Rx0,
        Vector::Can1Rx1,
        Vector::Can1Sce,
    ] {
        assert!(!rig.intc.is_enabled(vector));
    }

    // The slot is free again.
    let handle = rig.create(&config);
    assert_eq!(handle.state(), bxcan_rtos::State::Normal);
}

#[test]
fn loopback_roundtrip_standard_frame() {
    let rig = Rig::new();
    let handle = rig.create(&Rig::loopback_config());

    assert!(handle.set_receive_filter(&RxFilter::accept_all(0, Fifo::Fifo0)));

    let frame = Frame::new_data(
        StandardId::new(0x123).unwrap(),
        [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88],
    );
    assert!(handle.transmit(&frame));
    assert_eq!(rig.hw.can.tx[0].tir.get(), 0x123 << 21 | 1);

    rig.reflect_tx0_to_fifo0();
    // The interrupt routine released the hardware FIFO slot.
    assert_eq!(rig.hw.can.rfr[0].get(), 1 << 5);

    assert_eq!(blocking_receive(&handle, Fifo::Fifo0), frame);

    rig.complete_tx0(TXOK0);
    assert_eq!(handle.transmit_error_counter(), 0);
}

#[test]
fn loopback_roundtrip_extended_frame() {
    let rig = Rig::new();
    let handle = rig.create(&Rig::loopback_config());
    assert!(handle.set_receive_filter(&RxFilter::accept_all(0, Fifo::Fifo0)));

    let id = ExtendedId::new(0x1ABC_DEF0).unwrap();
    let frame = Frame::new_data(id, [0xDE, 0xAD, 0xBE, 0xEF]);
    assert!(handle.transmit(&frame));
    rig.reflect_tx0_to_fifo0();

    let received = blocking_receive(&handle, Fifo::Fifo0);
    assert_eq!(received.id(), frame.id());
    assert!(received.is_extended());
    assert!(received.is_data_frame());
    assert_eq!(received.dlc(), 4);
    assert_eq!(&received.data().unwrap()[..], &[0xDE, 0xAD, 0xBE, 0xEF]);
}

#[test]
fn fourth_transmit_blocks_until_a_mailbox_frees() {
    let rig = Rig::new();
    let handle = rig.create(&Rig::loopback_config());
    let device: &'static TestCan = &*Box::leak(Box::new(handle));

    let frame = Frame::new_data(StandardId::new(5).unwrap(), [1, 2, 3]);
    for _ in 0..3 {
        assert!(device.transmit(&frame));
    }

    // All permits are taken; the fourth producer must block.
    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        let ok = device.transmit(&frame);
        tx.send(ok).unwrap();
    });
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    // Completing mailbox 0 releases one permit and unblocks the worker.
    rig.complete_tx0(TXOK0);
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    worker.join().unwrap();
}

fn std_rir(id: u16) -> u32 {
    u32::from(id) << 21
}

#[test]
fn locked_fifo_drops_the_newest_on_overrun() {
    let rig = Rig::new();
    let mut config = Rig::loopback_config();
    config.options.rflm = true;
    let handle = rig.create(&config);

    for n in 1..=4u16 {
        rig.inject_fifo0(std_rir(n), 1, u32::from(n), 0);
    }

    // The queue kept the first three arrivals, in order; the fourth was
    // dropped at queue level.
    for n in 1..=3u16 {
        let frame = blocking_receive(&handle, Fifo::Fifo0);
        assert_eq!(frame.id(), StandardId::new(n).unwrap().into());
    }

    // A later arrival is accepted again.
    rig.inject_fifo0(std_rir(9), 1, 9, 0);
    let frame = blocking_receive(&handle, Fifo::Fifo0);
    assert_eq!(frame.id(), StandardId::new(9).unwrap().into());
}

#[test]
fn unlocked_fifo_overwrites_the_oldest_on_overrun() {
    let rig = Rig::new();
    let handle = rig.create(&Rig::loopback_config());

    for n in 1..=4u16 {
        rig.inject_fifo0(std_rir(n), 1, u32::from(n), 0);
    }

    for n in 2..=4u16 {
        let frame = blocking_receive(&handle, Fifo::Fifo0);
        assert_eq!(frame.id(), StandardId::new(n).unwrap().into());
    }
}

#[test]
fn hardware_overrun_is_counted_and_cleared() {
    let rig = Rig::new();
    let handle = rig.create(&Rig::loopback_config());

    // FOVR latched with no pending message.
    rig.hw.can.rfr[0].set(1 << 4);
    rig.intc.fire(Vector::UsbLpCan1Rx0);
    assert_eq!(handle.fifo_overruns(Fifo::Fifo0), 1);
    assert_eq!(handle.fifo_overruns(Fifo::Fifo1), 0);
    // The flag was written back as write-1-to-clear.
    assert_eq!(rig.hw.can.rfr[0].get(), 1 << 4);
}

#[test]
fn filter_bank_programming_walks_the_finit_transaction() {
    let rig = Rig::new();
    let handle = rig.create(&Rig::loopback_config());
    let can = rig.hw.can;

    let id = StandardId::new(0x100).unwrap();
    let filter = RxFilter::new(3, Fifo::Fifo1, Mask32::frames_with_std_id(id, StandardId::MAX));
    assert!(handle.set_receive_filter(&filter));

    assert_eq!(can.fa1r.get(), 1 << 3);
    assert_eq!(can.fm1r.get(), 0); // mask mode
    assert_eq!(can.fs1r.get(), 1 << 3); // 32-bit scale
    assert_eq!(can.ffa1r.get(), 1 << 3); // FIFO1
    assert_eq!(can.fb[3].fr1.get(), 0x100 << 21);
    assert_eq!(can.fb[3].fr2.get(), 0x7FF << 21 | 1 << 2);
    assert_eq!(can.fmr.get(), 0); // FINIT left clear

    // Bank indices beyond the hardware are rejected.
    assert!(!handle.set_receive_filter(&RxFilter::accept_all(14, Fifo::Fifo0)));
}

#[test]
fn failed_transmissions_raise_the_error_counter() {
    let rig = Rig::new();
    let handle = rig.create(&Rig::loopback_config());

    let frame = Frame::new_data(StandardId::new(1).unwrap(), []);
    assert!(handle.transmit(&frame));
    rig.complete_tx0(TERR0); // completion without TXOK
    assert_eq!(handle.transmit_error_counter(), 1);

    assert!(handle.transmit(&frame));
    rig.complete_tx0(TXOK0);
    assert_eq!(handle.transmit_error_counter(), 1);
}

#[test]
fn embedded_can_channel_round_trips() {
    use embedded_can::blocking::Can as _;

    let rig = Rig::new();
    let handle = rig.create(&Rig::loopback_config());
    assert!(handle.set_receive_filter(&RxFilter::accept_all(0, Fifo::Fifo0)));

    let frame = Frame::new_data(StandardId::new(0x42).unwrap(), [7, 7]);
    let mut channel = handle.channel(Fifo::Fifo0);
    channel.transmit(&frame).unwrap();
    rig.reflect_tx0_to_fifo0();
    assert_eq!(channel.receive().unwrap(), frame);
}

#[test]
fn status_engine_accumulates_bus_health() {
    let rig = Rig::new();
    let handle = rig.create(&Rig::loopback_config());

    // Error warning + LEC = ACK, then a wakeup event.
    rig.hw.can.esr.set(0b011 << 4 | 0b001);
    rig.hw.can.msr.set(1 << 3 | 1 << 2);
    rig.intc.fire(Vector::Can1Sce);

    let health = handle.bus_health().unwrap();
    assert_eq!(health.error_warnings, 1);
    assert_eq!(health.wakeups, 1);
    assert_eq!(
        health.last_error_code,
        bxcan_rtos::LastErrorCode::Ack
    );
}
