//! Register model and motion primitives for the TMC260.
//!
//! The chip has no read-back path for its configuration registers, so the
//! last value sent for each register is cached here. A write that the chip
//! drops on the wire is undetectable; the only recovery is a full
//! reinitialisation with [`Tmc260::init_defaults`].

use core::convert::Infallible;

use embedded_hal::digital::{OutputPin, StatefulOutputPin};

use crate::datagram;
use crate::direction::Direction;
use crate::errors::Tmc260Error;
use crate::registers::{
    ChopConf, DrvConf, DrvCtrlDirectPhase, DrvCtrlStepDir, Microsteps, SgCsConf, SmartEn, drvconf,
};
use crate::status::{Status, StatusKind};
use crate::transport::DatagramBus;

/// DRVCONF base used for status reads before any DRVCONF has been written:
/// maximum slope control, protections on, step/direction interface active.
const DRVCONF_READONLY_BASE: u32 = 0xEF000;

pub struct Tmc260<B, O> {
    bus: B,
    en: O,
    step: O,
    dir: O,
    drvctrl: u32,
    chopconf: u32,
    smarten: u32,
    sgcsconf: u32,
    drvconf: u32,
}

impl<B, O> Tmc260<B, O>
where
    B: DatagramBus,
    O: OutputPin<Error = Infallible> + StatefulOutputPin<Error = Infallible>,
{
    /// Takes ownership of the bus and the enable/step/direction lines.
    /// Nothing is transmitted until a register is written.
    pub fn new(bus: B, en: O, step: O, dir: O) -> Self {
        Self {
            bus,
            en,
            step,
            dir,
            drvctrl: 0,
            chopconf: 0,
            smarten: 0,
            sgcsconf: 0,
            drvconf: 0,
        }
    }

    /// Brings every configuration register to its known default.
    pub fn init_defaults(&mut self) -> Result<(), Tmc260Error> {
        debug!("writing TMC260 register defaults");
        self.send_drvconf(&DrvConf {
            tst: 0,
            slph: 0,
            slpl: 0,
            diss2g: 0,
            ts2g: 0,
            sdoff: 0,
            vsense: 0,
            rdsel: 0,
        })?;
        // No step interpolation, step on both edges, 1/64 microstepping.
        self.send_drvctrl_step_dir(&DrvCtrlStepDir {
            intpol: 0,
            dedge: 1,
            mres: Microsteps::M64,
        })?;
        self.send_chopconf(&ChopConf {
            tbl: 0,
            chm: 1,
            rndtf: 0,
            hdec: 0,
            hend: 0,
            hstrt: 4,
            toff: 4,
        })?;
        self.send_smarten(&SmartEn {
            seimin: 0,
            sedn: 0,
            semax: 2,
            seup: 0,
            semin: 0,
        })?;
        // Low current scale while the mechanics are being exercised.
        self.send_sgcsconf(&SgCsConf {
            sfilt: 1,
            sgt: 0x3F,
            cs: 5,
        })?;
        Ok(())
    }

    pub fn send_drvctrl_step_dir(&mut self, reg: &DrvCtrlStepDir) -> Result<(), Tmc260Error> {
        let regval = reg.regval()?;
        self.bus.exchange(datagram::pack(regval))?;
        self.drvctrl = regval;
        Ok(())
    }

    pub fn send_drvctrl_direct_phase(&mut self, reg: &DrvCtrlDirectPhase) -> Result<(), Tmc260Error> {
        let regval = reg.regval()?;
        self.bus.exchange(datagram::pack(regval))?;
        self.drvctrl = regval;
        Ok(())
    }

    pub fn send_chopconf(&mut self, reg: &ChopConf) -> Result<(), Tmc260Error> {
        let regval = reg.regval()?;
        self.bus.exchange(datagram::pack(regval))?;
        self.chopconf = regval;
        Ok(())
    }

    pub fn send_smarten(&mut self, reg: &SmartEn) -> Result<(), Tmc260Error> {
        let regval = reg.regval()?;
        self.bus.exchange(datagram::pack(regval))?;
        self.smarten = regval;
        Ok(())
    }

    pub fn send_sgcsconf(&mut self, reg: &SgCsConf) -> Result<(), Tmc260Error> {
        let regval = reg.regval()?;
        self.bus.exchange(datagram::pack(regval))?;
        self.sgcsconf = regval;
        Ok(())
    }

    pub fn send_drvconf(&mut self, reg: &DrvConf) -> Result<(), Tmc260Error> {
        let regval = reg.regval()?;
        self.bus.exchange(datagram::pack(regval))?;
        self.drvconf = regval;
        Ok(())
    }

    /// Reads one status word of the requested kind.
    ///
    /// The chip reports the readout that was selected on the *previous*
    /// transaction, so this is two-phase: rewrite DRVCONF with rdsel set to
    /// the requested kind, then write it again unchanged and decode the
    /// echo of the second write.
    pub fn read_status(&mut self, kind: StatusKind) -> Result<Status, Tmc260Error> {
        if self.drvconf == 0 {
            self.drvconf = DRVCONF_READONLY_BASE;
        }
        let mut regval = self.drvconf & !drvconf::RDSEL_MASK;
        regval |= ((kind.rdsel() as u32) << drvconf::RDSEL_SHIFT) & drvconf::RDSEL_MASK;

        self.bus.exchange(datagram::pack(regval))?;
        self.drvconf = regval;
        let rx = self.bus.exchange(datagram::pack(regval))?;
        Ok(Status::decode(datagram::unpack(rx), kind))
    }

    /// Powers the output stage on. The enable line is active low.
    pub fn enable(&mut self) {
        self.en.set_low().unwrap();
    }

    /// Floats the motor outputs.
    pub fn disable(&mut self) {
        self.en.set_high().unwrap();
    }

    /// Drives the direction line. Clockwise is the level that makes the
    /// platform angle increase; the mapping is fixed by the wiring.
    pub fn set_direction(&mut self, direction: Direction) {
        match direction {
            Direction::Clockwise => self.dir.set_low().unwrap(),
            Direction::CounterClockwise => self.dir.set_high().unwrap(),
        }
    }

    /// Emits one microstep by toggling the step line.
    ///
    /// DEDGE is set during [`Self::init_defaults`], so the chip steps on
    /// both edges and every toggle is one microstep. If the chip is ever
    /// configured for rising-edge stepping instead, each toggle becomes
    /// half a step and nothing here will notice.
    pub fn step(&mut self) {
        self.step.toggle().unwrap();
    }

    pub fn cached_drvctrl(&self) -> u32 {
        self.drvctrl
    }

    pub fn cached_chopconf(&self) -> u32 {
        self.chopconf
    }

    pub fn cached_smarten(&self) -> u32 {
        self.smarten
    }

    pub fn cached_sgcsconf(&self) -> u32 {
        self.sgcsconf
    }

    pub fn cached_drvconf(&self) -> u32 {
        self.drvconf
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::vec::Vec;
    use std::vec;

    use super::*;

    #[derive(Default)]
    struct BusLog {
        sent: Vec<[u8; 3]>,
        responses: Vec<[u8; 3]>,
    }

    #[derive(Clone, Default)]
    struct MockBus(Rc<RefCell<BusLog>>);

    impl DatagramBus for MockBus {
        fn exchange(&mut self, tx: [u8; 3]) -> Result<[u8; 3], Tmc260Error> {
            let mut log = self.0.borrow_mut();
            log.sent.push(tx);
            let index = log.sent.len() - 1;
            Ok(log.responses.get(index).copied().unwrap_or([0; 3]))
        }
    }

    #[derive(Clone, Default)]
    struct MockPin(Rc<Cell<bool>>);

    impl MockPin {
        fn is_high(&self) -> bool {
            self.0.get()
        }
    }

    impl embedded_hal::digital::ErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.set(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.set(true);
            Ok(())
        }
    }

    impl StatefulOutputPin for MockPin {
        fn is_set_high(&mut self) -> Result<bool, Infallible> {
            Ok(self.0.get())
        }

        fn is_set_low(&mut self) -> Result<bool, Infallible> {
            Ok(!self.0.get())
        }
    }

    struct Harness {
        bus: MockBus,
        en: MockPin,
        step: MockPin,
        dir: MockPin,
        driver: Tmc260<MockBus, MockPin>,
    }

    fn harness() -> Harness {
        let bus = MockBus::default();
        let en = MockPin::default();
        let step = MockPin::default();
        let dir = MockPin::default();
        let driver = Tmc260::new(bus.clone(), en.clone(), step.clone(), dir.clone());
        Harness {
            bus,
            en,
            step,
            dir,
            driver,
        }
    }

    #[test]
    fn setter_transmits_and_caches() {
        let mut h = harness();
        h.driver
            .send_chopconf(&ChopConf {
                tbl: 0,
                chm: 1,
                rndtf: 0,
                hdec: 0,
                hend: 0,
                hstrt: 4,
                toff: 4,
            })
            .unwrap();
        assert_eq!(h.bus.0.borrow().sent, vec![[0x08, 0x40, 0x44]]);
        assert_eq!(h.driver.cached_chopconf(), 0x84044);
    }

    #[test]
    fn invalid_input_leaves_cache_untouched_and_transmits_nothing() {
        let mut h = harness();
        h.driver
            .send_drvctrl_step_dir(&DrvCtrlStepDir {
                intpol: 0,
                dedge: 1,
                mres: Microsteps::M64,
            })
            .unwrap();
        let cached = h.driver.cached_drvctrl();
        let sent_before = h.bus.0.borrow().sent.len();

        let err = h
            .driver
            .send_drvctrl_step_dir(&DrvCtrlStepDir {
                intpol: 7,
                dedge: 1,
                mres: Microsteps::M64,
            })
            .unwrap_err();
        assert!(matches!(err, Tmc260Error::InvalidBitField("intpol", 7)));
        assert_eq!(h.driver.cached_drvctrl(), cached);
        assert_eq!(h.bus.0.borrow().sent.len(), sent_before);
    }

    #[test]
    fn init_defaults_writes_all_five_registers_in_order() {
        let mut h = harness();
        h.driver.init_defaults().unwrap();
        let sent = h.bus.0.borrow().sent.clone();
        assert_eq!(
            sent,
            vec![
                [0x0E, 0x00, 0x00], // DRVCONF
                [0x00, 0x01, 0x02], // DRVCTRL, step/dir
                [0x08, 0x40, 0x44], // CHOPCONF
                [0x0A, 0x02, 0x00], // SMARTEN
                [0x0D, 0x3F, 0x05], // SGCSCONF
            ]
        );
    }

    #[test]
    fn first_status_read_uses_the_readonly_drvconf_base() {
        let mut h = harness();
        // The echo of the second write carries the selected readout.
        h.bus.0.borrow_mut().responses = vec![[0, 0, 0], [0x40, 0x08, 0x50]];

        let status = h.driver.read_status(StatusKind::StallGuard).unwrap();

        let sent = h.bus.0.borrow().sent.clone();
        // 0xEF000 base with rdsel = 1, written twice.
        assert_eq!(sent, vec![[0x0E, 0xF0, 0x10], [0x0E, 0xF0, 0x10]]);
        assert_eq!(h.driver.cached_drvconf(), 0xEF010);

        // Raw response 0x40085: stallGuard lanes 0b0100000000, byte 0x85.
        assert_eq!(status.kind, StatusKind::StallGuard);
        assert_eq!(status.stall_guard, 0b01_0000_0000);
        assert_eq!(status.status_byte, 0x85);
        assert!(status.stall);
        assert!(status.standstill);
    }

    #[test]
    fn status_read_preserves_configured_drvconf_fields() {
        let mut h = harness();
        h.driver
            .send_drvconf(&DrvConf {
                tst: 0,
                slph: 3,
                slpl: 3,
                diss2g: 0,
                ts2g: 0,
                sdoff: 0,
                vsense: 1,
                rdsel: 0,
            })
            .unwrap();
        let configured = h.driver.cached_drvconf();

        h.driver
            .read_status(StatusKind::StallGuardAndCurrent)
            .unwrap();
        let expected = (configured & !drvconf::RDSEL_MASK) | (2 << drvconf::RDSEL_SHIFT);
        assert_eq!(h.driver.cached_drvconf(), expected);
    }

    #[test]
    fn enable_is_active_low() {
        let mut h = harness();
        h.driver.enable();
        assert!(!h.en.is_high());
        h.driver.disable();
        assert!(h.en.is_high());
    }

    #[test]
    fn direction_levels_are_fixed_by_wiring() {
        let mut h = harness();
        h.driver.set_direction(Direction::Clockwise);
        assert!(!h.dir.is_high());
        h.driver.set_direction(Direction::CounterClockwise);
        assert!(h.dir.is_high());
    }

    #[test]
    fn every_step_call_toggles_the_step_line() {
        let mut h = harness();
        assert!(!h.step.is_high());
        h.driver.step();
        assert!(h.step.is_high());
        h.driver.step();
        assert!(!h.step.is_high());
    }
}
