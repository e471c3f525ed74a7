//! STM32F407 binding for the tilt controller.
//!
//! Everything here is plumbing: peripheral bring-up, the tasks that
//! forward the event sources (supervisory tick, step timer, home flag
//! edge, stall-guard edge) into the controller, and the telemetry drain.
//! Control logic lives in `scanhead-tilt`; the driver protocol in
//! `scanhead-tmc260`.

#![no_std]
#![no_main]

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use defmt::{Debug2Format, info, warn};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_stm32::mode::Blocking;
use embassy_stm32::spi::{self, Spi};
use embassy_stm32::time::Hertz;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Delay, Duration, Ticker, Timer};
use panic_probe as _;
use static_cell::StaticCell;

use scanhead_tilt::config::{
    DEFAULT_STEP_FREQ_HZ, STATE_MACHINE_HZ, STEP_TIMER_HZ, reload_for_hz,
};
use scanhead_tilt::controller::TiltController;
use scanhead_tilt::telemetry::TelemetrySink;
use scanhead_tilt::timer::StepTimer;
use scanhead_tmc260::status::Status;
use scanhead_tmc260::tmc260::Tmc260;
use scanhead_tmc260::transport::SpiTransport;

type Bus = SpiTransport<Spi<'static, Blocking>, Output<'static>, Delay>;
type Controller = TiltController<Bus, Output<'static>, SoftStepTimer, ChannelSink>;
type SharedController = Mutex<CriticalSectionRawMutex, RefCell<Controller>>;

/// Mirror of the home flag level, refreshed by the edge task so the tick
/// task can sample it without owning the pin.
static HOME_UNCOVERED: AtomicBool = AtomicBool::new(false);

static STEP_RELOAD: AtomicU32 = AtomicU32::new(reload_for_hz(DEFAULT_STEP_FREQ_HZ));
static STEP_ENABLED: AtomicBool = AtomicBool::new(true);

/// The controller's reprogrammable step timer, realised as a shared reload
/// value that `step_task` sleeps on.
struct SoftStepTimer;

impl StepTimer for SoftStepTimer {
    fn set_reload(&mut self, ticks: u32) {
        STEP_RELOAD.store(ticks, Ordering::Relaxed);
    }

    fn enable(&mut self) {
        STEP_ENABLED.store(true, Ordering::Relaxed);
    }

    fn disable(&mut self) {
        STEP_ENABLED.store(false, Ordering::Relaxed);
    }
}

static STATUS_REPORTS: Channel<CriticalSectionRawMutex, Status, 4> = Channel::new();

/// Hands status reports to the packet layer. Best effort; a full queue
/// drops the report rather than stalling a handler.
struct ChannelSink;

impl TelemetrySink for ChannelSink {
    fn queue_status(&mut self, status: &Status) {
        let _ = STATUS_REPORTS.try_send(*status);
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Booting...");
    let mut config = embassy_stm32::Config::default();
    {
        use embassy_stm32::rcc::*;
        config.rcc.hsi = true; // 16Mhz
        config.rcc.pll_src = PllSource::HSI;
        config.rcc.pll = Some(Pll {
            prediv: PllPreDiv::DIV16,
            mul: PllMul::MUL336,
            divp: Some(PllPDiv::DIV2),
            divq: None,
            divr: None,
        });
        config.rcc.ahb_pre = AHBPrescaler::DIV1;
        config.rcc.apb1_pre = APBPrescaler::DIV4;
        config.rcc.apb2_pre = APBPrescaler::DIV2;
        config.rcc.sys = Sysclk::PLL1_P;
    }
    let p = embassy_stm32::init(config);

    // The TMC260 clocks SPI from its 15 MHz internal oscillator; Trinamic
    // advises staying under 0.9 * 15 MHz / 2, so run well below that.
    let mut spi_config = spi::Config::default();
    spi_config.frequency = Hertz(5_250_000);
    spi_config.mode = spi::MODE_3;
    let spi = Spi::new_blocking(p.SPI1, p.PA5, p.PA7, p.PA6, spi_config);
    let cs = Output::new(p.PC13, Level::High, Speed::VeryHigh);
    let bus = SpiTransport::new(spi, cs, Delay);

    let en = Output::new(p.PA0, Level::High, Speed::VeryHigh);
    let dir = Output::new(p.PA1, Level::Low, Speed::VeryHigh);
    let step = Output::new(p.PA2, Level::Low, Speed::VeryHigh);
    let driver = Tmc260::new(bus, en, step, dir);

    let mut home_flag = ExtiInput::new(p.PC1, p.EXTI1, Pull::Up);
    let stall_flag = ExtiInput::new(p.PC2, p.EXTI2, Pull::None);
    HOME_UNCOVERED.store(home_flag.is_high(), Ordering::Relaxed);

    let controller = TiltController::new(driver, SoftStepTimer, ChannelSink);
    static CONTROLLER: StaticCell<SharedController> = StaticCell::new();
    let controller = CONTROLLER.init(Mutex::new(RefCell::new(controller)));

    spawner.spawn(tick_task(controller)).unwrap();
    spawner.spawn(step_task(controller)).unwrap();
    spawner.spawn(home_task(home_flag, controller)).unwrap();
    spawner.spawn(stall_task(stall_flag, controller)).unwrap();
    spawner.spawn(telemetry_task()).unwrap();
    info!("Tilt controller running");
}

#[embassy_executor::task]
async fn tick_task(controller: &'static SharedController) {
    let mut ticker = Ticker::every(Duration::from_hz(STATE_MACHINE_HZ as u64));
    loop {
        ticker.next().await;
        let uncovered = HOME_UNCOVERED.load(Ordering::Relaxed);
        let report = controller.lock(|c| {
            let mut c = c.borrow_mut();
            if let Err(e) = c.on_tick(uncovered) {
                warn!("driver error: {}", Debug2Format(&e));
            }
            c.take_angle_report()
        });
        if let Some(angle) = report {
            info!("tilt angle: {=f32} rad", angle);
        }
    }
}

#[embassy_executor::task]
async fn step_task(controller: &'static SharedController) {
    loop {
        let reload = STEP_RELOAD.load(Ordering::Relaxed);
        let period_us = ((reload as u64 + 1) * 1_000_000) / STEP_TIMER_HZ as u64;
        Timer::after_micros(period_us.max(1)).await;
        if STEP_ENABLED.load(Ordering::Relaxed) {
            controller.lock(|c| c.borrow_mut().on_step_timer());
        }
    }
}

#[embassy_executor::task]
async fn home_task(mut flag: ExtiInput<'static>, controller: &'static SharedController) {
    loop {
        flag.wait_for_any_edge().await;
        let uncovered = flag.is_high();
        HOME_UNCOVERED.store(uncovered, Ordering::Relaxed);
        controller.lock(|c| c.borrow_mut().on_home_edge(uncovered));
    }
}

#[embassy_executor::task]
async fn stall_task(mut flag: ExtiInput<'static>, controller: &'static SharedController) {
    loop {
        flag.wait_for_rising_edge().await;
        controller.lock(|c| c.borrow_mut().on_stall_edge());
    }
}

#[embassy_executor::task]
async fn telemetry_task() {
    loop {
        let status = STATUS_REPORTS.receive().await;
        info!(
            "status: pos={=u16} sg={=u16} cs={=u8} flags={=u8:08b}",
            status.position, status.stall_guard, status.current, status.status_byte
        );
    }
}
