//! # Water my garden firmware
//! Raspberry Pi Pico W entry point: claims the peripherals, wires the services together over their channels and
//! spawns one task per service.
//!
//! The clock task runs on an interrupt executor at a higher priority than the rest, so alarm handling never waits
//! behind the network stack.

// we are in an environment with constrained resources, so we do not use the standard library and we define a different entry point.
#![no_std]
#![no_main]

use defmt::{info, unwrap};
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_rp::interrupt;
use embassy_rp::interrupt::{InterruptExt, Priority};
use water_my_garden::channel::Channel;
use water_my_garden::interrupt::InterruptEvent;
use water_my_garden::message::Message;
use water_my_garden::wall_clock::WallClock;
use water_my_garden::watering::WateringConfig;
use water_my_garden::web::ConfigClient;
use {defmt_rtt as _, panic_probe as _};

use crate::task::resources::{AssignedResources, ProbeResources, RtcResources, ValveResources, WifiResources};

mod task;

/// Clock service <-> watering service
static CLOCK_WATERING: Channel<Message> = Channel::new();
/// Clock service <-> web server
static CLOCK_WEB: Channel<Message> = Channel::new();
/// Watering service <-> moisture service
static WATERING_MOISTURE: Channel<Message> = Channel::new();
/// Watering service <-> web server
static WATERING_WEB: Channel<Message> = Channel::new();
/// Moisture service <-> web server
static MOISTURE_WEB: Channel<Message> = Channel::new();

/// Calendar time, synced by the clock service
static WALL_CLOCK: WallClock = WallClock::new();

/// Raised by the RTC interrupt line
static RTC_ALARM: InterruptEvent = InterruptEvent::new();

/// Executor for the clock task
static CLOCK_EXECUTOR: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn SWI_IRQ_1() {
    unsafe { CLOCK_EXECUTOR.on_interrupt() }
}

// Entry point
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Program start");

    // Initialize the peripherals for the RP2040
    let p = embassy_rp::init(Default::default());
    let r = split_resources!(p);

    let config = WateringConfig::default();
    let probe_map = config.probe_map();

    // claim both ends of every channel before any service runs, the services check that their peers are there
    let (clock_to_watering, watering_to_clock) = (CLOCK_WATERING.open(), CLOCK_WATERING.connect());
    let (clock_to_web, web_to_clock) = (CLOCK_WEB.open(), CLOCK_WEB.connect());
    let (moisture_to_watering, watering_to_moisture) = (WATERING_MOISTURE.open(), WATERING_MOISTURE.connect());
    let (watering_to_web, web_to_watering) = (WATERING_WEB.open(), WATERING_WEB.connect());
    let (moisture_to_web, web_to_moisture) = (MOISTURE_WEB.open(), MOISTURE_WEB.connect());

    info!("init clock");
    interrupt::SWI_IRQ_1.set_priority(Priority::P2);
    let clock_spawner = CLOCK_EXECUTOR.start(interrupt::SWI_IRQ_1);
    unwrap!(clock_spawner.spawn(task::clock::clock_task(
        r.rtc,
        clock_to_watering,
        clock_to_web,
        &RTC_ALARM,
        &WALL_CLOCK,
    )));

    info!("init moisture");
    unwrap!(spawner.spawn(task::moisture::moisture_task(
        r.probes,
        moisture_to_watering,
        moisture_to_web,
        probe_map,
    )));

    info!("init watering");
    unwrap!(spawner.spawn(task::watering::watering_task(
        r.valves,
        watering_to_clock,
        watering_to_moisture,
        watering_to_web,
        &WALL_CLOCK,
        config,
    )));

    info!("init network");
    let client = ConfigClient::new(web_to_clock, web_to_moisture, web_to_watering);
    unwrap!(spawner.spawn(task::network::network_task(spawner, r.wifi, client)));
}
