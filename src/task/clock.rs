//! # Clock Task
//! Runs the clock service on the DS3231 and watches the RTC's interrupt line.
//!
//! The DS3231 sits on I2C0 and is driven blocking, its transactions are a few bytes long. The INT/SQW line is open
//! drain and active low, it stays low until the service has cleared the fired flags. The watcher only raises the
//! interrupt event, all register access happens in the service.

use core::fmt::Debug;

use chrono::NaiveDateTime;
use defmt::{Debug2Format, Format, debug, info, warn};
use ds323x::ic::DS3231;
use ds323x::interface::I2cInterface;
use ds323x::{DateTimeAccess, Ds323x};
use embassy_futures::join::join;
use embassy_rp::gpio::{Input, Pull};
use embassy_rp::i2c::{self, Blocking, I2c};
use embassy_rp::peripherals::I2C0;
use embassy_time::{Duration, with_timeout};
use water_my_garden::channel::Endpoint;
use water_my_garden::clock::{AlarmFlags, AlarmSlot, ClockConfig, ClockDevice, ClockService, MatchRule};
use water_my_garden::interrupt::InterruptEvent;
use water_my_garden::message::Message;
use water_my_garden::wall_clock::WallClock;

use crate::task::resources::RtcResources;

/// How long the INT line may stay low before the event is raised again.
const LINE_RECHECK: Duration = Duration::from_secs(10);

/// The driver over the blocking bus.
type Rtc = Ds323x<I2cInterface<I2c<'static, I2C0, Blocking>>, DS3231>;

/// Why the RTC could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum RtcError {
    /// The I2C transaction failed or the device answered with garbage
    Bus,
}

/// Log the driver error and collapse it.
fn bus_error<E: Debug>(e: E) -> RtcError {
    warn!("DS3231 access failed: {:?}", Debug2Format(&e));
    RtcError::Bus
}

/// The DS3231 behind the clock service.
///
/// The driver has no getter for the interrupt enable bits, so they are shadowed here. Every write goes through
/// [`ClockDevice::set_interrupt_enabled`] and [`ClockDevice::init`], which keeps the shadow in step.
pub struct Ds3231 {
    /// Driver
    rtc: Rtc,
    /// Interrupt enable bits as last written
    enables: AlarmFlags,
}

impl Ds3231 {
    /// Wrap the bus. The device is not touched until `init`.
    pub fn new(i2c: I2c<'static, I2C0, Blocking>) -> Self {
        Self {
            rtc: Ds323x::new_ds3231(i2c),
            enables: AlarmFlags::NONE,
        }
    }
}

impl ClockDevice for Ds3231 {
    type Error = RtcError;

    fn init(&mut self) -> Result<(), RtcError> {
        self.rtc.enable().map_err(bus_error)?;
        self.rtc.use_int_sqw_output_as_interrupt().map_err(bus_error)?;
        self.rtc.disable_alarm1_interrupts().map_err(bus_error)?;
        self.rtc.disable_alarm2_interrupts().map_err(bus_error)?;
        self.enables = AlarmFlags::NONE;
        if self.rtc.has_been_stopped().map_err(bus_error)? {
            warn!("DS3231 oscillator has been stopped, the time may be off");
            self.rtc.clear_has_been_stopped_flag().map_err(bus_error)?;
        }
        Ok(())
    }

    fn now(&mut self) -> Result<NaiveDateTime, RtcError> {
        self.rtc.datetime().map_err(bus_error)
    }

    fn temperature(&mut self) -> Result<f32, RtcError> {
        self.rtc.temperature().map_err(bus_error)
    }

    fn set_alarm(&mut self, slot: AlarmSlot, at: NaiveDateTime, rule: MatchRule) -> Result<(), RtcError> {
        debug!("DS3231 {} at {} matching {}", slot, Debug2Format(&at), rule);
        match slot {
            AlarmSlot::One => self.rtc.set_alarm1_hms(at.time()),
            AlarmSlot::Two => self.rtc.set_alarm2_hm(at.time()),
        }
        .map_err(bus_error)
    }

    fn alarm_flags(&mut self) -> Result<AlarmFlags, RtcError> {
        Ok(AlarmFlags {
            alarm1: self.rtc.has_alarm1_matched().map_err(bus_error)?,
            alarm2: self.rtc.has_alarm2_matched().map_err(bus_error)?,
        })
    }

    fn interrupt_enables(&mut self) -> Result<AlarmFlags, RtcError> {
        Ok(self.enables)
    }

    fn clear_alarm_flags(&mut self, flags: AlarmFlags) -> Result<(), RtcError> {
        if flags.alarm1 {
            self.rtc.clear_alarm1_matched_flag().map_err(bus_error)?;
        }
        if flags.alarm2 {
            self.rtc.clear_alarm2_matched_flag().map_err(bus_error)?;
        }
        Ok(())
    }

    fn set_interrupt_enabled(&mut self, slot: AlarmSlot, enabled: bool) -> Result<(), RtcError> {
        match (slot, enabled) {
            (AlarmSlot::One, true) => self.rtc.enable_alarm1_interrupts(),
            (AlarmSlot::One, false) => self.rtc.disable_alarm1_interrupts(),
            (AlarmSlot::Two, true) => self.rtc.enable_alarm2_interrupts(),
            (AlarmSlot::Two, false) => self.rtc.disable_alarm2_interrupts(),
        }
        .map_err(bus_error)?;
        self.enables.set(slot, enabled);
        Ok(())
    }
}

/// Raise the event every time the INT line goes low, and again every [`LINE_RECHECK`] while it stays low.
async fn watch_interrupt(mut pin: Input<'static>, event: &InterruptEvent) -> ! {
    loop {
        pin.wait_for_low().await;
        debug!("RTC interrupt line asserted");
        event.raise();
        while with_timeout(LINE_RECHECK, pin.wait_for_high()).await.is_err() {
            warn!("RTC interrupt line still asserted");
            event.raise();
        }
    }
}

/// This task owns the RTC. It runs on the interrupt executor so alarm handling is not held up by the network.
#[embassy_executor::task]
pub async fn clock_task(
    r: RtcResources,
    watering: Endpoint<'static, Message>,
    web: Endpoint<'static, Message>,
    event: &'static InterruptEvent,
    wall_clock: &'static WallClock,
) {
    info!("clock task started");
    let bus = I2c::new_blocking(r.i2c, r.scl, r.sda, i2c::Config::default());
    let int_pin = Input::new(r.int_pin, Pull::Up);

    let service = ClockService::new(
        Ds3231::new(bus),
        watering,
        web,
        event,
        wall_clock,
        ClockConfig::default(),
    );
    join(watch_interrupt(int_pin, event), service.run()).await;
}
