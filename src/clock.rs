//! # Clock service
//! The alarm scheduler. It owns the RTC with its two alarm slots, serves alarm set/clear/status requests from the
//! watering service and the web server, and turns the RTC's interrupt into `Alarm1Expired` / `Alarm2Expired` events.
//!
//! The service never touches the device from interrupt context: the pin watcher only raises the [`InterruptEvent`],
//! the flags are read and cleared here, in the task. If the device cannot be initialized the service goes degraded:
//! it keeps running and drops whatever it receives, so a missing RTC does not take the controller down with it.
//!
//! The INT line stays asserted until the flags are cleared, so an interrupt is only done once the clear went through.
//! A failed read or clear is retried every `alarm_retry`. The periodic resync also looks at the flags, which catches
//! an alarm whose edge never made it to the event.

use core::fmt::{Debug, Write};

use chrono::{NaiveDateTime, TimeDelta, Timelike};
use embassy_time::{Duration, Instant};

use crate::channel::Endpoint;
use crate::fmt::{Debug2Format, debug, error, info, warn};
use crate::interrupt::InterruptEvent;
use crate::message::{Message, Text};
use crate::utility::string_utils::StringUtils;
use crate::wait_set::{Timeout, WaitSet, Wake};
use crate::wall_clock::WallClock;

/// One of the two hardware alarm slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmSlot {
    /// Slot 1, matches down to the second. Used for the daily start.
    One,
    /// Slot 2, matches down to the minute. Used for the section duration.
    Two,
}

/// Which fields of the alarm time the device compares against the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MatchRule {
    /// Fire once a day when hours, minutes and seconds match
    HoursMinutesSeconds,
    /// Fire once a day when hours and minutes match
    HoursMinutes,
}

impl AlarmSlot {
    /// The match rule the service arms this slot with.
    pub const fn match_rule(self) -> MatchRule {
        match self {
            Self::One => MatchRule::HoursMinutesSeconds,
            Self::Two => MatchRule::HoursMinutes,
        }
    }

    /// The time the slot is actually armed for. Slot 2 has no seconds register, a time with seconds is rounded up to
    /// the next full minute so the alarm never fires early.
    pub fn arming_time(self, at: NaiveDateTime) -> NaiveDateTime {
        match self {
            Self::One => at,
            Self::Two if at.second() == 0 && at.nanosecond() == 0 => at,
            Self::Two => {
                let truncated = at
                    .with_second(0)
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(at);
                truncated + TimeDelta::minutes(1)
            }
        }
    }
}

/// One bit per alarm slot, used for the fired flags as well as the interrupt enables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlarmFlags {
    /// Slot 1
    pub alarm1: bool,
    /// Slot 2
    pub alarm2: bool,
}

impl AlarmFlags {
    /// No slot
    pub const NONE: Self = Self {
        alarm1: false,
        alarm2: false,
    };
    /// Both slots
    pub const BOTH: Self = Self {
        alarm1: true,
        alarm2: true,
    };

    /// Only the given slot.
    pub const fn only(slot: AlarmSlot) -> Self {
        match slot {
            AlarmSlot::One => Self {
                alarm1: true,
                alarm2: false,
            },
            AlarmSlot::Two => Self {
                alarm1: false,
                alarm2: true,
            },
        }
    }

    /// The bit of the given slot.
    pub const fn get(self, slot: AlarmSlot) -> bool {
        match slot {
            AlarmSlot::One => self.alarm1,
            AlarmSlot::Two => self.alarm2,
        }
    }

    /// Set the bit of the given slot.
    pub const fn set(&mut self, slot: AlarmSlot, value: bool) {
        match slot {
            AlarmSlot::One => self.alarm1 = value,
            AlarmSlot::Two => self.alarm2 = value,
        }
    }
}

/// The RTC as the clock service sees it.
///
/// A fired flag is set by the device whenever its slot matches, no matter if the slot's interrupt is enabled. The
/// interrupt line stays asserted until every fired flag with an enabled interrupt has been cleared.
pub trait ClockDevice {
    /// Device error
    type Error: Debug;

    /// Bring the device into a known state.
    fn init(&mut self) -> Result<(), Self::Error>;
    /// Current date and time.
    fn now(&mut self) -> Result<NaiveDateTime, Self::Error>;
    /// Die temperature in °C.
    fn temperature(&mut self) -> Result<f32, Self::Error>;
    /// Program the time of an alarm slot. Does not change the slot's interrupt enable.
    fn set_alarm(&mut self, slot: AlarmSlot, at: NaiveDateTime, rule: MatchRule) -> Result<(), Self::Error>;
    /// The fired flags of both slots.
    fn alarm_flags(&mut self) -> Result<AlarmFlags, Self::Error>;
    /// The interrupt enables of both slots.
    fn interrupt_enables(&mut self) -> Result<AlarmFlags, Self::Error>;
    /// Clear the fired flags that are set in `flags`.
    fn clear_alarm_flags(&mut self, flags: AlarmFlags) -> Result<(), Self::Error>;
    /// Enable or disable the interrupt of one slot.
    fn set_interrupt_enabled(&mut self, slot: AlarmSlot, enabled: bool) -> Result<(), Self::Error>;
}

/// Tunables of the clock service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockConfig {
    /// How often the RTC is re-read into the wall clock and its alarm flags are checked
    pub resync_period: Duration,
    /// Pause before an interrupt whose flags could not be read or cleared is handled again
    pub alarm_retry: Duration,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            resync_period: Duration::from_secs(5 * 60),
            alarm_retry: Duration::from_secs(1),
        }
    }
}

/// Lifecycle of the clock service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockState {
    /// `start` has not run yet
    Uninitialized,
    /// The device is up
    Operational,
    /// The device failed to initialize, requests are dropped
    Degraded,
}

/// Members of the clock service's wait set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSource {
    /// The RTC interrupt line was asserted
    Interrupt,
    /// Message from the watering service
    Watering,
    /// Message from the web server
    Web,
}

/// The clock service and everything it owns.
pub struct ClockService<'a, D: ClockDevice> {
    /// The RTC
    device: D,
    /// Channel to the watering service
    watering: Endpoint<'a, Message>,
    /// Channel to the web server
    web: Endpoint<'a, Message>,
    /// Shared calendar time, written only here
    wall_clock: &'a WallClock,
    /// Interrupt event, channels
    wait_set: WaitSet<'a, ClockSource>,
    /// Tunables
    config: ClockConfig,
    /// Lifecycle
    state: ClockState,
    /// Last time the wall clock was synced
    last_resync: Instant,
    /// The interrupt line is asserted and the flags are not cleared yet
    interrupt_pending: bool,
    /// Slots already reported for the pending interrupt
    reported: AlarmFlags,
}

impl<'a, D: ClockDevice> ClockService<'a, D> {
    /// Create the service. The device is not touched until [`Self::start`].
    ///
    /// # Panics
    /// If one of the endpoints is not connected.
    pub fn new(
        device: D,
        watering: Endpoint<'a, Message>,
        web: Endpoint<'a, Message>,
        interrupt: &'a InterruptEvent,
        wall_clock: &'a WallClock,
        config: ClockConfig,
    ) -> Self {
        let mut wait_set = WaitSet::new();
        wait_set.register(ClockSource::Interrupt, interrupt);
        wait_set.register_endpoint(ClockSource::Watering, &watering);
        wait_set.register_endpoint(ClockSource::Web, &web);
        Self {
            device,
            watering,
            web,
            wall_clock,
            wait_set,
            config,
            state: ClockState::Uninitialized,
            last_resync: Instant::now(),
            interrupt_pending: false,
            reported: AlarmFlags::NONE,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> ClockState {
        self.state
    }

    /// Access the device, mostly for inspection.
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Initialize the device, sync the wall clock and clear stale alarm flags. On failure the service goes degraded.
    pub fn start(&mut self) {
        info!("clock service starting");
        match self.try_start() {
            Ok(()) => {
                info!("clock service operational");
                self.state = ClockState::Operational;
            }
            Err(e) => {
                error!("clock service is not operational: {:?}", Debug2Format(&e));
                self.state = ClockState::Degraded;
            }
        }
    }

    /// Device bring-up, stops at the first failure.
    fn try_start(&mut self) -> Result<(), D::Error> {
        self.device.init()?;
        self.device.clear_alarm_flags(AlarmFlags::BOTH)?;
        let now = self.device.now()?;
        self.wall_clock.sync(now);
        self.last_resync = Instant::now();
        info!("wall clock set to {:?}", Debug2Format(&now));
        Ok(())
    }

    /// Run the service forever.
    pub async fn run(mut self) -> ! {
        self.start();
        loop {
            self.run_once().await;
        }
    }

    /// Wait for one event and handle it. An overdue resync runs afterwards, whatever the event was.
    pub async fn run_once(&mut self) {
        let timeout = self.next_timeout();
        let wake = self.wait_set.wait_any(Timeout::After(timeout)).await;
        match self.state {
            ClockState::Operational => {
                self.handle_wake(wake);
                if self.last_resync.elapsed() >= self.config.resync_period {
                    self.maintain();
                }
            }
            ClockState::Uninitialized | ClockState::Degraded => self.drop_wake(wake),
        }
    }

    /// Time until the next resync, or until the next attempt at a pending interrupt if that comes first.
    fn next_timeout(&self) -> Duration {
        if self.state != ClockState::Operational {
            return self.config.resync_period;
        }
        let resync = (self.last_resync + self.config.resync_period).saturating_duration_since(Instant::now());
        if self.interrupt_pending {
            resync.min(self.config.alarm_retry)
        } else {
            resync
        }
    }

    /// Consume whatever woke a service that cannot serve it.
    fn drop_wake(&self, wake: Wake<ClockSource>) {
        let dropped = match wake {
            Wake::Ready(ClockSource::Watering) => self.watering.drain(),
            Wake::Ready(ClockSource::Web) => self.web.drain(),
            Wake::Ready(ClockSource::Interrupt) | Wake::TimedOut => 0,
        };
        if dropped > 0 {
            debug!("clock service not operational, dropped {} messages", dropped);
        }
    }

    /// Dispatch one wake of an operational service.
    fn handle_wake(&mut self, wake: Wake<ClockSource>) {
        match wake {
            Wake::TimedOut => {
                if self.interrupt_pending {
                    self.service_interrupt();
                }
            }
            Wake::Ready(ClockSource::Interrupt) => {
                self.interrupt_pending = true;
                self.service_interrupt();
            }
            Wake::Ready(ClockSource::Watering) => {
                if let Some(message) = self.watering.try_receive() {
                    self.handle_message(ClockSource::Watering, message);
                }
            }
            Wake::Ready(ClockSource::Web) => {
                if let Some(message) = self.web.try_receive() {
                    self.handle_message(ClockSource::Web, message);
                }
            }
        }
    }

    /// Periodic upkeep: resync the wall clock and pick up an alarm that fired without waking the service.
    fn maintain(&mut self) {
        self.last_resync = Instant::now();
        self.resync();
        if !self.interrupt_pending && self.alarm_waiting() {
            warn!("alarm flag set but no interrupt seen");
            self.interrupt_pending = true;
            self.service_interrupt();
        }
    }

    /// A slot has fired with its interrupt enabled.
    fn alarm_waiting(&mut self) -> bool {
        match (self.device.alarm_flags(), self.device.interrupt_enables()) {
            (Ok(flags), Ok(enables)) => (flags.alarm1 && enables.alarm1) || (flags.alarm2 && enables.alarm2),
            (Err(e), _) | (_, Err(e)) => {
                debug!("alarm flag check skipped: {:?}", Debug2Format(&e));
                false
            }
        }
    }

    /// Push the RTC time into the wall clock.
    fn resync(&mut self) {
        match self.device.now() {
            Ok(now) => {
                self.wall_clock.sync(now);
                debug!("wall clock resynced to {:?}", Debug2Format(&now));
            }
            Err(e) => warn!("failed to read the clock for resync: {:?}", Debug2Format(&e)),
        }
    }

    /// Handle the pending interrupt. It stays pending, and is retried, until the flags have been cleared.
    fn service_interrupt(&mut self) {
        match self.try_service_interrupt() {
            Ok(()) => {
                self.interrupt_pending = false;
                self.reported = AlarmFlags::NONE;
            }
            Err(e) => error!(
                "alarm interrupt not handled, retrying in {} ms: {:?}",
                self.config.alarm_retry.as_millis(),
                Debug2Format(&e)
            ),
        }
    }

    /// Turn fired and enabled alarm slots into events for the watering service, then release the interrupt line.
    /// A slot is reported once per interrupt, even when the clear has to be retried.
    fn try_service_interrupt(&mut self) -> Result<(), D::Error> {
        let flags = self.device.alarm_flags()?;
        let enables = self.device.interrupt_enables()?;
        info!("alarm interrupt, fired {:?}, enabled {:?}", flags, enables);

        for (slot, event) in [
            (AlarmSlot::One, Message::Alarm1Expired),
            (AlarmSlot::Two, Message::Alarm2Expired),
        ] {
            if flags.get(slot) && enables.get(slot) && !self.reported.get(slot) {
                info!("{} fired", event.name());
                self.reported.set(slot, true);
                if let Err(e) = self.watering.send(event) {
                    warn!("failed to send {} to watering", e.into_inner().name());
                }
            }
        }

        // releases the interrupt line
        self.device.clear_alarm_flags(AlarmFlags::BOTH)
    }

    /// Serve one request.
    fn handle_message(&mut self, from: ClockSource, message: Message) {
        debug!("clock service received {} from {:?}", message.name(), from);
        match message {
            Message::SetAlarm1(at) => self.arm(AlarmSlot::One, at),
            Message::SetAlarm2(at) => self.arm(AlarmSlot::Two, at),
            Message::ClearAlarm1 => self.disarm(AlarmSlot::One),
            Message::ClearAlarm2 => self.disarm(AlarmSlot::Two),
            Message::StatusRequest => {
                let status = Message::StatusResponse(self.status());
                let endpoint = match from {
                    ClockSource::Web => &self.web,
                    ClockSource::Watering | ClockSource::Interrupt => &self.watering,
                };
                if endpoint.send(status).is_err() {
                    warn!("failed to send clock status to {:?}", from);
                }
            }
            other => warn!("clock service ignores {}", other.name()),
        }
    }

    /// Program a slot and enable its interrupt.
    fn arm(&mut self, slot: AlarmSlot, at: NaiveDateTime) {
        let at = slot.arming_time(at);
        let result = self
            .device
            .set_alarm(slot, at, slot.match_rule())
            // a stale flag would assert the line as soon as the interrupt is enabled
            .and_then(|()| self.device.clear_alarm_flags(AlarmFlags::only(slot)))
            .and_then(|()| self.device.set_interrupt_enabled(slot, true));
        match result {
            Ok(()) => {
                self.reported.set(slot, false);
                info!("alarm {:?} armed for {:?}", slot, Debug2Format(&at));
            }
            Err(e) => error!("failed to arm alarm {:?}: {:?}", slot, Debug2Format(&e)),
        }
    }

    /// Disable the interrupt of a slot, its time stays programmed.
    fn disarm(&mut self, slot: AlarmSlot) {
        match self.device.set_interrupt_enabled(slot, false) {
            Ok(()) => info!("alarm {:?} disarmed", slot),
            Err(e) => error!("failed to disarm alarm {:?}: {:?}", slot, Debug2Format(&e)),
        }
    }

    /// Status text: time, temperature, fired and enabled bits of both slots.
    fn status(&mut self) -> Text {
        let mut text = Text::new();
        let _ = write!(text, "Clock: ");
        match self.device.now() {
            Ok(now) => {
                let _ = write!(text, "{}", StringUtils::convert_datetime_to_str(now));
            }
            Err(_) => {
                let _ = write!(text, "time unavailable");
            }
        }
        match self.device.temperature() {
            Ok(celsius) => {
                let _ = write!(text, ", {celsius:.2} C");
            }
            Err(_) => {
                let _ = write!(text, ", temperature unavailable");
            }
        }
        if let (Ok(flags), Ok(enables)) = (self.device.alarm_flags(), self.device.interrupt_enables()) {
            let _ = write!(
                text,
                ", alarm1 fired={} enabled={}, alarm2 fired={} enabled={}",
                flags.alarm1, enables.alarm1, flags.alarm2, enables.alarm2
            );
        }
        let _ = writeln!(text);
        text
    }
}
