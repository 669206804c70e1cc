//! # Watering service
//! The irrigation orchestrator. Once a day the clock service reports `Alarm1Expired` and the service walks through
//! the enabled sections in order. For every section it asks the moisture service first: a section that is wet
//! enough (or whose probe cannot be trusted) is skipped, otherwise its valve opens and alarm slot 2 is armed for the
//! end of the section's duration. After the last section the daily alarm is armed again.
//!
//! Only one valve is ever open. The cycle state lives here and nowhere else.

mod config;

pub use config::{
    ConfigError, MAX_DURATION_SECONDS, MAX_SECTIONS, MIN_DURATION_SECONDS, Section, SectionTable, WateringConfig,
    WateringStrategy, error_json,
};

use core::fmt::Write;

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use embassy_time::{Duration, Instant, Timer};

use crate::channel::Endpoint;
use crate::fmt::{Debug2Format, debug, info, warn};
use crate::message::{Message, SectionUpdate, Text};
use crate::utility::string_utils::StringUtils;
use crate::wait_set::{Timeout, WaitSet, Wake};
use crate::wall_clock::TimeSource;

/// How long each valve is opened by the start-up self test.
const SELF_TEST_PULSE: Duration = Duration::from_millis(300);

/// Retry interval for arming the daily alarm while the wall clock is not known yet.
const DAILY_ALARM_RETRY: Duration = Duration::from_secs(1);

/// The valve outputs, one per section.
pub trait Valves {
    /// Number of valves.
    fn count(&self) -> usize;
    /// Open or close one valve. Unknown indices are ignored.
    fn set(&mut self, valve: usize, open: bool);
    /// Close every valve.
    fn close_all(&mut self) {
        for valve in 0..self.count() {
            self.set(valve, false);
        }
    }
}

/// Progress through the daily cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleState {
    /// Section being processed, `None` while no cycle runs
    pub current: Option<usize>,
    /// The current section's valve is open
    pub in_progress: bool,
}

/// Members of the watering service's wait set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WateringSource {
    /// Message from the clock service
    Clock,
    /// Message from the moisture service
    Moisture,
    /// Message from the web server
    Web,
}

/// The watering service and everything it owns.
pub struct WateringService<'a, V: Valves, T: TimeSource> {
    /// Valve outputs
    valves: V,
    /// Calendar time
    time: T,
    /// Channel to the clock service
    clock: Endpoint<'a, Message>,
    /// Channel to the moisture service
    moisture: Endpoint<'a, Message>,
    /// Channel to the web server
    web: Endpoint<'a, Message>,
    /// Clock, moisture and web channels
    wait_set: WaitSet<'a, WateringSource>,
    /// Live section configuration
    sections: SectionTable,
    /// Time of day of the daily start
    start_time: NaiveTime,
    /// How a section's watering ends
    strategy: WateringStrategy,
    /// Progress through the cycle
    cycle: CycleState,
    /// When to re-read the moisture of the section being watered
    recheck_at: Option<Instant>,
    /// The daily alarm still has to be armed
    daily_alarm_pending: bool,
    /// Service start, for the uptime
    started_at: Instant,
}

impl<'a, V: Valves, T: TimeSource> WateringService<'a, V, T> {
    /// Create the service. All valves are closed right away.
    ///
    /// # Panics
    /// If one of the endpoints is not connected.
    pub fn new(
        mut valves: V,
        time: T,
        clock: Endpoint<'a, Message>,
        moisture: Endpoint<'a, Message>,
        web: Endpoint<'a, Message>,
        config: WateringConfig,
    ) -> Self {
        valves.close_all();
        let mut wait_set = WaitSet::new();
        wait_set.register_endpoint(WateringSource::Clock, &clock);
        wait_set.register_endpoint(WateringSource::Moisture, &moisture);
        wait_set.register_endpoint(WateringSource::Web, &web);
        Self {
            valves,
            time,
            clock,
            moisture,
            web,
            wait_set,
            sections: SectionTable::new(config.sections),
            start_time: config.start_time,
            strategy: config.strategy,
            cycle: CycleState::default(),
            recheck_at: None,
            daily_alarm_pending: false,
            started_at: Instant::now(),
        }
    }

    /// Current cycle state.
    pub const fn cycle(&self) -> CycleState {
        self.cycle
    }

    /// The live section table.
    pub const fn sections(&self) -> &SectionTable {
        &self.sections
    }

    /// The valve outputs.
    pub const fn valves(&self) -> &V {
        &self.valves
    }

    /// Run the service forever.
    pub async fn run(mut self) -> ! {
        info!("watering service starting");
        self.self_test().await;
        self.start();
        loop {
            self.run_once().await;
        }
    }

    /// Open each valve briefly, one after the other.
    pub async fn self_test(&mut self) {
        info!("valve self test");
        for valve in 0..self.valves.count() {
            self.valves.set(valve, true);
            Timer::after(SELF_TEST_PULSE).await;
            self.valves.set(valve, false);
        }
    }

    /// Arm the daily start alarm.
    pub fn start(&mut self) {
        self.arm_daily_alarm();
    }

    /// Wait for one event and handle it.
    pub async fn run_once(&mut self) {
        let timeout = self.next_timeout();
        match self.wait_set.wait_any(timeout).await {
            Wake::TimedOut => self.handle_timeout(),
            Wake::Ready(source) => {
                let endpoint = self.endpoint(source);
                if let Some(message) = endpoint.try_receive() {
                    self.handle_message(source, message);
                }
            }
        }
    }

    /// The endpoint behind a wait set member.
    const fn endpoint(&self, source: WateringSource) -> &Endpoint<'a, Message> {
        match source {
            WateringSource::Clock => &self.clock,
            WateringSource::Moisture => &self.moisture,
            WateringSource::Web => &self.web,
        }
    }

    /// Block until a message arrives, unless a daily alarm retry or a moisture re-check is due first.
    fn next_timeout(&self) -> Timeout {
        let recheck = self
            .recheck_at
            .map(|at| at.saturating_duration_since(Instant::now()));
        let retry = self.daily_alarm_pending.then_some(DAILY_ALARM_RETRY);
        match (recheck, retry) {
            (Some(a), Some(b)) => Timeout::After(a.min(b)),
            (Some(d), None) | (None, Some(d)) => Timeout::After(d),
            (None, None) => Timeout::Forever,
        }
    }

    /// Retry the daily alarm or re-read the moisture, whichever is due.
    fn handle_timeout(&mut self) {
        if self.daily_alarm_pending {
            self.arm_daily_alarm();
        }
        if self.recheck_at.is_some_and(|at| at <= Instant::now()) {
            self.recheck_at = None;
            if let (Some(index), true) = (self.cycle.current, self.cycle.in_progress) {
                debug!("re-checking moisture of section {}", index);
                self.request_moisture(index);
            }
        }
    }

    /// React to one message.
    fn handle_message(&mut self, from: WateringSource, message: Message) {
        debug!("watering service received {} from {:?}", message.name(), from);
        match message {
            Message::Alarm1Expired => self.start_cycle(),
            Message::Alarm2Expired => self.section_time_elapsed(),
            Message::MoistureResponse(index, moisture) => self.handle_moisture(index, moisture),
            Message::StatusRequest => {
                let status = self.status();
                self.reply(from, Message::StatusResponse(status));
            }
            Message::GetConfigRequest => {
                let json = self
                    .sections
                    .to_json()
                    .unwrap_or_else(|e| error_json(e, ""));
                self.reply(from, Message::ConfigResponse(json));
            }
            Message::SetConfigRequest(update) => {
                let response = self.update_config(&update);
                self.reply(from, Message::ConfigResponse(response));
            }
            other => warn!("watering service ignores {}", other.name()),
        }
    }

    /// Begin the daily cycle at the first enabled section.
    fn start_cycle(&mut self) {
        if self.cycle.current.is_some() {
            warn!("daily alarm while a cycle is running, restarting the cycle");
        }
        info!("watering cycle started");
        self.valves.close_all();
        self.cycle.in_progress = false;
        self.recheck_at = None;
        self.cycle.current = self.sections.next_enabled(None);
        match self.cycle.current {
            Some(index) => self.request_moisture(index),
            None => {
                info!("no section enabled");
                self.finish_cycle();
            }
        }
    }

    /// Slot 2 fired: the section being watered is done.
    fn section_time_elapsed(&mut self) {
        let (Some(index), true) = (self.cycle.current, self.cycle.in_progress) else {
            warn!("section alarm while no section is being watered");
            return;
        };
        info!("time elapsed for section {}", index);
        self.next_section();
    }

    /// A moisture reading arrived.
    fn handle_moisture(&mut self, index: usize, moisture: f32) {
        if self.cycle.current != Some(index) {
            debug!("stale moisture reading for section {}", index);
            return;
        }
        let Some(section) = self.sections.get(index) else {
            return;
        };
        info!("section {} moisture {}", index, moisture);

        if section.is_satisfied_by(moisture) {
            info!("section {} is wet enough", index);
            self.next_section();
            return;
        }

        if !self.cycle.in_progress {
            let valve = section.valve;
            let duration = section.duration();
            let Some(until) = self.deadline(duration) else {
                warn!("time unknown, skipping section {}", index);
                self.next_section();
                return;
            };
            info!("watering section {} until {:?}", index, Debug2Format(&until));
            self.valves.set(valve, true);
            self.send_to_clock(Message::SetAlarm2(until));
            self.cycle.in_progress = true;
        }

        if let WateringStrategy::MoistureConfirmed { recheck } = self.strategy {
            self.recheck_at = Some(Instant::now() + recheck);
        }
    }

    /// Calendar time `duration` from now.
    fn deadline(&self, duration: Duration) -> Option<NaiveDateTime> {
        let now = self.time.now()?;
        let millis = i64::try_from(duration.as_millis()).ok()?;
        now.checked_add_signed(TimeDelta::try_milliseconds(millis)?)
    }

    /// Close the valve, release slot 2 and move on to the next enabled section or finish the cycle.
    fn next_section(&mut self) {
        self.recheck_at = None;
        self.valves.close_all();
        self.cycle.in_progress = false;

        self.cycle.current = self.sections.next_enabled(self.cycle.current);
        match self.cycle.current {
            Some(index) => {
                info!("switching to section {}", index);
                self.send_to_clock(Message::ClearAlarm2);
                self.request_moisture(index);
            }
            None => self.finish_cycle(),
        }
    }

    /// Everything off, release slot 2 and arm tomorrow's start.
    fn finish_cycle(&mut self) {
        info!("watering cycle finished");
        self.valves.close_all();
        self.cycle = CycleState::default();
        self.recheck_at = None;
        self.send_to_clock(Message::ClearAlarm2);
        self.arm_daily_alarm();
    }

    /// Arm slot 1 for the next occurrence of the start time. Retried while the time is unknown.
    fn arm_daily_alarm(&mut self) {
        let Some(now) = self.time.now() else {
            if !self.daily_alarm_pending {
                warn!("time unknown, daily alarm deferred");
            }
            self.daily_alarm_pending = true;
            return;
        };
        self.daily_alarm_pending = false;
        let next = next_occurrence(now, self.start_time);
        info!("next watering cycle at {:?}", Debug2Format(&next));
        self.send_to_clock(Message::SetAlarm1(next));
    }

    /// Ask the moisture service about a section.
    fn request_moisture(&self, index: usize) {
        if self.moisture.send(Message::MoistureRequest(index)).is_err() {
            warn!("moisture queue full, dropping request for section {}", index);
        }
    }

    /// Send a request to the clock service.
    fn send_to_clock(&self, message: Message) {
        if let Err(e) = self.clock.send(message) {
            warn!("clock queue full, dropping {}", e.into_inner().name());
        }
    }

    /// Answer on the channel the request came in on.
    fn reply(&self, to: WateringSource, message: Message) {
        if let Err(e) = self.endpoint(to).send(message) {
            warn!("failed to reply {} to {:?}", e.into_inner().name(), to);
        }
    }

    /// Apply a configuration update. Answers the new configuration, or an error body.
    fn update_config(&mut self, update: &SectionUpdate) -> Text {
        match self.sections.apply(update) {
            Ok(section) => {
                info!(
                    "section {} updated: enabled {}, {} s, threshold {}",
                    section.name.as_str(),
                    section.enabled,
                    section.duration_seconds,
                    section.wet_threshold
                );
                self.sections
                    .to_json()
                    .unwrap_or_else(|e| error_json(e, ""))
            }
            Err(e) => {
                warn!("configuration rejected: {}", e.as_str());
                let detail = match e {
                    ConfigError::UnknownSection => update.section_name.as_str(),
                    _ => "",
                };
                error_json(e, detail)
            }
        }
    }

    /// Status text: cycle progress, uptime, enabled sections.
    fn status(&self) -> Text {
        let mut text = Text::new();
        let _ = write!(text, "Watering: ");
        match self.cycle.current.and_then(|i| Some((i, self.sections.get(i)?))) {
            Some((index, section)) if self.cycle.in_progress => {
                let _ = write!(text, "watering section {} ({})", index, section.name);
            }
            Some((index, section)) => {
                let _ = write!(text, "checking section {} ({})", index, section.name);
            }
            None => {
                let _ = write!(text, "idle");
            }
        }
        let _ = write!(
            text,
            ", {} of {} sections enabled, starts daily at {}, uptime {}",
            self.sections.enabled_count(),
            self.sections.len(),
            self.start_time,
            StringUtils::convert_uptime_to_str(self.started_at.elapsed())
        );
        // no heap on the device, the bounded queues are the only memory that fills up
        let _ = write!(
            text,
            ", queued clock/moisture/web {}/{}/{}",
            self.clock.pending(),
            self.moisture.pending(),
            self.web.pending()
        );
        if self.daily_alarm_pending {
            let _ = write!(text, ", daily alarm not armed yet");
        }
        let _ = writeln!(text);
        text
    }
}

/// The first time at `start` strictly after `now`.
pub fn next_occurrence(now: NaiveDateTime, start: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(start);
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::message::SectionName;
    use chrono::NaiveDate;
    use embassy_futures::block_on;

    struct FakeValves {
        open: [bool; 4],
        history: std::vec::Vec<(usize, bool)>,
    }

    impl FakeValves {
        fn new() -> Self {
            Self {
                open: [false; 4],
                history: std::vec::Vec::new(),
            }
        }
    }

    impl Valves for FakeValves {
        fn count(&self) -> usize {
            self.open.len()
        }
        fn set(&mut self, valve: usize, open: bool) {
            if let Some(v) = self.open.get_mut(valve) {
                *v = open;
                self.history.push((valve, open));
            }
        }
    }

    struct FixedTime(Option<NaiveDateTime>);

    impl TimeSource for FixedTime {
        fn now(&self) -> Option<NaiveDateTime> {
            self.0
        }
    }

    fn ten_am() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn config(enabled: [bool; 4], strategy: WateringStrategy) -> WateringConfig {
        let mut config = WateringConfig::new(NaiveTime::from_hms_opt(6, 0, 0).unwrap(), strategy);
        for (index, on) in enabled.into_iter().enumerate() {
            let names = ["Section 1", "Section 2", "Section 3", "Section 4"];
            let section = Section::new(names[index], index, Some(index))
                .unwrap()
                .with_duration(60)
                .with_threshold(0.6);
            config
                .add_section(if on { section } else { section.disabled() })
                .unwrap();
        }
        config
    }

    struct Rig {
        clock: Channel<Message>,
        moisture: Channel<Message>,
        web: Channel<Message>,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                clock: Channel::new(),
                moisture: Channel::new(),
                web: Channel::new(),
            }
        }
    }

    fn drain(endpoint: &Endpoint<'_, Message>) -> std::vec::Vec<Message> {
        std::iter::from_fn(|| endpoint.try_receive()).collect()
    }

    macro_rules! service {
        ($rig:expr, $config:expr, $time:expr) => {
            WateringService::new(
                FakeValves::new(),
                FixedTime($time),
                $rig.clock.open(),
                $rig.moisture.open(),
                $rig.web.open(),
                $config,
            )
        };
    }

    #[test]
    fn start_arms_the_next_daily_alarm() {
        let rig = Rig::new();
        let clock = rig.clock.connect();
        let _moisture = rig.moisture.connect();
        let _web = rig.web.connect();
        let mut service = service!(rig, config([true; 4], WateringStrategy::FixedDuration), Some(ten_am()));

        service.start();
        let tomorrow_six = NaiveDate::from_ymd_opt(2024, 6, 2)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        assert_eq!(drain(&clock), [Message::SetAlarm1(tomorrow_six)]);
    }

    #[test]
    fn next_occurrence_is_today_while_the_start_is_ahead() {
        let five_am = ten_am() - TimeDelta::hours(5);
        let six = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        assert_eq!(next_occurrence(five_am, six), five_am + TimeDelta::hours(1));
        assert_eq!(next_occurrence(five_am + TimeDelta::hours(1), six), five_am + TimeDelta::hours(25));
    }

    #[test]
    fn daily_alarm_waits_for_the_time() {
        let rig = Rig::new();
        let clock = rig.clock.connect();
        let _moisture = rig.moisture.connect();
        let _web = rig.web.connect();
        let mut service = service!(rig, config([true; 4], WateringStrategy::FixedDuration), None);

        service.start();
        assert!(drain(&clock).is_empty());
        assert_eq!(service.next_timeout(), Timeout::After(DAILY_ALARM_RETRY));

        service.time = FixedTime(Some(ten_am()));
        block_on(service.run_once());
        assert!(matches!(drain(&clock).as_slice(), [Message::SetAlarm1(_)]));
        assert_eq!(service.next_timeout(), Timeout::Forever);
    }

    #[test]
    fn wet_section_is_skipped_without_opening_a_valve() {
        let rig = Rig::new();
        let clock = rig.clock.connect();
        let moisture = rig.moisture.connect();
        let _web = rig.web.connect();
        let mut service = service!(rig, config([true; 4], WateringStrategy::FixedDuration), Some(ten_am()));

        clock.send(Message::Alarm1Expired).unwrap();
        block_on(service.run_once());
        assert_eq!(drain(&moisture), [Message::MoistureRequest(0)]);

        moisture.send(Message::MoistureResponse(0, 0.95)).unwrap();
        block_on(service.run_once());

        assert_eq!(drain(&moisture), [Message::MoistureRequest(1)]);
        assert_eq!(drain(&clock), [Message::ClearAlarm2]);
        assert!(service.valves().history.iter().all(|&(_, open)| !open));
        assert_eq!(
            service.cycle(),
            CycleState {
                current: Some(1),
                in_progress: false
            }
        );
    }

    #[test]
    fn nan_reading_behaves_like_a_wet_section() {
        let rig = Rig::new();
        let clock = rig.clock.connect();
        let moisture = rig.moisture.connect();
        let _web = rig.web.connect();
        let mut service = service!(rig, config([true; 4], WateringStrategy::FixedDuration), Some(ten_am()));

        clock.send(Message::Alarm1Expired).unwrap();
        block_on(service.run_once());
        drain(&moisture);

        moisture.send(Message::MoistureResponse(0, f32::NAN)).unwrap();
        block_on(service.run_once());

        assert_eq!(drain(&moisture), [Message::MoistureRequest(1)]);
        assert_eq!(drain(&clock), [Message::ClearAlarm2]);
        assert!(service.valves().history.iter().all(|&(_, open)| !open));
    }

    #[test]
    fn dry_section_opens_its_valve_until_slot_two_fires() {
        let rig = Rig::new();
        let clock = rig.clock.connect();
        let moisture = rig.moisture.connect();
        let _web = rig.web.connect();
        let mut service = service!(rig, config([true, true, false, false], WateringStrategy::FixedDuration), Some(ten_am()));

        clock.send(Message::Alarm1Expired).unwrap();
        block_on(service.run_once());
        drain(&moisture);
        moisture.send(Message::MoistureResponse(0, 0.2)).unwrap();
        block_on(service.run_once());

        assert!(service.valves().open[0]);
        assert_eq!(drain(&clock), [Message::SetAlarm2(ten_am() + TimeDelta::seconds(60))]);
        assert!(service.cycle().in_progress);
        assert_eq!(service.next_timeout(), Timeout::Forever);

        clock.send(Message::Alarm2Expired).unwrap();
        block_on(service.run_once());
        assert!(!service.valves().open[0]);
        assert_eq!(drain(&moisture), [Message::MoistureRequest(1)]);
        assert_eq!(drain(&clock), [Message::ClearAlarm2]);
    }

    #[test]
    fn stale_reading_is_ignored() {
        let rig = Rig::new();
        let clock = rig.clock.connect();
        let moisture = rig.moisture.connect();
        let _web = rig.web.connect();
        let mut service = service!(rig, config([true; 4], WateringStrategy::FixedDuration), Some(ten_am()));

        clock.send(Message::Alarm1Expired).unwrap();
        block_on(service.run_once());
        drain(&moisture);

        moisture.send(Message::MoistureResponse(2, 0.1)).unwrap();
        block_on(service.run_once());

        assert!(drain(&clock).is_empty());
        assert!(service.valves().history.iter().all(|&(_, open)| !open));
        assert_eq!(service.cycle().current, Some(0));
    }

    #[test]
    fn slot_two_without_watering_is_ignored() {
        let rig = Rig::new();
        let clock = rig.clock.connect();
        let moisture = rig.moisture.connect();
        let _web = rig.web.connect();
        let mut service = service!(rig, config([true; 4], WateringStrategy::FixedDuration), Some(ten_am()));

        clock.send(Message::Alarm2Expired).unwrap();
        block_on(service.run_once());

        assert!(drain(&clock).is_empty());
        assert!(drain(&moisture).is_empty());
        assert_eq!(service.cycle(), CycleState::default());
    }

    #[test]
    fn moisture_confirmed_strategy_stops_early() {
        let rig = Rig::new();
        let clock = rig.clock.connect();
        let moisture = rig.moisture.connect();
        let _web = rig.web.connect();
        let strategy = WateringStrategy::MoistureConfirmed {
            recheck: Duration::from_millis(20),
        };
        let mut service = service!(rig, config([true, false, false, false], strategy), Some(ten_am()));

        clock.send(Message::Alarm1Expired).unwrap();
        block_on(service.run_once());
        drain(&moisture);
        moisture.send(Message::MoistureResponse(0, 0.2)).unwrap();
        block_on(service.run_once());
        assert!(service.valves().open[0]);
        drain(&clock);
        assert!(matches!(service.next_timeout(), Timeout::After(_)));

        // the re-check deadline passes without any message
        block_on(service.run_once());
        assert_eq!(drain(&moisture), [Message::MoistureRequest(0)]);

        // still dry: keep watering, do not re-arm slot 2
        moisture.send(Message::MoistureResponse(0, 0.4)).unwrap();
        block_on(service.run_once());
        assert!(service.valves().open[0]);
        assert!(drain(&clock).is_empty());

        block_on(service.run_once());
        assert_eq!(drain(&moisture), [Message::MoistureRequest(0)]);
        moisture.send(Message::MoistureResponse(0, 0.7)).unwrap();
        block_on(service.run_once());

        assert!(!service.valves().open[0]);
        assert!(matches!(
            drain(&clock).as_slice(),
            [Message::ClearAlarm2, Message::SetAlarm1(_)]
        ));
        assert_eq!(service.next_timeout(), Timeout::Forever);
    }

    #[test]
    fn cycle_without_enabled_sections_rearms_the_daily_alarm() {
        let rig = Rig::new();
        let clock = rig.clock.connect();
        let moisture = rig.moisture.connect();
        let _web = rig.web.connect();
        let mut service = service!(rig, config([false; 4], WateringStrategy::FixedDuration), Some(ten_am()));

        clock.send(Message::Alarm1Expired).unwrap();
        block_on(service.run_once());

        assert!(drain(&moisture).is_empty());
        assert!(matches!(
            drain(&clock).as_slice(),
            [Message::ClearAlarm2, Message::SetAlarm1(_)]
        ));
    }

    #[test]
    fn config_update_for_unknown_section_is_rejected() {
        let rig = Rig::new();
        let _clock = rig.clock.connect();
        let _moisture = rig.moisture.connect();
        let web = rig.web.connect();
        let mut service = service!(rig, config([true; 4], WateringStrategy::FixedDuration), Some(ten_am()));
        let before = service.sections().clone();

        web.send(Message::SetConfigRequest(SectionUpdate {
            section_name: SectionName::try_from("Nonexistent").unwrap(),
            enabled: true,
            duration_seconds: 60,
            wet_threshold: 0.5,
        }))
        .unwrap();
        block_on(service.run_once());

        let Some(Message::ConfigResponse(text)) = web.try_receive() else {
            panic!("expected a config response");
        };
        assert!(text.starts_with(r#"{"error":"unknown section"#));
        assert_eq!(service.sections(), &before);
    }

    #[test]
    fn config_update_is_applied_and_echoed() {
        let rig = Rig::new();
        let _clock = rig.clock.connect();
        let _moisture = rig.moisture.connect();
        let web = rig.web.connect();
        let mut service = service!(rig, config([true; 4], WateringStrategy::FixedDuration), Some(ten_am()));

        web.send(Message::SetConfigRequest(SectionUpdate {
            section_name: SectionName::try_from("Section 3").unwrap(),
            enabled: false,
            duration_seconds: 300,
            wet_threshold: -0.5,
        }))
        .unwrap();
        block_on(service.run_once());

        let section = service.sections().get(2).unwrap();
        assert!(!section.enabled);
        assert_eq!(section.duration_seconds, 300);
        assert!(section.wet_threshold.abs() < f32::EPSILON);

        let Some(Message::ConfigResponse(text)) = web.try_receive() else {
            panic!("expected a config response");
        };
        assert!(text.starts_with('['));
        assert!(text.contains(r#"{"section_name":"Section 3","enabled":false,"duration_seconds":300"#));
    }

    #[test]
    fn status_reports_the_cycle() {
        let rig = Rig::new();
        let clock = rig.clock.connect();
        let moisture = rig.moisture.connect();
        let web = rig.web.connect();
        let mut service = service!(rig, config([true; 4], WateringStrategy::FixedDuration), Some(ten_am()));

        web.send(Message::StatusRequest).unwrap();
        block_on(service.run_once());
        let Some(Message::StatusResponse(idle)) = web.try_receive() else {
            panic!("expected a status response");
        };
        assert!(idle.starts_with("Watering: idle, 4 of 4 sections enabled"));

        clock.send(Message::Alarm1Expired).unwrap();
        block_on(service.run_once());
        moisture.send(Message::MoistureResponse(0, 0.1)).unwrap();
        block_on(service.run_once());
        web.send(Message::StatusRequest).unwrap();
        block_on(service.run_once());
        let Some(Message::StatusResponse(busy)) = web.try_receive() else {
            panic!("expected a status response");
        };
        assert!(busy.starts_with("Watering: watering section 0 (Section 1)"));
    }

    #[test]
    fn self_test_pulses_every_valve_in_turn() {
        let rig = Rig::new();
        let _clock = rig.clock.connect();
        let _moisture = rig.moisture.connect();
        let _web = rig.web.connect();
        let mut service = service!(rig, config([true; 4], WateringStrategy::FixedDuration), Some(ten_am()));
        service.valves.history.clear();

        block_on(service.self_test());

        assert_eq!(
            service.valves().history,
            [
                (0, true),
                (0, false),
                (1, true),
                (1, false),
                (2, true),
                (2, false),
                (3, true),
                (3, false)
            ]
        );
    }
}
