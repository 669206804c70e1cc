//! Full watering cycles driven through the channels, the way the firmware wires the services.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use embassy_futures::block_on;
use embassy_time::Duration;
use water_my_garden::channel::{Channel, Endpoint};
use water_my_garden::clock::{AlarmFlags, AlarmSlot, ClockConfig, ClockDevice, ClockService, MatchRule};
use water_my_garden::interrupt::InterruptEvent;
use water_my_garden::message::Message;
use water_my_garden::wall_clock::{TimeSource, WallClock};
use water_my_garden::watering::{Section, Valves, WateringConfig, WateringService, WateringStrategy};

#[derive(Default)]
struct RecordingValves {
    open: [bool; 4],
}

impl Valves for RecordingValves {
    fn count(&self) -> usize {
        self.open.len()
    }

    fn set(&mut self, valve: usize, open: bool) {
        if let Some(v) = self.open.get_mut(valve) {
            *v = open;
        }
    }
}

struct FixedTime(NaiveDateTime);

impl TimeSource for FixedTime {
    fn now(&self) -> Option<NaiveDateTime> {
        Some(self.0)
    }
}

fn ten_am() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
}

/// Four sections, only section 2 enabled, 60 s, threshold 0.6.
fn only_section_two() -> WateringConfig {
    let mut config = WateringConfig::new(
        NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        WateringStrategy::FixedDuration,
    );
    for (index, name) in ["Front", "Back", "Veggies", "Herbs"].into_iter().enumerate() {
        let section = Section::new(name, index, Some(index))
            .unwrap()
            .with_duration(60)
            .with_threshold(0.6);
        config
            .add_section(if index == 2 { section } else { section.disabled() })
            .unwrap();
    }
    config
}

fn drain(endpoint: &Endpoint<'_, Message>) -> Vec<Message> {
    std::iter::from_fn(|| endpoint.try_receive()).collect()
}

#[test]
fn single_enabled_section_is_watered_once_per_day() {
    let clock: Channel<Message> = Channel::new();
    let moisture: Channel<Message> = Channel::new();
    let web: Channel<Message> = Channel::new();
    let clock_peer = clock.connect();
    let moisture_peer = moisture.connect();
    let _web_peer = web.connect();

    let mut watering = WateringService::new(
        RecordingValves::default(),
        FixedTime(ten_am()),
        clock.open(),
        moisture.open(),
        web.open(),
        only_section_two(),
    );

    clock_peer.send(Message::Alarm1Expired).unwrap();
    block_on(watering.run_once());
    assert_eq!(drain(&moisture_peer), [Message::MoistureRequest(2)]);

    moisture_peer.send(Message::MoistureResponse(2, 0.3)).unwrap();
    block_on(watering.run_once());
    assert!(watering.valves().open[2]);
    assert_eq!(
        drain(&clock_peer),
        [Message::SetAlarm2(ten_am() + TimeDelta::seconds(60))]
    );

    clock_peer.send(Message::Alarm2Expired).unwrap();
    block_on(watering.run_once());
    assert!(!watering.valves().open[2]);
    let tomorrow_six = NaiveDate::from_ymd_opt(2024, 6, 2)
        .unwrap()
        .and_hms_opt(6, 0, 0)
        .unwrap();
    assert_eq!(
        drain(&clock_peer),
        [Message::ClearAlarm2, Message::SetAlarm1(tomorrow_six)]
    );
    assert!(drain(&moisture_peer).is_empty());
    assert_eq!(watering.cycle().current, None);
    assert!(!watering.cycle().in_progress);
}

/// Registers shared with the test so it can play the hardware.
#[derive(Default)]
struct RtcRegisters {
    fired: AlarmFlags,
    enabled: AlarmFlags,
    armed: Vec<(AlarmSlot, NaiveDateTime, MatchRule)>,
}

struct SharedRtc(Rc<RefCell<RtcRegisters>>);

impl ClockDevice for SharedRtc {
    type Error = ();

    fn init(&mut self) -> Result<(), ()> {
        Ok(())
    }
    fn now(&mut self) -> Result<NaiveDateTime, ()> {
        Ok(ten_am())
    }
    fn temperature(&mut self) -> Result<f32, ()> {
        Ok(20.0)
    }
    fn set_alarm(&mut self, slot: AlarmSlot, at: NaiveDateTime, rule: MatchRule) -> Result<(), ()> {
        self.0.borrow_mut().armed.push((slot, at, rule));
        Ok(())
    }
    fn alarm_flags(&mut self) -> Result<AlarmFlags, ()> {
        Ok(self.0.borrow().fired)
    }
    fn interrupt_enables(&mut self) -> Result<AlarmFlags, ()> {
        Ok(self.0.borrow().enabled)
    }
    fn clear_alarm_flags(&mut self, flags: AlarmFlags) -> Result<(), ()> {
        let mut registers = self.0.borrow_mut();
        registers.fired.alarm1 &= !flags.alarm1;
        registers.fired.alarm2 &= !flags.alarm2;
        Ok(())
    }
    fn set_interrupt_enabled(&mut self, slot: AlarmSlot, enabled: bool) -> Result<(), ()> {
        self.0.borrow_mut().enabled.set(slot, enabled);
        Ok(())
    }
}

#[test]
fn alarm_interrupt_starts_the_cycle_through_the_clock_service() {
    let clock_watering: Channel<Message> = Channel::new();
    let clock_web: Channel<Message> = Channel::new();
    let watering_moisture: Channel<Message> = Channel::new();
    let watering_web: Channel<Message> = Channel::new();
    let interrupt = InterruptEvent::new();
    let wall_clock = WallClock::new();
    let registers = Rc::new(RefCell::new(RtcRegisters::default()));

    let moisture_peer = watering_moisture.connect();
    let _web_to_watering = watering_web.connect();
    let _web_to_clock = clock_web.connect();

    let mut watering = WateringService::new(
        RecordingValves::default(),
        &wall_clock,
        clock_watering.connect(),
        watering_moisture.open(),
        watering_web.open(),
        only_section_two(),
    );
    let mut clock = ClockService::new(
        SharedRtc(Rc::clone(&registers)),
        clock_watering.open(),
        clock_web.open(),
        &interrupt,
        &wall_clock,
        ClockConfig {
            resync_period: Duration::from_secs(60),
            ..ClockConfig::default()
        },
    );

    clock.start();
    watering.start();
    block_on(clock.run_once());
    {
        let registers = registers.borrow();
        assert!(registers.enabled.alarm1);
        assert_eq!(registers.armed.len(), 1);
        assert_eq!(registers.armed[0].0, AlarmSlot::One);
        assert_eq!(registers.armed[0].2, MatchRule::HoursMinutesSeconds);
    }

    // the RTC matches and pulls the line low
    registers.borrow_mut().fired.alarm1 = true;
    interrupt.raise();
    block_on(clock.run_once());
    assert_eq!(registers.borrow().fired, AlarmFlags::NONE);

    block_on(watering.run_once());
    assert_eq!(drain(&moisture_peer), [Message::MoistureRequest(2)]);

    moisture_peer.send(Message::MoistureResponse(2, 0.1)).unwrap();
    block_on(watering.run_once());
    assert!(watering.valves().open[2]);

    block_on(clock.run_once());
    let registers = registers.borrow();
    assert!(registers.enabled.alarm2);
    assert_eq!(registers.armed[1].0, AlarmSlot::Two);
    assert_eq!(registers.armed[1].2, MatchRule::HoursMinutes);
}
