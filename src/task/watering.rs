//! # Watering Task
//! Runs the watering service on the valve outputs.
//!
//! The valves hang off a relay board with active low inputs: a low pin opens the valve. The pins start high so no
//! valve opens while the firmware boots.
use defmt::{info, warn};
use embassy_rp::gpio::{Level, Output};
use water_my_garden::channel::Endpoint;
use water_my_garden::message::Message;
use water_my_garden::wall_clock::WallClock;
use water_my_garden::watering::{Valves, WateringConfig, WateringService};

use crate::task::resources::ValveResources;

/// The relay inputs, one per section.
pub struct RelayValves([Output<'static>; 4]);

impl RelayValves {
    /// Claim the pins, all valves closed.
    pub fn new(r: ValveResources) -> Self {
        Self([
            Output::new(r.valve_0, Level::High),
            Output::new(r.valve_1, Level::High),
            Output::new(r.valve_2, Level::High),
            Output::new(r.valve_3, Level::High),
        ])
    }
}

impl Valves for RelayValves {
    fn count(&self) -> usize {
        self.0.len()
    }

    fn set(&mut self, valve: usize, open: bool) {
        let Some(pin) = self.0.get_mut(valve) else {
            warn!("no valve {}", valve);
            return;
        };
        // active low
        pin.set_level(if open { Level::Low } else { Level::High });
    }
}

#[embassy_executor::task]
pub async fn watering_task(
    r: ValveResources,
    clock: Endpoint<'static, Message>,
    moisture: Endpoint<'static, Message>,
    web: Endpoint<'static, Message>,
    wall_clock: &'static WallClock,
    config: WateringConfig,
) {
    info!("watering task started");
    WateringService::new(RelayValves::new(r), wall_clock, clock, moisture, web, config)
        .run()
        .await;
}
