//! # Water my garden
//! Irrigation controller core: the inter-task messaging substrate and the services built on it.
//!
//! The crate is `no_std` and runs on the Raspberry Pi Pico W under the embassy executor. Everything in here is
//! hardware agnostic, the peripherals are reached through small traits (`ClockDevice`, `MoistureSensor`, `Valves`)
//! that the firmware binary implements for the DS3231, the ADC and the valve GPIOs.
//!
//! Leaf to root:
//! - [`channel`]: bounded, bidirectional, strictly 1:1 typed message pipe
//! - [`wait_set`]: block one task on several channels and events at once
//! - [`interrupt`]: signal path from an interrupt handler into a wait set
//! - [`clock`]: the alarm scheduler owning the RTC
//! - [`watering`]: the multi-section watering state machine
//! - [`moisture`]: moisture probe calibration and the sensor service
//! - [`web`] and [`http`]: the configuration/status server side of the channels
#![cfg_attr(not(test), no_std)]

// must come first, the logging macros are used by all other modules
mod fmt;

pub mod channel;
pub mod clock;
pub mod http;
pub mod interrupt;
pub mod message;
pub mod moisture;
pub mod utility;
pub mod wait_set;
pub mod wall_clock;
pub mod watering;
pub mod web;
