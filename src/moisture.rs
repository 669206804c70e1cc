//! # Moisture service
//! Reads the capacitive soil moisture probes on request and turns the raw ADC counts into a moisture fraction.
//!
//! A probe reads high in dry soil and low in wet soil. Readings far outside the calibrated range mean a
//! disconnected or shorted probe and are reported as NaN, which the watering service treats as "wet enough".

use core::fmt::Write;

use heapless::Vec;

use crate::channel::Endpoint;
use crate::fmt::{Debug2Format, debug, info, warn};
use crate::message::{Message, Text};
use crate::wait_set::{Timeout, WaitSet, Wake};
use crate::watering::MAX_SECTIONS;

/// Samples averaged per reading.
pub const SAMPLES_PER_READING: u32 = 64;

/// Full scale of the 12 bit ADC.
const ADC_FULL_SCALE: u32 = 4095;

/// ADC reference in millivolts.
const ADC_REFERENCE_MV: u32 = 3300;

/// Raw readings of a probe in air and in soaked soil.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    /// Reading in dry air
    pub air_dry: u16,
    /// Reading in soaked soil
    pub soaked: u16,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            air_dry: 2590,
            soaked: 1200,
        }
    }
}

impl Calibration {
    /// Moisture fraction of a raw reading, 1 is soaked and 0 is dry. Readings more than 20 % outside the calibrated
    /// range are NaN, readings slightly outside are clamped.
    pub fn moisture(&self, raw: u16) -> f32 {
        let raw = f32::from(raw);
        let dry = f32::from(self.air_dry);
        let soaked = f32::from(self.soaked);
        if raw < soaked * 0.8 || raw > dry * 1.2 {
            return f32::NAN;
        }
        1.0 - ((raw - soaked) / (dry - soaked)).clamp(0.0, 1.0)
    }
}

/// The probes as the moisture service sees them.
#[allow(async_fn_in_trait)]
pub trait MoistureSensor {
    /// Read error
    type Error: core::fmt::Debug;

    /// Number of probe channels.
    fn channels(&self) -> usize;

    /// One raw 12 bit sample of a channel.
    async fn read_raw(&mut self, channel: usize) -> Result<u16, Self::Error>;
}

/// Members of the moisture service's wait set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MoistureSource {
    /// Message from the watering service
    Watering,
    /// Message from the web server
    Web,
}

/// The moisture service and everything it owns.
pub struct MoistureService<'a, S: MoistureSensor> {
    /// The probes
    sensor: S,
    /// Channel to the watering service
    watering: Endpoint<'a, Message>,
    /// Channel to the web server
    web: Endpoint<'a, Message>,
    /// Both channels
    wait_set: WaitSet<'a, MoistureSource>,
    /// Probe channel per section index
    probes: Vec<Option<usize>, MAX_SECTIONS>,
    /// Raw to fraction conversion
    calibration: Calibration,
}

impl<'a, S: MoistureSensor> MoistureService<'a, S> {
    /// Create the service.
    ///
    /// # Panics
    /// If one of the endpoints is not connected.
    pub fn new(
        sensor: S,
        watering: Endpoint<'a, Message>,
        web: Endpoint<'a, Message>,
        probes: Vec<Option<usize>, MAX_SECTIONS>,
        calibration: Calibration,
    ) -> Self {
        let mut wait_set = WaitSet::new();
        wait_set.register_endpoint(MoistureSource::Watering, &watering);
        wait_set.register_endpoint(MoistureSource::Web, &web);
        Self {
            sensor,
            watering,
            web,
            wait_set,
            probes,
            calibration,
        }
    }

    /// Run the service forever.
    pub async fn run(mut self) -> ! {
        info!("moisture service started, {} probes", self.sensor.channels());
        loop {
            self.run_once().await;
        }
    }

    /// Wait for one request and answer it.
    pub async fn run_once(&mut self) {
        let Wake::Ready(source) = self.wait_set.wait_any(Timeout::Forever).await else {
            return;
        };
        let endpoint = match source {
            MoistureSource::Watering => &self.watering,
            MoistureSource::Web => &self.web,
        };
        let Some(message) = endpoint.try_receive() else {
            return;
        };

        let response = match message {
            Message::MoistureRequest(section) => {
                let moisture = self.section_moisture(section).await;
                Message::MoistureResponse(section, moisture)
            }
            Message::StatusRequest => Message::StatusResponse(self.status().await),
            other => {
                warn!("moisture service ignores {}", other.name());
                return;
            }
        };

        let endpoint = match source {
            MoistureSource::Watering => &self.watering,
            MoistureSource::Web => &self.web,
        };
        if let Err(e) = endpoint.send(response) {
            warn!("failed to reply {} to {:?}", e.into_inner().name(), source);
        }
    }

    /// Moisture of a section, NaN if it has no probe or the probe cannot be read.
    async fn section_moisture(&mut self, section: usize) -> f32 {
        let Some(channel) = self.probes.get(section).copied().flatten() else {
            debug!("section {} has no probe", section);
            return f32::NAN;
        };
        match self.average(channel).await {
            Some(raw) => {
                let moisture = self.calibration.moisture(raw);
                debug!("section {} channel {} raw {} moisture {}", section, channel, raw, moisture);
                moisture
            }
            None => f32::NAN,
        }
    }

    /// Average of `SAMPLES_PER_READING` samples, `None` if any sample fails.
    async fn average(&mut self, channel: usize) -> Option<u16> {
        let mut sum = 0u32;
        for _ in 0..SAMPLES_PER_READING {
            match self.sensor.read_raw(channel).await {
                Ok(sample) => sum += u32::from(sample),
                Err(e) => {
                    warn!("failed to read probe channel {}: {:?}", channel, Debug2Format(&e));
                    return None;
                }
            }
        }
        u16::try_from(sum / SAMPLES_PER_READING).ok()
    }

    /// Status text: raw, voltage and moisture of every channel.
    async fn status(&mut self) -> Text {
        let mut text = Text::new();
        for channel in 0..self.sensor.channels() {
            let _ = write!(text, "Moisture channel {channel}: ");
            match self.average(channel).await {
                Some(raw) => {
                    let millivolts = u32::from(raw) * ADC_REFERENCE_MV / ADC_FULL_SCALE;
                    let moisture = self.calibration.moisture(raw);
                    let _ = write!(text, "raw {raw}, {millivolts} mV, ");
                    if moisture.is_nan() {
                        let _ = writeln!(text, "out of range");
                    } else {
                        let _ = writeln!(text, "{:.0} %", moisture * 100.0);
                    }
                }
                None => {
                    let _ = writeln!(text, "read failed");
                }
            }
        }
        text
    }
}
