//! # Moisture Task
//! Runs the moisture service on the ADC. Three capacitive probes are wired to GP26..GP28 (ADC0..ADC2).
use defmt::info;
use embassy_rp::adc::{self, Adc, Async};
use embassy_rp::gpio::Pull;
use heapless::Vec;
use water_my_garden::channel::Endpoint;
use water_my_garden::message::Message;
use water_my_garden::moisture::{Calibration, MoistureSensor, MoistureService};
use water_my_garden::watering::MAX_SECTIONS;

use crate::task::resources::{Irqs, ProbeResources};

/// Why a probe could not be read.
#[derive(Debug)]
pub enum ProbeError {
    /// No probe on this channel
    NoSuchChannel(usize),
    /// The conversion failed
    Adc(adc::Error),
}

/// The ADC with the probe inputs.
pub struct Probes {
    /// Converter
    adc: Adc<'static, Async>,
    /// One input per probe
    inputs: [adc::Channel<'static>; 3],
}

impl MoistureSensor for Probes {
    type Error = ProbeError;

    fn channels(&self) -> usize {
        self.inputs.len()
    }

    async fn read_raw(&mut self, channel: usize) -> Result<u16, ProbeError> {
        let input = self.inputs.get_mut(channel).ok_or(ProbeError::NoSuchChannel(channel))?;
        self.adc.read(input).await.map_err(ProbeError::Adc)
    }
}

#[embassy_executor::task]
pub async fn moisture_task(
    r: ProbeResources,
    watering: Endpoint<'static, Message>,
    web: Endpoint<'static, Message>,
    probe_map: Vec<Option<usize>, MAX_SECTIONS>,
) {
    info!("moisture task started");
    let probes = Probes {
        adc: Adc::new(r.adc, Irqs, adc::Config::default()),
        inputs: [
            adc::Channel::new_pin(r.probe_0, Pull::None),
            adc::Channel::new_pin(r.probe_1, Pull::None),
            adc::Channel::new_pin(r.probe_2, Pull::None),
        ],
    };
    MoistureService::new(probes, watering, web, probe_map, Calibration::default())
        .run()
        .await;
}
