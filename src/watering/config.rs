//! # Watering configuration
//! The section table and the knobs of the watering cycle. The table is built once from a [`WateringConfig`] and only
//! changes through validated `SetConfigRequest`s afterwards.

use core::fmt::Write;

use chrono::NaiveTime;
use embassy_time::Duration;
use heapless::{String, Vec};
use serde::Serialize;

use crate::message::{NAME_CAPACITY, SectionName, SectionUpdate, Text};

/// Maximum number of sections.
pub const MAX_SECTIONS: usize = 8;

/// Shortest accepted watering duration in seconds.
pub const MIN_DURATION_SECONDS: u32 = 1;

/// Longest accepted watering duration in seconds.
pub const MAX_DURATION_SECONDS: u32 = 4 * 60 * 60;

/// One irrigation zone.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// Display name, unique within the table
    pub name: SectionName,
    /// Index of the valve that waters this section
    pub valve: usize,
    /// ADC channel of the section's moisture probe, `None` if it has none
    pub moisture_channel: Option<usize>,
    /// Disabled sections are skipped by the cycle
    pub enabled: bool,
    /// How long the valve stays open at most
    pub duration_seconds: u32,
    /// Moisture fraction at or above which the section counts as wet enough
    pub wet_threshold: f32,
}

impl Section {
    /// A section with the default duration and threshold.
    ///
    /// # Errors
    /// `ConfigError::NameTooLong` if the name does not fit a section name.
    pub fn new(name: &str, valve: usize, moisture_channel: Option<usize>) -> Result<Self, ConfigError> {
        Ok(Self {
            name: SectionName::try_from(name).map_err(|_| ConfigError::NameTooLong)?,
            valve,
            moisture_channel,
            enabled: true,
            duration_seconds: 15 * 60,
            wet_threshold: 0.5,
        })
    }

    /// The same section, disabled.
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The same section with another duration.
    #[must_use]
    pub const fn with_duration(mut self, seconds: u32) -> Self {
        self.duration_seconds = seconds;
        self
    }

    /// The same section with another wet threshold.
    #[must_use]
    pub const fn with_threshold(mut self, wet_threshold: f32) -> Self {
        self.wet_threshold = wet_threshold;
        self
    }

    /// Watering duration.
    pub const fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds as u64)
    }

    /// A reading counts as wet enough. Readings that cannot be trusted (NaN) count as wet so a broken probe never
    /// waters a section.
    pub fn is_satisfied_by(&self, moisture: f32) -> bool {
        moisture.is_nan() || moisture >= self.wet_threshold
    }
}

/// How a section's watering ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WateringStrategy {
    /// The valve stays open for the section's full duration
    #[default]
    FixedDuration,
    /// The moisture is re-read every `recheck` while watering, the section ends early once it is wet enough
    MoistureConfirmed {
        /// Interval between readings
        recheck: Duration,
    },
}

/// Everything the watering service is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct WateringConfig {
    /// The sections, in watering order
    pub sections: Vec<Section, MAX_SECTIONS>,
    /// Time of day the daily cycle starts
    pub start_time: NaiveTime,
    /// How a section's watering ends
    pub strategy: WateringStrategy,
}

impl WateringConfig {
    /// An empty configuration.
    pub const fn new(start_time: NaiveTime, strategy: WateringStrategy) -> Self {
        Self {
            sections: Vec::new(),
            start_time,
            strategy,
        }
    }

    /// Append a section.
    ///
    /// # Errors
    /// If the table is full, the name is taken, or the duration or threshold is out of range.
    pub fn add_section(&mut self, section: Section) -> Result<(), ConfigError> {
        if self.sections.iter().any(|s| s.name == section.name) {
            return Err(ConfigError::DuplicateSection);
        }
        check_duration(section.duration_seconds)?;
        let wet_threshold = check_threshold(section.wet_threshold)?;
        self.sections
            .push(Section {
                wet_threshold,
                ..section
            })
            .map_err(|_| ConfigError::TooManySections)
    }

    /// Builder flavor of [`Self::add_section`].
    ///
    /// # Errors
    /// See [`Self::add_section`].
    pub fn with_section(mut self, section: Section) -> Result<Self, ConfigError> {
        self.add_section(section)?;
        Ok(self)
    }

    /// Moisture channel per section index, for the moisture service.
    pub fn probe_map(&self) -> Vec<Option<usize>, MAX_SECTIONS> {
        self.sections.iter().map(|s| s.moisture_channel).collect()
    }
}

impl Default for WateringConfig {
    /// Four sections on valves 0..=3, probes on ADC channels 0..=2. The fourth section has no probe and starts out
    /// disabled. The cycle starts at 06:00.
    fn default() -> Self {
        let mut config = Self::new(
            NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN),
            WateringStrategy::FixedDuration,
        );
        for (index, name) in ["Section 1", "Section 2", "Section 3", "Section 4"]
            .into_iter()
            .enumerate()
        {
            let probe = (index < 3).then_some(index);
            if let Ok(section) = Section::new(name, index, probe) {
                let section = if probe.is_some() { section } else { section.disabled() };
                let _ = config.add_section(section);
            }
        }
        config
    }
}

/// Reasons a configuration is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// No section has the given name
    UnknownSection,
    /// Two sections share a name
    DuplicateSection,
    /// More than `MAX_SECTIONS` sections
    TooManySections,
    /// The name is longer than a section name may be
    NameTooLong,
    /// The threshold is NaN
    InvalidThreshold,
    /// The duration is outside `MIN_DURATION_SECONDS..=MAX_DURATION_SECONDS`
    InvalidDuration,
    /// The configuration does not fit a response text
    ResponseTooLarge,
}

impl ConfigError {
    /// Human readable reason.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownSection => "unknown section",
            Self::DuplicateSection => "duplicate section name",
            Self::TooManySections => "too many sections",
            Self::NameTooLong => "section name too long",
            Self::InvalidThreshold => "wet_threshold must be a number",
            Self::InvalidDuration => "duration_seconds must be between 1 and 14400",
            Self::ResponseTooLarge => "configuration does not fit the response",
        }
    }
}

/// NaN is rejected, everything else is clamped to [0, 1].
fn check_threshold(wet_threshold: f32) -> Result<f32, ConfigError> {
    if wet_threshold.is_nan() {
        return Err(ConfigError::InvalidThreshold);
    }
    Ok(wet_threshold.clamp(0.0, 1.0))
}

/// Durations outside the accepted range are rejected.
const fn check_duration(seconds: u32) -> Result<(), ConfigError> {
    if seconds < MIN_DURATION_SECONDS || seconds > MAX_DURATION_SECONDS {
        return Err(ConfigError::InvalidDuration);
    }
    Ok(())
}

/// How a section looks on the wire.
#[derive(Serialize)]
struct SectionView<'a> {
    /// Name
    section_name: &'a str,
    /// Enabled state
    enabled: bool,
    /// Duration in seconds
    duration_seconds: u32,
    /// Wet threshold
    wet_threshold: f32,
}

/// Body of an error response.
#[derive(Serialize)]
struct ErrorView<'a> {
    /// Reason
    error: &'a str,
}

/// The live section table of the watering service.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionTable {
    /// Sections by index
    sections: Vec<Section, MAX_SECTIONS>,
}

impl SectionTable {
    /// Take over the sections of a configuration.
    pub fn new(sections: Vec<Section, MAX_SECTIONS>) -> Self {
        Self { sections }
    }

    /// Section by index.
    pub fn get(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    /// Number of sections.
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// The table has no sections.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Number of enabled sections.
    pub fn enabled_count(&self) -> usize {
        self.sections.iter().filter(|s| s.enabled).count()
    }

    /// All sections.
    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    /// The first enabled section after `after`, or the first enabled section at all for `None`. `None` once the
    /// end of the table is reached, which completes the cycle.
    pub fn next_enabled(&self, after: Option<usize>) -> Option<usize> {
        let start = after.map_or(0, |index| index + 1);
        self.sections
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, section)| section.enabled)
            .map(|(index, _)| index)
    }

    /// Apply an update to the section it names. Nothing changes unless every field is valid.
    ///
    /// # Errors
    /// `UnknownSection`, `InvalidThreshold` or `InvalidDuration`.
    pub fn apply(&mut self, update: &SectionUpdate) -> Result<&Section, ConfigError> {
        let section = self
            .sections
            .iter_mut()
            .find(|s| s.name == update.section_name)
            .ok_or(ConfigError::UnknownSection)?;
        let wet_threshold = check_threshold(update.wet_threshold)?;
        check_duration(update.duration_seconds)?;

        section.enabled = update.enabled;
        section.duration_seconds = update.duration_seconds;
        section.wet_threshold = wet_threshold;
        Ok(section)
    }

    /// The table as a JSON array of `{section_name, enabled, duration_seconds, wet_threshold}`.
    ///
    /// # Errors
    /// `ResponseTooLarge` if the JSON does not fit a response text.
    pub fn to_json(&self) -> Result<Text, ConfigError> {
        let views: Vec<SectionView<'_>, MAX_SECTIONS> = self
            .sections
            .iter()
            .map(|s| SectionView {
                section_name: s.name.as_str(),
                enabled: s.enabled,
                duration_seconds: s.duration_seconds,
                wet_threshold: s.wet_threshold,
            })
            .collect();
        let mut buffer = [0u8; crate::message::TEXT_CAPACITY];
        let used = serde_json_core::to_slice(views.as_slice(), &mut buffer)
            .map_err(|_| ConfigError::ResponseTooLarge)?;
        bytes_to_text(&buffer[..used])
    }
}

/// A JSON error body `{"error":"<reason>[: <detail>]"}`.
pub fn error_json(error: ConfigError, detail: &str) -> Text {
    let mut reason: String<{ NAME_CAPACITY + 64 }> = String::new();
    let _ = reason.push_str(error.as_str());
    if !detail.is_empty() {
        let _ = write!(reason, ": {detail}");
    }
    let mut buffer = [0u8; 256];
    serde_json_core::to_slice(&ErrorView { error: reason.as_str() }, &mut buffer)
        .ok()
        .and_then(|used| bytes_to_text(&buffer[..used]).ok())
        .unwrap_or_default()
}

/// Copy serialized JSON into a response text.
fn bytes_to_text(bytes: &[u8]) -> Result<Text, ConfigError> {
    let json = core::str::from_utf8(bytes).map_err(|_| ConfigError::ResponseTooLarge)?;
    Text::try_from(json).map_err(|_| ConfigError::ResponseTooLarge)
}
