//! # Messages
//! The one message type exchanged between the services. Every channel in the system carries `Message`, which
//! direction a variant travels in is fixed by the protocol between the two peers:
//!
//! | Request                         | Response               | Peer         |
//! |---------------------------------|------------------------|--------------|
//! | `SetAlarm1/2`, `ClearAlarm1/2`  | none                   | clock        |
//! | none                            | `Alarm1/2Expired`      | clock        |
//! | `MoistureRequest`               | `MoistureResponse`     | moisture     |
//! | `StatusRequest`                 | `StatusResponse`       | any service  |
//! | `GetConfigRequest`              | `ConfigResponse`       | watering     |
//! | `SetConfigRequest`              | `ConfigResponse`       | watering     |

use chrono::NaiveDateTime;
use heapless::String;

use crate::utility::string_utils::StringUtils;

/// Capacity of the text carried by status and configuration responses.
pub const TEXT_CAPACITY: usize = 1024;

/// Capacity of a section name.
pub const NAME_CAPACITY: usize = 32;

/// Owned response text.
pub type Text = String<TEXT_CAPACITY>;

/// Owned section name.
pub type SectionName = String<NAME_CAPACITY>;

/// The messages of the system. Exactly one variant is active, consumers match on it before touching the payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Ask the moisture service for the reading of a section
    MoistureRequest(usize),
    /// Moisture fraction of a section, NaN if the probe reading is not trustworthy
    MoistureResponse(usize, f32),
    /// Alarm slot 1 (daily start) fired
    Alarm1Expired,
    /// Alarm slot 2 (section duration) fired
    Alarm2Expired,
    /// Arm alarm slot 1 for the given time
    SetAlarm1(NaiveDateTime),
    /// Arm alarm slot 2 for the given time
    SetAlarm2(NaiveDateTime),
    /// Disable the interrupt of alarm slot 1
    ClearAlarm1,
    /// Disable the interrupt of alarm slot 2
    ClearAlarm2,
    /// Ask a service for its status text
    StatusRequest,
    /// Status text of a service
    StatusResponse(Text),
    /// Ask the watering service for the section configuration
    GetConfigRequest,
    /// Configuration text, or an error text if a configuration update was rejected
    ConfigResponse(Text),
    /// Update the configuration of one section
    SetConfigRequest(SectionUpdate),
}

impl Message {
    /// Name of the variant, for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MoistureRequest(_) => "MoistureRequest",
            Self::MoistureResponse(..) => "MoistureResponse",
            Self::Alarm1Expired => "Alarm1Expired",
            Self::Alarm2Expired => "Alarm2Expired",
            Self::SetAlarm1(_) => "SetAlarm1",
            Self::SetAlarm2(_) => "SetAlarm2",
            Self::ClearAlarm1 => "ClearAlarm1",
            Self::ClearAlarm2 => "ClearAlarm2",
            Self::StatusRequest => "StatusRequest",
            Self::StatusResponse(_) => "StatusResponse",
            Self::GetConfigRequest => "GetConfigRequest",
            Self::ConfigResponse(_) => "ConfigResponse",
            Self::SetConfigRequest(_) => "SetConfigRequest",
        }
    }
}

/// Payload of `SetConfigRequest`.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionUpdate {
    /// Name of the section to update
    pub section_name: SectionName,
    /// New enabled state
    pub enabled: bool,
    /// New watering duration in seconds
    pub duration_seconds: u32,
    /// New wet threshold, clamped to [0, 1] when applied
    pub wet_threshold: f32,
}

/// Builds a `Text` from a string slice, cutting it at the capacity if needed.
pub fn text(s: &str) -> Text {
    let mut out = Text::new();
    StringUtils::push_truncated(&mut out, s);
    out
}
