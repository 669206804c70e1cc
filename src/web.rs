//! # Web
//! The configuration server's side of the channels. [`ConfigClient`] asks the services for their status and the
//! watering configuration, [`ConfigClient::respond`] maps HTTP requests onto those queries.
//!
//! Every query waits at most 500 ms for its answer. A service that does not answer in time is reported with a fixed
//! "Failed to get ..." text instead, so a stuck service never blocks the server.

use embassy_time::{Duration, Instant};
use heapless::String;
use serde::Deserialize;

use crate::channel::Endpoint;
use crate::fmt::{debug, warn};
use crate::http::{Method, Request, Status};
use crate::message::{Message, SectionName, SectionUpdate, TEXT_CAPACITY, Text, text};
use crate::utility::string_utils::StringUtils;
use crate::wait_set::Timeout;

/// How long a query waits for its answer.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Capacity of a response body, enough for the three status texts.
pub const BODY_CAPACITY: usize = 3 * TEXT_CAPACITY;

/// Response body.
pub type Body = String<BODY_CAPACITY>;

/// Content type of plain text responses.
const TEXT_PLAIN: &str = "text/plain";

/// Content type of JSON responses.
const APPLICATION_JSON: &str = "application/json";

/// Version banner.
const VERSION: &str = concat!("Water my garden version ", env!("CARGO_PKG_VERSION"));

/// An answer ready to be written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Status
    pub status: Status,
    /// Content type
    pub content_type: &'static str,
    /// Body
    pub body: Body,
}

impl Reply {
    /// A reply with a body copied from `content`.
    fn new(status: Status, content_type: &'static str, content: &str) -> Self {
        let mut body = Body::new();
        StringUtils::push_truncated(&mut body, content);
        Self {
            status,
            content_type,
            body,
        }
    }
}

/// The web server's endpoints to the services.
pub struct ConfigClient<'a> {
    /// Channel to the clock service
    clock: Endpoint<'a, Message>,
    /// Channel to the moisture service
    moisture: Endpoint<'a, Message>,
    /// Channel to the watering service
    watering: Endpoint<'a, Message>,
    /// How long a query waits for its answer
    timeout: Duration,
}

/// `POST /configuration` body. Every field is optional here so a missing one can be named in the answer.
#[derive(Deserialize)]
struct ConfigPayload<'a> {
    /// Section to update
    #[serde(borrow)]
    section_name: Option<&'a str>,
    /// New enabled state
    enabled: Option<bool>,
    /// New duration in seconds
    duration_seconds: Option<u32>,
    /// New wet threshold
    wet_threshold: Option<f32>,
}

/// Turn a JSON body into a section update, or the text explaining why not.
///
/// # Errors
/// `"failed to parse JSON"`, `"missing <field> field"` or `"section_name too long"`.
pub fn parse_section_update(body: &[u8]) -> Result<SectionUpdate, &'static str> {
    let (payload, _) =
        serde_json_core::from_slice::<ConfigPayload<'_>>(body).map_err(|_| "failed to parse JSON")?;
    let section_name = payload.section_name.ok_or("missing section_name field")?;
    let enabled = payload.enabled.ok_or("missing enabled field")?;
    let duration_seconds = payload.duration_seconds.ok_or("missing duration_seconds field")?;
    let wet_threshold = payload.wet_threshold.ok_or("missing wet_threshold field")?;
    Ok(SectionUpdate {
        section_name: SectionName::try_from(section_name).map_err(|_| "section_name too long")?,
        enabled,
        duration_seconds,
        wet_threshold,
    })
}

impl<'a> ConfigClient<'a> {
    /// Create the client with the default response timeout.
    pub const fn new(
        clock: Endpoint<'a, Message>,
        moisture: Endpoint<'a, Message>,
        watering: Endpoint<'a, Message>,
    ) -> Self {
        Self {
            clock,
            moisture,
            watering,
            timeout: RESPONSE_TIMEOUT,
        }
    }

    /// The same client with another response timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send `request` and wait for the first answer `accept` takes. Answers left over from earlier, timed out
    /// queries are dropped first.
    async fn query(
        &self,
        endpoint: &Endpoint<'a, Message>,
        request: Message,
        accept: fn(Message) -> Option<Text>,
    ) -> Option<Text> {
        let stale = endpoint.drain();
        if stale > 0 {
            debug!("dropped {} stale answers", stale);
        }
        let name = request.name();
        if endpoint.send(request).is_err() {
            warn!("queue full, {} not sent", name);
            return None;
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let answer = endpoint.receive(Timeout::After(left)).await?;
            if let Some(accepted) = accept(answer) {
                return Some(accepted);
            }
        }
    }

    /// Status text of the clock service.
    pub async fn clock_status(&self) -> Text {
        self.query(&self.clock, Message::StatusRequest, status_text)
            .await
            .unwrap_or_else(|| text("Failed to get clock status"))
    }

    /// Status text of the moisture service.
    pub async fn moisture_status(&self) -> Text {
        self.query(&self.moisture, Message::StatusRequest, status_text)
            .await
            .unwrap_or_else(|| text("Failed to get moisture status"))
    }

    /// Status text of the watering service.
    pub async fn watering_status(&self) -> Text {
        self.query(&self.watering, Message::StatusRequest, status_text)
            .await
            .unwrap_or_else(|| text("Failed to get watering status"))
    }

    /// The section configuration as JSON, `None` if the watering service did not answer.
    pub async fn watering_config(&self) -> Option<Text> {
        self.query(&self.watering, Message::GetConfigRequest, config_text)
            .await
    }

    /// Apply a section update. The new configuration as JSON or an error body, `None` if the watering service did
    /// not answer.
    pub async fn set_watering_config(&self, update: SectionUpdate) -> Option<Text> {
        self.query(&self.watering, Message::SetConfigRequest(update), config_text)
            .await
    }

    /// Answer one HTTP request.
    pub async fn respond(&self, request: &Request<'_>) -> Reply {
        debug!("{:?} {}", request.method, request.path);
        match (request.method, request.path) {
            (Method::Get, "/version") => Reply::new(Status::Ok, TEXT_PLAIN, VERSION),
            (Method::Get, "/status") => {
                let mut reply = Reply::new(Status::Ok, TEXT_PLAIN, "");
                for part in [
                    self.clock_status().await,
                    self.moisture_status().await,
                    self.watering_status().await,
                ] {
                    StringUtils::push_truncated(&mut reply.body, &part);
                }
                reply
            }
            (Method::Get, "/configuration") => match self.watering_config().await {
                Some(json) => Reply::new(Status::Ok, APPLICATION_JSON, &json),
                None => Reply::new(
                    Status::InternalServerError,
                    TEXT_PLAIN,
                    "Failed to get watering configuration",
                ),
            },
            (Method::Post, "/configuration") => {
                let update = match parse_section_update(request.body) {
                    Ok(update) => update,
                    Err(reason) => return Reply::new(Status::BadRequest, TEXT_PLAIN, reason),
                };
                match self.set_watering_config(update).await {
                    Some(json) if json.starts_with("{\"error\"") => {
                        Reply::new(Status::BadRequest, APPLICATION_JSON, &json)
                    }
                    Some(json) => Reply::new(Status::Ok, APPLICATION_JSON, &json),
                    None => Reply::new(
                        Status::InternalServerError,
                        TEXT_PLAIN,
                        "Failed to set watering configuration",
                    ),
                }
            }
            (_, "/version" | "/status" | "/configuration") => {
                Reply::new(Status::MethodNotAllowed, TEXT_PLAIN, "method not allowed")
            }
            _ => Reply::new(Status::NotFound, TEXT_PLAIN, "not found"),
        }
    }
}

/// Accepts status answers.
fn status_text(message: Message) -> Option<Text> {
    match message {
        Message::StatusResponse(status) => Some(status),
        _ => None,
    }
}

/// Accepts configuration answers.
fn config_text(message: Message) -> Option<Text> {
    match message {
        Message::ConfigResponse(config) => Some(config),
        _ => None,
    }
}
