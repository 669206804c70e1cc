//! # HTTP
//! Just enough HTTP/1.1 for the configuration server: parse one request with an optional `Content-Length` body and
//! write a response head. One request per connection, the server closes after answering.

use core::fmt::Write;

use heapless::String;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// Anything else
    Other,
}

/// A parsed request, borrowing from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    /// Method
    pub method: Method,
    /// Path without the query string
    pub path: &'a str,
    /// Body, empty without `Content-Length`
    pub body: &'a [u8],
}

/// Why a buffer does not hold a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HttpError {
    /// More bytes are needed
    Incomplete,
    /// The bytes are not an HTTP/1.x request
    Malformed,
}

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// 200
    Ok,
    /// 400
    BadRequest,
    /// 404
    NotFound,
    /// 405
    MethodNotAllowed,
    /// 500
    InternalServerError,
}

impl Status {
    /// Numeric code.
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::InternalServerError => 500,
        }
    }

    /// Reason phrase.
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::InternalServerError => "Internal Server Error",
        }
    }
}

/// Position right after the blank line that ends the head.
fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Parse a request from the start of `buf`.
///
/// # Errors
/// `Incomplete` while the head or the announced body has not fully arrived, `Malformed` if it never will parse.
pub fn parse_request(buf: &[u8]) -> Result<Request<'_>, HttpError> {
    let end = head_end(buf).ok_or(HttpError::Incomplete)?;
    let head = core::str::from_utf8(&buf[..end]).map_err(|_| HttpError::Malformed)?;
    let mut lines = head.split("\r\n");

    let request_line = lines.next().ok_or(HttpError::Malformed)?;
    let mut parts = request_line.split(' ');
    let method = match parts.next() {
        Some("GET") => Method::Get,
        Some("POST") => Method::Post,
        Some(m) if !m.is_empty() => Method::Other,
        _ => return Err(HttpError::Malformed),
    };
    let target = parts.next().filter(|t| t.starts_with('/')).ok_or(HttpError::Malformed)?;
    match parts.next() {
        Some(version) if version.starts_with("HTTP/1.") => {}
        _ => return Err(HttpError::Malformed),
    }
    let path = target.split('?').next().unwrap_or(target);

    let mut content_length = 0usize;
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line.split_once(':').ok_or(HttpError::Malformed)?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            content_length = value.trim().parse().map_err(|_| HttpError::Malformed)?;
        }
    }

    let stop = end.checked_add(content_length).ok_or(HttpError::Malformed)?;
    let body = buf.get(end..stop).ok_or(HttpError::Incomplete)?;
    Ok(Request { method, path, body })
}

/// Response head with `Content-Type`, `Content-Length` and `Connection: close`.
pub fn response_head(status: Status, content_type: &str, content_length: usize) -> String<160> {
    let mut head = String::new();
    let _ = write!(
        head,
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status.code(),
        status.reason(),
        content_type,
        content_length
    );
    head
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_get_request() {
        let raw = b"GET /status?verbose=1 HTTP/1.1\r\nHost: watergarden\r\nAccept: */*\r\n\r\n";
        let request = parse_request(raw).unwrap();
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.path, "/status");
        assert!(request.body.is_empty());
    }

    #[test]
    fn parses_a_post_body() {
        let raw = b"POST /configuration HTTP/1.1\r\ncontent-length: 7\r\n\r\n{\"a\":1}";
        let request = parse_request(raw).unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.body, b"{\"a\":1}");
    }

    #[test]
    fn waits_for_the_rest_of_the_request() {
        assert_eq!(parse_request(b"GET /status HTTP/1.1\r\nHost"), Err(HttpError::Incomplete));
        assert_eq!(
            parse_request(b"POST /configuration HTTP/1.1\r\nContent-Length: 10\r\n\r\n{\"a\""),
            Err(HttpError::Incomplete)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_request(b"HELLO\r\n\r\n"), Err(HttpError::Malformed));
        assert_eq!(parse_request(b"GET status HTTP/1.1\r\n\r\n"), Err(HttpError::Malformed));
        assert_eq!(
            parse_request(b"GET / HTTP/1.1\r\nContent-Length: many\r\n\r\n"),
            Err(HttpError::Malformed)
        );
    }

    #[test]
    fn head_announces_the_body() {
        assert_eq!(
            response_head(Status::NotFound, "text/plain", 9),
            "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 9\r\nConnection: close\r\n\r\n"
        );
    }
}
