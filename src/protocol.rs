//! Request line parser and response generator.
//!
//! Requests are a single line of text where only the first two
//! whitespace-separated tokens matter:
//!
//! ```text
//! Request:  GET /health HTTP/1.1
//! Response: HTTP/1.1 200 OK\n\n{"total": {"queries": 0, "seconds": 0}}
//! ```
//!
//! Responses carry no headers and no length: the status line, one blank
//! line, then the JSON body. Bodies use `": "` and `", "` separators.

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use serde_json::{json, Value};
use std::io;
use std::str;
use thiserror::Error;

/// Protocol version written in every status line
const VERSION: &str = "HTTP/1.1";

/// Parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    pub method: &'a str,
    pub path: &'a str,
}

/// Request parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Request is not valid UTF-8")]
    InvalidEncoding,
    #[error("Empty request")]
    Empty,
    #[error("Missing path after method '{0}'")]
    MissingPath(String),
}

impl<'a> Request<'a> {
    /// Parse a request from raw bytes read off the wire
    pub fn from_bytes(buffer: &'a [u8]) -> Result<Self, ParseError> {
        let line = str::from_utf8(buffer).map_err(|_| ParseError::InvalidEncoding)?;
        Self::parse(line)
    }

    /// Parse a request line, taking the first token as method and the
    /// second as path.
    pub fn parse(line: &'a str) -> Result<Self, ParseError> {
        let mut tokens = line.split_whitespace();
        let method = tokens.next().ok_or(ParseError::Empty)?;
        let path = tokens
            .next()
            .ok_or_else(|| ParseError::MissingPath(method.to_string()))?;

        Ok(Request { method, path })
    }
}

/// Response status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
    MethodNotAllowed,
    ServiceUnavailable,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
            Status::ServiceUnavailable => 503,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::NotFound => "Not found",
            Status::MethodNotAllowed => "Method not allowed",
            Status::ServiceUnavailable => "Service temporarily unavailable",
        }
    }

    /// Status line without the trailing separator, e.g. `HTTP/1.1 200 OK`
    pub fn line(self) -> String {
        format!("{} {} {}", VERSION, self.code(), self.reason())
    }

    /// Fixed error payload for non-200 statuses.
    ///
    /// The 404 message differs from its status reason.
    pub fn error_body(self) -> Value {
        let msg = match self {
            Status::NotFound => "Page not found",
            other => other.reason(),
        };
        json!({ "msg": msg, "status_code": self.code() })
    }
}

/// A status plus JSON body, built fresh for every request
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: Status,
    pub body: Value,
}

impl Response {
    pub fn new(status: Status, body: Value) -> Self {
        Response { status, body }
    }

    /// The load-shedding response, sent on connections that are not admitted
    pub fn overloaded() -> Self {
        Self::new(
            Status::ServiceUnavailable,
            Status::ServiceUnavailable.error_body(),
        )
    }

    /// Serialize as status line, blank line, JSON body
    pub fn to_bytes(&self) -> BytesMut {
        let line = self.status.line();

        let mut out = BytesMut::with_capacity(line.len() + 2 + 64);
        out.put_slice(line.as_bytes());
        out.put_slice(b"\n\n");

        let mut writer = out.writer();
        let mut serializer = Serializer::with_formatter(&mut writer, SpacedFormatter);
        // A `Value` has string keys and the writer is in memory, so this cannot fail.
        let _ = self.body.serialize(&mut serializer);
        writer.into_inner()
    }
}

/// Single-line JSON with a space after every `:` and `,`
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}
