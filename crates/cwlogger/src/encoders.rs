// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns raw bytes, serializable values, errors and HTTP round trips into
//! log entries and appends them to the pending buffer.
//!
//! Structured records are single-line JSON objects tagged with a `type`
//! field:
//!
//! ```json
//! {"type":"error","function":"app::handler","file":"src/app.rs","line":42,"message":"boom"}
//! {"type":"roundtrip","request":{...},"response":{...},"durationNanos":218847763}
//! ```

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::buffer::{EntryBuffer, LogEntry};
use crate::clock::Clock;
use crate::errors::EncodeError;

/// Source location attached to error records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub function: String,
    pub file: String,
    pub line: u32,
}

impl CallSite {
    #[must_use]
    pub fn new(function: &str, file: &str, line: u32) -> Self {
        CallSite {
            function: function.to_string(),
            file: file.to_string(),
            line,
        }
    }
}

/// Captures the enclosing function path, file and line as a [`CallSite`].
///
/// ```
/// let site = cwlogger::call_site!();
/// assert_eq!(site.file, file!());
/// assert!(site.line > 0);
/// ```
#[macro_export]
macro_rules! call_site {
    () => {{
        fn here() {}
        fn name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let name = name_of(here);
        let name = name.strip_suffix("::here").unwrap_or(name);
        $crate::encoders::CallSite::new(
            name.trim_end_matches("::{{closure}}"),
            file!(),
            line!(),
        )
    }};
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSummary {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub content_length: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSummary {
    pub status_code: u16,
    pub headers: BTreeMap<String, Vec<String>>,
    pub content_length: Option<u64>,
}

fn summarize_headers(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut summary: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        summary
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    summary
}

impl From<&reqwest::Request> for RequestSummary {
    fn from(request: &reqwest::Request) -> Self {
        RequestSummary {
            method: request.method().as_str().to_string(),
            url: request.url().to_string(),
            headers: summarize_headers(request.headers()),
            content_length: request
                .body()
                .and_then(reqwest::Body::as_bytes)
                .map(|bytes| bytes.len() as u64),
        }
    }
}

impl From<&reqwest::Response> for ResponseSummary {
    fn from(response: &reqwest::Response) -> Self {
        ResponseSummary {
            status_code: response.status().as_u16(),
            headers: summarize_headers(response.headers()),
            content_length: response.content_length(),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum Record<'a> {
    #[serde(rename = "error")]
    Error {
        function: &'a str,
        file: &'a str,
        line: u32,
        message: String,
    },
    #[serde(rename = "roundtrip")]
    RoundTrip {
        request: &'a RequestSummary,
        response: Option<&'a ResponseSummary>,
        #[serde(rename = "durationNanos")]
        duration_nanos: u64,
    },
}

pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(value)?)
}

pub fn encode_error(err: &dyn Error, site: &CallSite) -> Result<Vec<u8>, EncodeError> {
    encode_json(&Record::Error {
        function: &site.function,
        file: &site.file,
        line: site.line,
        message: err.to_string(),
    })
}

pub fn encode_round_trip(
    request: &RequestSummary,
    response: Option<&ResponseSummary>,
    duration: Duration,
) -> Result<Vec<u8>, EncodeError> {
    encode_json(&Record::RoundTrip {
        request,
        response,
        duration_nanos: u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
    })
}

/// Stamps payloads with the clock and appends them to the buffer.
#[derive(Debug, Clone)]
pub struct EntryWriter {
    buffer: Arc<EntryBuffer>,
    clock: Arc<dyn Clock>,
}

impl EntryWriter {
    #[must_use]
    pub fn new(buffer: Arc<EntryBuffer>, clock: Arc<dyn Clock>) -> Self {
        EntryWriter { buffer, clock }
    }

    /// Appends `bytes` as one entry. The caller decides chunk boundaries;
    /// nothing is split on newlines. Empty input is ignored.
    pub fn write_raw(&self, bytes: &[u8]) -> usize {
        self.append(bytes.to_vec())
    }

    pub fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), EncodeError> {
        self.append(encode_json(value)?);
        Ok(())
    }

    pub fn write_error(&self, err: &dyn Error, site: &CallSite) -> Result<(), EncodeError> {
        self.append(encode_error(err, site)?);
        Ok(())
    }

    pub fn write_round_trip(
        &self,
        request: &RequestSummary,
        response: Option<&ResponseSummary>,
        duration: Duration,
    ) -> Result<(), EncodeError> {
        self.append(encode_round_trip(request, response, duration)?);
        Ok(())
    }

    fn append(&self, payload: Vec<u8>) -> usize {
        let len = payload.len();
        match LogEntry::new(self.clock.now_millis(), payload) {
            Some(entry) => {
                self.buffer.append(entry);
                len
            }
            None => 0,
        }
    }
}
