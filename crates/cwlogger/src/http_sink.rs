// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! [`RemoteLogSink`] over the CloudWatch Logs JSON 1.1 protocol.
//!
//! Every action is a `POST` to the endpoint root carrying the action name in
//! the `X-Amz-Target` header. Failures come back as a JSON body whose
//! `__type` names the exception, which is mapped onto [`SinkError`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::buffer::LogEntry;
use crate::config::HttpSinkConfig;
use crate::credentials::AuthTokenProvider;
use crate::errors::SinkError;
use crate::sink::{RemoteLogSink, StreamDescription};

const TARGET_HEADER: &str = "X-Amz-Target";
const TARGET_PREFIX: &str = "Logs_20140328";
const CONTENT_TYPE_JSON: &str = "application/x-amz-json-1.1";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name_prefix: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsResponse {
    #[serde(default)]
    log_streams: Vec<LogStream>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogStream {
    log_stream_name: String,
    upload_sequence_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogGroupRequest<'a> {
    log_group_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogStreamRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_token: Option<&'a str>,
    log_events: Vec<InputLogEvent>,
}

#[derive(Debug, Serialize)]
struct InputLogEvent {
    timestamp: i64,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsResponse {
    next_sequence_token: Option<String>,
    rejected_log_events_info: Option<serde_json::Value>,
}

/// Exception body returned with a non-success status.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    #[serde(rename = "__type", default)]
    error_type: String,
    #[serde(alias = "Message", default)]
    message: String,
    expected_sequence_token: Option<String>,
}

impl ErrorResponse {
    fn into_sink_error(self) -> SinkError {
        // "com.amazonaws.logs#InvalidSequenceTokenException" -> "InvalidSequenceTokenException"
        let name = self
            .error_type
            .rsplit('#')
            .next()
            .unwrap_or_default();
        match name {
            "InvalidSequenceTokenException" => SinkError::InvalidToken {
                expected: self.expected_sequence_token,
            },
            "DataAlreadyAcceptedException" => SinkError::AlreadyAccepted {
                expected: self.expected_sequence_token,
            },
            "ResourceNotFoundException" => SinkError::NotFound,
            "ResourceAlreadyExistsException" => SinkError::AlreadyExists,
            "ThrottlingException" => SinkError::Throttled,
            _ => SinkError::Other(format!("{}: {}", name, self.message)),
        }
    }
}

/// Creates the HTTP client, falling back to a direct connection when the
/// proxy cannot be used.
#[must_use]
pub fn get_client(config: &HttpSinkConfig) -> reqwest::Client {
    match build_client(config, true) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "CWLOGS | Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(config, false) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "CWLOGS | Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(config: &HttpSinkConfig, allow_proxy: bool) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if allow_proxy {
        if let Some(https_uri) = &config.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(https_uri.clone())?);
        }
    }

    builder.build()
}

#[derive(Debug, Clone)]
pub struct HttpLogSink {
    client: reqwest::Client,
    endpoint: String,
    credentials: AuthTokenProvider,
}

impl HttpLogSink {
    #[must_use]
    pub fn new(config: &HttpSinkConfig) -> Self {
        Self::with_credentials(config, AuthTokenProvider::from(config.auth_token.clone()))
    }

    #[must_use]
    pub fn with_credentials(config: &HttpSinkConfig, credentials: AuthTokenProvider) -> Self {
        HttpLogSink {
            client: get_client(config),
            endpoint: config.endpoint.clone(),
            credentials,
        }
    }

    async fn call<B, R>(&self, action: &str, body: &B) -> Result<R, SinkError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned + Default,
    {
        let body = serde_json::to_vec(body)
            .map_err(|e| SinkError::Other(format!("Failed to serialize {action}: {e}")))?;

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(TARGET_HEADER, format!("{TARGET_PREFIX}.{action}"))
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .body(body);
        if let Some(token) = self.credentials.get_token().await {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SinkError::Other(format!("{action} request failed: {e}")))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SinkError::Other(format!("Failed to read {action} response: {e}")))?;

        if !status.is_success() {
            let err = match serde_json::from_slice::<ErrorResponse>(&bytes) {
                Ok(body) if !body.error_type.is_empty() => body.into_sink_error(),
                _ => SinkError::Other(format!(
                    "{action} failed with status {status}: {}",
                    String::from_utf8_lossy(&bytes)
                )),
            };
            debug!("CWLOGS | {} returned {}: {}", action, status, err);
            return Err(err);
        }

        if bytes.is_empty() {
            return Ok(R::default());
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| SinkError::Other(format!("Invalid {action} response: {e}")))
    }
}

#[async_trait]
impl RemoteLogSink for HttpLogSink {
    async fn describe_streams(
        &self,
        group: &str,
        stream_prefix: &str,
    ) -> Result<Vec<StreamDescription>, SinkError> {
        let response: DescribeLogStreamsResponse = self
            .call(
                "DescribeLogStreams",
                &DescribeLogStreamsRequest {
                    log_group_name: group,
                    log_stream_name_prefix: stream_prefix,
                },
            )
            .await?;

        Ok(response
            .log_streams
            .into_iter()
            .map(|s| StreamDescription {
                name: s.log_stream_name,
                upload_token: s.upload_sequence_token,
            })
            .collect())
    }

    async fn create_group(&self, group: &str) -> Result<(), SinkError> {
        let _: serde_json::Value = self
            .call("CreateLogGroup", &CreateLogGroupRequest { log_group_name: group })
            .await?;
        Ok(())
    }

    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), SinkError> {
        let _: serde_json::Value = self
            .call(
                "CreateLogStream",
                &CreateLogStreamRequest {
                    log_group_name: group,
                    log_stream_name: stream,
                },
            )
            .await?;
        Ok(())
    }

    async fn put_events(
        &self,
        group: &str,
        stream: &str,
        token: Option<&str>,
        entries: &[LogEntry],
    ) -> Result<Option<String>, SinkError> {
        let request = PutLogEventsRequest {
            log_group_name: group,
            log_stream_name: stream,
            sequence_token: token,
            log_events: entries
                .iter()
                .map(|entry| InputLogEvent {
                    timestamp: entry.timestamp_millis(),
                    message: entry.message().to_string(),
                })
                .collect(),
        };

        let response: PutLogEventsResponse = self.call("PutLogEvents", &request).await?;
        if let Some(rejected) = response.rejected_log_events_info {
            warn!("CWLOGS | Sink rejected some events: {}", rejected);
        }
        Ok(response.next_sequence_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(body: &str) -> SinkError {
        serde_json::from_str::<ErrorResponse>(body)
            .unwrap()
            .into_sink_error()
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            error(r#"{"__type":"com.amazonaws.logs#InvalidSequenceTokenException","message":"bad","expectedSequenceToken":"49590"}"#),
            SinkError::InvalidToken {
                expected: Some("49590".to_string())
            }
        );
        assert_eq!(
            error(r#"{"__type":"DataAlreadyAcceptedException","expectedSequenceToken":"123"}"#),
            SinkError::AlreadyAccepted {
                expected: Some("123".to_string())
            }
        );
        assert_eq!(
            error(r#"{"__type":"InvalidSequenceTokenException","message":"bad"}"#),
            SinkError::InvalidToken { expected: None }
        );
        assert_eq!(
            error(r#"{"__type":"ResourceNotFoundException","message":"The specified log group does not exist."}"#),
            SinkError::NotFound
        );
        assert_eq!(
            error(r#"{"__type":"ResourceAlreadyExistsException"}"#),
            SinkError::AlreadyExists
        );
        assert_eq!(error(r#"{"__type":"ThrottlingException"}"#), SinkError::Throttled);
        assert_eq!(
            error(r#"{"__type":"ServiceUnavailableException","Message":"try later"}"#),
            SinkError::Other("ServiceUnavailableException: try later".to_string())
        );
    }

    #[test]
    fn test_put_request_body() {
        let request = PutLogEventsRequest {
            log_group_name: "group",
            log_stream_name: "stream",
            sequence_token: None,
            log_events: vec![InputLogEvent {
                timestamp: 1_700_000_000_000,
                message: "hello".to_string(),
            }],
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "logGroupName": "group",
                "logStreamName": "stream",
                "logEvents": [{"timestamp": 1_700_000_000_000_i64, "message": "hello"}]
            })
        );
    }

    #[test]
    fn test_client_with_invalid_proxy_falls_back() {
        let config = HttpSinkConfig {
            https_proxy: Some("not a url".to_string()),
            ..HttpSinkConfig::new("https://logs.example.com")
        };
        // must not panic
        let _client = get_client(&config);
    }
}
