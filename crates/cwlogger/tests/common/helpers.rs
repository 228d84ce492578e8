// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use cwlogger::{LoggerConfig, SinkIdentity};
use std::time::Duration;

pub const TEST_GROUP: &str = "integration_group";
pub const TEST_STREAM: &str = "integration_stream";

/// Config with a short flush interval and no rate limit
#[allow(dead_code)]
pub fn test_config() -> LoggerConfig {
    let mut config = LoggerConfig::new(
        SinkIdentity::new(TEST_GROUP, TEST_STREAM).expect("valid sink identity"),
    );
    config.flush_interval = Duration::from_secs(1);
    config.rate_budget.capacity = 0;
    config
}
