// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod config;
mod relay;

use std::process::ExitCode;
use std::sync::Arc;

use cwlogger::{HttpLogSink, HttpSinkConfig, Logger, LoggerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{get_hostname, log_level_from_env, AgentConfig, AgentError};
use crate::relay::{cancel_on_signal, relay, wait_for_signal, SocketRelay};

#[tokio::main]
pub async fn main() -> ExitCode {
    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level_from_env());

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), AgentError> {
    let config = AgentConfig::from_env()?;
    let logger_config = LoggerConfig::from_env_with_default_stream(&get_hostname())?;
    let sink = HttpLogSink::new(&HttpSinkConfig::from_env()?);

    info!(
        "Shipping to {} every {:?}",
        logger_config.identity, logger_config.flush_interval
    );
    let logger = Arc::new(Logger::new(logger_config, Arc::new(sink))?);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(wait_for_signal(), cancel.clone()));

    if config.stdin {
        tokio::select! {
            () = cancel.cancelled() => {}
            relayed = relay(tokio::io::stdin(), &logger) => match relayed {
                Ok(bytes) => debug!("Reached end of stdin after {} bytes", bytes),
                Err(e) => error!("Failed to read stdin: {}", e),
            },
        }
    } else {
        SocketRelay::bind(&config.socket_path)?
            .serve(Arc::clone(&logger), cancel)
            .await;
    }

    info!("Shutting down");
    if let Err(e) = logger.shutdown().await {
        error!("Final flush failed: {}", e);
    }
    Ok(())
}
