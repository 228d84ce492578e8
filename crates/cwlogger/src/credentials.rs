// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Debug;
use std::sync::Arc;
use std::{future::Future, pin::Pin};
use tokio::sync::OnceCell;

pub type TokenFuture = Pin<Box<dyn Future<Output = Option<String>> + Send>>;

pub type TokenResolverFn = Arc<dyn Fn() -> TokenFuture + Send + Sync>;

/// Source of the bearer token attached to sink requests.
///
/// A resolver runs once, on the first request, and its result is reused for
/// the lifetime of the provider. A resolver returning `None` sends requests
/// without credentials.
#[derive(Clone)]
pub enum AuthTokenProvider {
    Anonymous,
    Static(String),
    Dynamic {
        resolver_fn: TokenResolverFn,
        token: Arc<OnceCell<Option<String>>>,
    },
}

impl AuthTokenProvider {
    pub fn new_from_resolver(resolver_fn: TokenResolverFn) -> Self {
        Self::Dynamic {
            resolver_fn,
            token: Arc::new(OnceCell::new()),
        }
    }

    pub fn new_from_static_token(token: &str) -> Self {
        Self::Static(token.to_string())
    }

    pub async fn get_token(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Static(token) => Some(token),
            Self::Dynamic { resolver_fn, token } => token
                .get_or_init(|| async { (resolver_fn)().await })
                .await
                .as_deref(),
        }
    }
}

impl From<Option<String>> for AuthTokenProvider {
    fn from(token: Option<String>) -> Self {
        token.map_or(Self::Anonymous, Self::Static)
    }
}

impl Debug for AuthTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthTokenProvider")
    }
}
