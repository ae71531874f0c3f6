// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`icms-casework-core`)
//!
//! HTTP surface that translates external requests into application service
//! calls. No workflow rules live here; every transition is delegated to the
//! services in `crate::application`.
//!
//! | Module | Caller | Description |
//! |--------|--------|-------------|
//! | [`api`] | Caseworkers and applicants | JSON endpoints for every case operation, identified by `X-ICMS-User` |
//! | [`chief_api`] | ICMS-HMRC | Hawk-authenticated licence reply and usage callbacks |

pub mod api;
pub mod chief_api;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::application::IcmsServices;
use crate::infrastructure::hawk::HawkAuthenticator;

pub struct AppState {
    pub services: IcmsServices,
    pub hawk: HawkAuthenticator,
}

/// Full router: `/health`, `/api/...` and `/chief/...`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(api::routes())
        .merge(chief_api::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}
