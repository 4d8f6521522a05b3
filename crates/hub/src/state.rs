// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::binding::registry::BindingRegistry;
use crate::delivery::DeliveryManager;
use crate::relay::RelayService;

/// Shared hub state handed to every HTTP handler and background task.
pub struct HubState {
    pub registry: Arc<BindingRegistry>,
    pub delivery: Arc<DeliveryManager>,
    pub relay: RelayService,
    /// Bearer token required on every route except health.
    pub auth_token: Option<String>,
    pub shutdown: CancellationToken,
}
