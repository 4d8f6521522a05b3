// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Destination lookup shared by the single-asset and pack delivery paths.

use std::sync::Arc;

use crate::binding::registry::BindingRegistry;
use crate::binding::Destination;
use crate::model::Identity;

/// Read-only view over the binding registry.
///
/// Both relay paths go through the same resolver so a single send and a pack
/// send issued at the same instant always agree on the destination.
#[derive(Clone)]
pub struct DestinationResolver {
    registry: Arc<BindingRegistry>,
}

impl DestinationResolver {
    pub fn new(registry: Arc<BindingRegistry>) -> Self {
        Self { registry }
    }

    /// Current destination for `source`, or `None` when it is unbound.
    pub async fn resolve(&self, source: &Identity) -> Option<Destination> {
        let destination = self.registry.resolve_destination(source).await;
        tracing::debug!(
            source = %source,
            hit = destination.is_some(),
            mode = destination.as_ref().map(Destination::mode).unwrap_or("unbound"),
            "destination lookup"
        );
        destination
    }
}
