// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binding registry: magic tokens, identity links, and webhook destinations.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::Mutex;

use crate::binding::store::{BindingSnapshot, BindingStore};
use crate::binding::webhook::WebhookPolicy;
use crate::binding::{BindError, Binding, BindingRecord, Destination, MagicToken};
use crate::clock::Clock;
use crate::model::Identity;

/// Token alphabet: uppercase letters and digits without look-alikes
/// (`0`/`O`, `1`/`I`). 32 symbols, 5 bits each.
const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Token length in symbols (50 bits).
const CODE_LEN: usize = 10;

/// Attempts at drawing a code that does not collide with a stored one.
const CODE_ATTEMPTS: usize = 10;

/// Expired tokens are kept this long so late attempts still report
/// `TokenExpired` rather than `TokenNotFound`.
const EXPIRED_TOKEN_GRACE_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Default, Clone)]
struct RegistryState {
    bindings: HashMap<Identity, BindingRecord>,
    tokens: HashMap<String, MagicToken>,
}

impl RegistryState {
    fn from_snapshot(snapshot: BindingSnapshot) -> Self {
        Self {
            bindings: snapshot.bindings.into_iter().map(|r| (r.identity.clone(), r)).collect(),
            tokens: snapshot.tokens.into_iter().map(|t| (t.code.clone(), t)).collect(),
        }
    }

    fn snapshot(&self) -> BindingSnapshot {
        let mut bindings: Vec<_> = self.bindings.values().cloned().collect();
        bindings.sort_by(|a, b| a.identity.to_string().cmp(&b.identity.to_string()));
        let mut tokens: Vec<_> = self.tokens.values().cloned().collect();
        tokens.sort_by_key(|t| (t.created_at, t.code.clone()));
        BindingSnapshot { bindings, tokens }
    }

    /// Remove `identity`'s binding, and its peer's back-link if the peer
    /// still points at `identity`.
    fn detach(&mut self, identity: &Identity) -> Option<Destination> {
        let previous = self.bindings.remove(identity)?.destination;
        if let Destination::Identity(peer) = &previous {
            let points_back = self.bindings.get(peer).is_some_and(|r| {
                matches!(&r.destination, Destination::Identity(i) if i == identity)
            });
            if points_back {
                self.bindings.remove(peer);
            }
        }
        Some(previous)
    }

    fn set(&mut self, identity: &Identity, destination: Destination, now: u64) {
        self.bindings.insert(
            identity.clone(),
            BindingRecord { identity: identity.clone(), destination, updated_at: now },
        );
    }

    fn live_token_for(&self, owner: &Identity, now: u64) -> Option<&MagicToken> {
        self.tokens
            .values()
            .filter(|t| &t.owner == owner && t.is_live(now))
            .max_by_key(|t| t.created_at)
    }

    fn new_code(&self) -> Result<String, BindError> {
        let mut rng = rand::rng();
        for _ in 0..CODE_ATTEMPTS {
            let code: String = (0..CODE_LEN)
                .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
                .collect();
            if !self.tokens.contains_key(&code) {
                return Ok(code);
            }
        }
        Err(BindError::Store("failed to generate a unique bind code".to_owned()))
    }
}

/// Owns bindings and pending tokens.
///
/// All mutations run under one async mutex and are persisted before they
/// become visible; a failed save leaves the previous state in place.
pub struct BindingRegistry {
    state: Mutex<RegistryState>,
    store: Arc<dyn BindingStore>,
    clock: Arc<dyn Clock>,
    token_ttl_secs: u64,
    webhook_policy: WebhookPolicy,
}

impl BindingRegistry {
    /// Open the registry, seeding state from the store.
    pub fn open(
        store: Arc<dyn BindingStore>,
        clock: Arc<dyn Clock>,
        token_ttl_secs: u64,
        webhook_policy: WebhookPolicy,
    ) -> anyhow::Result<Self> {
        let snapshot = store.load()?;
        tracing::info!(
            bindings = snapshot.bindings.len(),
            tokens = snapshot.tokens.len(),
            "binding registry loaded"
        );
        Ok(Self {
            state: Mutex::new(RegistryState::from_snapshot(snapshot)),
            store,
            clock,
            token_ttl_secs,
            webhook_policy,
        })
    }

    pub fn token_ttl_secs(&self) -> u64 {
        self.token_ttl_secs
    }

    pub fn webhook_policy(&self) -> &WebhookPolicy {
        &self.webhook_policy
    }

    /// Return the owner's live token, or create one.
    pub async fn issue_or_reuse_token(&self, owner: &Identity) -> Result<MagicToken, BindError> {
        let now = self.clock.now_secs();
        let mut state = self.state.lock().await;
        if let Some(existing) = state.live_token_for(owner, now) {
            tracing::debug!(owner = %owner, "reusing live bind token");
            return Ok(existing.clone());
        }

        let mut next = state.clone();
        let token = MagicToken {
            code: next.new_code()?,
            owner: owner.clone(),
            created_at: now,
            expires_at: now + self.token_ttl_secs,
            consumed: false,
            consumed_at: None,
        };
        next.tokens.insert(token.code.clone(), token.clone());
        self.commit(&mut state, next)?;

        tracing::info!(owner = %owner, expires_at = token.expires_at, "bind token issued");
        Ok(token)
    }

    /// Consume a token and link `requester` with the token's owner.
    pub async fn consume_token(
        &self,
        code: &str,
        requester: &Identity,
    ) -> Result<Binding, BindError> {
        let code = code.trim().to_uppercase();
        let now = self.clock.now_secs();
        let mut state = self.state.lock().await;

        let token = state.tokens.get(&code).ok_or(BindError::TokenNotFound)?;
        if &token.owner == requester {
            return Err(BindError::SelfBindRejected);
        }
        if token.is_expired(now) {
            return Err(BindError::TokenExpired);
        }
        if token.consumed {
            return Err(BindError::TokenAlreadyConsumed);
        }
        let owner = token.owner.clone();

        let mut next = state.clone();
        if let Some(t) = next.tokens.get_mut(&code) {
            t.consumed = true;
            t.consumed_at = Some(now);
        }
        let previous = next.detach(requester);
        let displaced = next.detach(&owner);
        next.set(requester, Destination::Identity(owner.clone()), now);
        next.set(&owner, Destination::Identity(requester.clone()), now);
        self.commit(&mut state, next)?;

        tracing::info!(
            requester = %requester,
            owner = %owner,
            previous = ?previous.as_ref().map(Destination::masked),
            displaced = ?displaced.as_ref().map(Destination::masked),
            "identities bound"
        );
        Ok(Binding {
            requester: requester.clone(),
            destination: Destination::Identity(owner),
            previous,
        })
    }

    /// Route `identity`'s assets to a webhook, replacing any prior binding.
    pub async fn set_webhook_destination(
        &self,
        identity: &Identity,
        url: &str,
    ) -> Result<Binding, BindError> {
        let url = match self.webhook_policy.validate(url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(identity = %identity, err = %e, "webhook bind rejected");
                return Err(e);
            }
        };
        let now = self.clock.now_secs();
        let mut state = self.state.lock().await;

        let mut next = state.clone();
        let previous = next.detach(identity);
        let destination = Destination::Webhook { url };
        next.set(identity, destination.clone(), now);
        self.commit(&mut state, next)?;

        tracing::info!(
            identity = %identity,
            webhook = %destination.masked(),
            previous = ?previous.as_ref().map(Destination::masked),
            "webhook destination bound"
        );
        Ok(Binding { requester: identity.clone(), destination, previous })
    }

    /// Current destination for `identity`, or `None` when unbound.
    pub async fn resolve_destination(&self, identity: &Identity) -> Option<Destination> {
        let state = self.state.lock().await;
        state.bindings.get(identity).map(|r| r.destination.clone())
    }

    /// Drop tokens that expired longer than the grace period ago.
    pub async fn purge_expired(&self) -> anyhow::Result<usize> {
        let now = self.clock.now_secs();
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.tokens.retain(|_, t| t.expires_at.saturating_add(EXPIRED_TOKEN_GRACE_SECS) > now);
        let purged = state.tokens.len() - next.tokens.len();
        if purged > 0 {
            self.commit(&mut state, next)?;
            tracing::debug!(purged, "purged expired bind tokens");
        }
        Ok(purged)
    }

    /// Persist `next` and swap it in.
    fn commit(&self, state: &mut RegistryState, next: RegistryState) -> Result<(), BindError> {
        if let Err(e) = self.store.save(&next.snapshot()) {
            tracing::warn!(err = %e, "failed to persist bindings");
            return Err(BindError::Store(e.to_string()));
        }
        *state = next;
        Ok(())
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
