// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::binding::store::MemoryStore;
use crate::clock::ManualClock;
use crate::model::Platform;

const TTL: u64 = 600;
const HOOK: &str = "https://open.feishu.cn/open-apis/bot/v2/hook/test_webhook";

fn tg(id: &str) -> Identity {
    Identity::new(Platform::Telegram, id)
}

fn fs(id: &str) -> Identity {
    Identity::new(Platform::Feishu, id)
}

fn registry_with_clock() -> anyhow::Result<(BindingRegistry, Arc<ManualClock>)> {
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let registry = BindingRegistry::open(
        Arc::new(MemoryStore::new()),
        clock.clone(),
        TTL,
        WebhookPolicy::default(),
    )?;
    Ok((registry, clock))
}

async fn bind(
    registry: &BindingRegistry,
    owner: &Identity,
    requester: &Identity,
) -> anyhow::Result<Binding> {
    let token = registry.issue_or_reuse_token(owner).await?;
    Ok(registry.consume_token(&token.code, requester).await?)
}

#[tokio::test]
async fn bind_flow_routes_both_directions() -> anyhow::Result<()> {
    let (registry, _) = registry_with_clock()?;
    let binding = bind(&registry, &tg("tg_user_1"), &fs("ou_xxx")).await?;

    assert_eq!(binding.destination, Destination::Identity(tg("tg_user_1")));
    assert_eq!(
        registry.resolve_destination(&tg("tg_user_1")).await,
        Some(Destination::Identity(fs("ou_xxx")))
    );
    assert_eq!(
        registry.resolve_destination(&fs("ou_xxx")).await,
        Some(Destination::Identity(tg("tg_user_1")))
    );
    Ok(())
}

#[tokio::test]
async fn token_is_reused_within_ttl() -> anyhow::Result<()> {
    let (registry, clock) = registry_with_clock()?;
    let first = registry.issue_or_reuse_token(&tg("a")).await?;
    clock.advance(TTL - 1);
    let second = registry.issue_or_reuse_token(&tg("a")).await?;
    assert_eq!(first.code, second.code);
    assert_eq!(first.ttl_secs(), TTL);
    assert_eq!(first.code.len(), 10);

    // A different owner gets its own token.
    let other = registry.issue_or_reuse_token(&tg("b")).await?;
    assert_ne!(other.code, first.code);
    Ok(())
}

#[tokio::test]
async fn new_token_after_expiry_or_consumption() -> anyhow::Result<()> {
    let (registry, clock) = registry_with_clock()?;
    let first = registry.issue_or_reuse_token(&tg("a")).await?;
    clock.advance(TTL);
    let second = registry.issue_or_reuse_token(&tg("a")).await?;
    assert_ne!(first.code, second.code);

    registry.consume_token(&second.code, &fs("x")).await?;
    let third = registry.issue_or_reuse_token(&tg("a")).await?;
    assert_ne!(third.code, second.code);
    Ok(())
}

#[tokio::test]
async fn token_expires_at_ttl_instant() -> anyhow::Result<()> {
    let (registry, clock) = registry_with_clock()?;
    let token = registry.issue_or_reuse_token(&tg("a")).await?;
    clock.advance(TTL);
    assert_eq!(
        registry.consume_token(&token.code, &fs("x")).await,
        Err(BindError::TokenExpired)
    );
    assert_eq!(registry.resolve_destination(&fs("x")).await, None);
    Ok(())
}

#[tokio::test]
async fn scenario_bind_then_expired_retry() -> anyhow::Result<()> {
    let (registry, clock) = registry_with_clock()?;
    let token = registry.issue_or_reuse_token(&tg("x_user")).await?;
    clock.advance(30);
    registry.consume_token(&token.code.to_lowercase(), &fs("y_user")).await?;
    assert_eq!(
        registry.resolve_destination(&fs("y_user")).await,
        Some(Destination::Identity(tg("x_user")))
    );

    clock.advance(571);
    assert_eq!(
        registry.consume_token(&token.code, &fs("y_user")).await,
        Err(BindError::TokenExpired)
    );
    Ok(())
}

#[tokio::test]
async fn token_is_single_use() -> anyhow::Result<()> {
    let (registry, _) = registry_with_clock()?;
    let token = registry.issue_or_reuse_token(&tg("tg_user_2")).await?;
    registry.consume_token(&token.code, &fs("ou_aaa")).await?;
    for _ in 0..3 {
        assert_eq!(
            registry.consume_token(&token.code, &fs("ou_bbb")).await,
            Err(BindError::TokenAlreadyConsumed)
        );
    }
    assert_eq!(
        registry.resolve_destination(&tg("tg_user_2")).await,
        Some(Destination::Identity(fs("ou_aaa")))
    );
    Ok(())
}

#[tokio::test]
async fn unknown_code_is_not_found() -> anyhow::Result<()> {
    let (registry, _) = registry_with_clock()?;
    assert_eq!(
        registry.consume_token("NOPE", &fs("x")).await,
        Err(BindError::TokenNotFound)
    );
    Ok(())
}

#[tokio::test]
async fn self_bind_rejected_regardless_of_validity() -> anyhow::Result<()> {
    let (registry, clock) = registry_with_clock()?;
    let owner = tg("me");
    let token = registry.issue_or_reuse_token(&owner).await?;
    assert_eq!(
        registry.consume_token(&token.code, &owner).await,
        Err(BindError::SelfBindRejected)
    );

    // Still self-bind after the token is consumed by someone else and expired.
    registry.consume_token(&token.code, &fs("other")).await?;
    clock.advance(TTL * 2);
    assert_eq!(
        registry.consume_token(&token.code, &owner).await,
        Err(BindError::SelfBindRejected)
    );
    Ok(())
}

#[tokio::test]
async fn rebinding_requester_supersedes_previous_peer() -> anyhow::Result<()> {
    let (registry, _) = registry_with_clock()?;
    bind(&registry, &tg("tg_a"), &fs("ou_user")).await?;
    let second = bind(&registry, &tg("tg_b"), &fs("ou_user")).await?;

    assert_eq!(second.previous, Some(Destination::Identity(tg("tg_a"))));
    assert_eq!(
        registry.resolve_destination(&fs("ou_user")).await,
        Some(Destination::Identity(tg("tg_b")))
    );
    assert_eq!(
        registry.resolve_destination(&tg("tg_b")).await,
        Some(Destination::Identity(fs("ou_user")))
    );
    assert_eq!(registry.resolve_destination(&tg("tg_a")).await, None);
    Ok(())
}

#[tokio::test]
async fn rebinding_owner_displaces_old_account() -> anyhow::Result<()> {
    let (registry, _) = registry_with_clock()?;
    bind(&registry, &tg("tg_x"), &fs("ou_old")).await?;
    bind(&registry, &tg("tg_x"), &fs("ou_new")).await?;

    assert_eq!(
        registry.resolve_destination(&tg("tg_x")).await,
        Some(Destination::Identity(fs("ou_new")))
    );
    assert_eq!(registry.resolve_destination(&fs("ou_old")).await, None);
    Ok(())
}

#[tokio::test]
async fn binding_overwrite_is_last_writer_wins() -> anyhow::Result<()> {
    let (registry, _) = registry_with_clock()?;
    let a = fs("a");
    bind(&registry, &tg("b"), &a).await?;
    bind(&registry, &tg("c"), &a).await?;
    assert_eq!(registry.resolve_destination(&a).await, Some(Destination::Identity(tg("c"))));
    Ok(())
}

#[tokio::test]
async fn switch_from_bot_to_webhook() -> anyhow::Result<()> {
    let (registry, _) = registry_with_clock()?;
    bind(&registry, &tg("tg_switch"), &fs("ou_switch_old")).await?;

    let binding = registry.set_webhook_destination(&tg("tg_switch"), HOOK).await?;
    assert_eq!(binding.previous, Some(Destination::Identity(fs("ou_switch_old"))));
    assert_eq!(
        registry.resolve_destination(&tg("tg_switch")).await,
        Some(Destination::Webhook { url: HOOK.to_owned() })
    );
    assert_eq!(registry.resolve_destination(&fs("ou_switch_old")).await, None);
    Ok(())
}

#[tokio::test]
async fn switch_from_webhook_to_bot() -> anyhow::Result<()> {
    let (registry, _) = registry_with_clock()?;
    registry.set_webhook_destination(&tg("tg_back"), HOOK).await?;
    bind(&registry, &tg("tg_back"), &fs("ou_new")).await?;

    assert_eq!(
        registry.resolve_destination(&tg("tg_back")).await,
        Some(Destination::Identity(fs("ou_new")))
    );
    Ok(())
}

#[tokio::test]
async fn webhook_host_outside_allow_list_is_rejected() -> anyhow::Result<()> {
    let (registry, _) = registry_with_clock()?;
    let err = registry
        .set_webhook_destination(&tg("t"), "https://evil.com/open-apis/bot/v2/hook/x")
        .await;
    assert!(matches!(err, Err(BindError::WebhookHostNotAllowed { .. })));
    assert_eq!(registry.resolve_destination(&tg("t")).await, None);
    Ok(())
}

#[tokio::test]
async fn purge_keeps_recently_expired_tokens() -> anyhow::Result<()> {
    let (registry, clock) = registry_with_clock()?;
    let token = registry.issue_or_reuse_token(&tg("a")).await?;
    clock.advance(TTL + 60);
    assert_eq!(registry.purge_expired().await?, 0);
    assert_eq!(
        registry.consume_token(&token.code, &fs("x")).await,
        Err(BindError::TokenExpired)
    );

    clock.advance(EXPIRED_TOKEN_GRACE_SECS);
    assert_eq!(registry.purge_expired().await?, 1);
    assert_eq!(
        registry.consume_token(&token.code, &fs("x")).await,
        Err(BindError::TokenNotFound)
    );
    Ok(())
}

#[tokio::test]
async fn state_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bindings.json");
    let clock = Arc::new(ManualClock::new(1_000));
    let open = || {
        BindingRegistry::open(
            Arc::new(crate::binding::store::JsonFileStore::new(&path)),
            clock.clone(),
            TTL,
            WebhookPolicy::default(),
        )
    };

    let registry = open()?;
    let pending = registry.issue_or_reuse_token(&tg("later")).await?;
    bind(&registry, &tg("tg"), &fs("ou")).await?;
    drop(registry);

    let reopened = open()?;
    assert_eq!(
        reopened.resolve_destination(&tg("tg")).await,
        Some(Destination::Identity(fs("ou")))
    );
    assert_eq!(reopened.issue_or_reuse_token(&tg("later")).await?.code, pending.code);
    Ok(())
}

struct FailingStore;

impl BindingStore for FailingStore {
    fn load(&self) -> anyhow::Result<BindingSnapshot> {
        Ok(BindingSnapshot::default())
    }

    fn save(&self, _snapshot: &BindingSnapshot) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }
}

#[tokio::test]
async fn failed_save_leaves_state_untouched() -> anyhow::Result<()> {
    let registry = BindingRegistry::open(
        Arc::new(FailingStore),
        Arc::new(ManualClock::new(0)),
        TTL,
        WebhookPolicy::default(),
    )?;
    let err = registry.set_webhook_destination(&tg("t"), HOOK).await;
    assert!(matches!(err, Err(BindError::Store(_))));
    assert_eq!(registry.resolve_destination(&tg("t")).await, None);
    Ok(())
}

#[tokio::test]
async fn concurrent_consumers_only_one_wins() -> anyhow::Result<()> {
    let (registry, _) = registry_with_clock()?;
    let registry = Arc::new(registry);
    let token = registry.issue_or_reuse_token(&tg("owner")).await?;

    let mut handles = Vec::new();
    for i in 0..8 {
        let registry = Arc::clone(&registry);
        let code = token.code.clone();
        handles.push(tokio::spawn(async move {
            registry.consume_token(&code, &fs(&format!("ou_{i}"))).await
        }));
    }
    let mut wins = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => wins += 1,
            Err(e) => assert_eq!(e, BindError::TokenAlreadyConsumed),
        }
    }
    assert_eq!(wins, 1);
    Ok(())
}
