// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::WebhookGateway;
use crate::binding::Destination;
use crate::gateway::feishu::FeishuGateway;
use crate::gateway::PlatformGateway;
use crate::model::{Asset, AssetKind, Identity, Platform};
use crate::test_support::{ensure_crypto_provider, MockFeishu};

fn png() -> Asset {
    Asset {
        kind: AssetKind::Image,
        mime_type: "image/png".to_owned(),
        file_name: "cat.png".to_owned(),
        animated: false,
        content: vec![0x89, b'P', b'N', b'G'],
    }
}

#[tokio::test]
async fn text_is_posted_as_text_message() -> anyhow::Result<()> {
    ensure_crypto_provider();
    let mock = MockFeishu::start().await?;
    let webhook = WebhookGateway::new(None);

    webhook.send_text(&Destination::Webhook { url: mock.url("/hook/abc") }, "hello").await?;
    webhook.send_text(&Destination::Webhook { url: mock.url("/hook/legacy") }, "again").await?;

    let requests = mock.requests();
    assert_eq!(mock.paths(), ["/hook/abc", "/hook/legacy"]);
    assert_eq!(
        requests[0].body,
        serde_json::json!({"msg_type": "text", "content": {"text": "hello"}})
    );
    Ok(())
}

#[tokio::test]
async fn non_zero_code_is_an_error() -> anyhow::Result<()> {
    ensure_crypto_provider();
    let mock = MockFeishu::start().await?;
    let webhook = WebhookGateway::new(None);

    let result = webhook.send_text(&Destination::Webhook { url: mock.url("/hook/bad") }, "x").await;
    assert!(result.as_ref().is_err_and(|e| e.to_string().contains("19024")), "got {result:?}");
    Ok(())
}

#[tokio::test]
async fn image_needs_an_uploader() -> anyhow::Result<()> {
    ensure_crypto_provider();
    let mock = MockFeishu::start().await?;
    let webhook = WebhookGateway::new(None);

    let to = Destination::Webhook { url: mock.url("/hook/abc") };
    let result = webhook.send_asset(&to, &png()).await;
    assert!(result.is_err());
    assert!(mock.paths().is_empty());
    Ok(())
}

#[tokio::test]
async fn image_is_uploaded_through_the_bot_then_posted() -> anyhow::Result<()> {
    ensure_crypto_provider();
    let mock = MockFeishu::start().await?;
    let uploader = Arc::new(FeishuGateway::with_base_url(
        "cli_test".to_owned(),
        "s3cret".to_owned(),
        mock.base_url(),
    ));
    let webhook = WebhookGateway::new(Some(uploader));

    webhook.send_asset(&Destination::Webhook { url: mock.url("/hook/abc") }, &png()).await?;

    assert_eq!(mock.paths(), ["/auth", "/images", "/hook/abc"]);
    let posted = &mock.requests()[2].body;
    assert_eq!(posted["msg_type"], "image");
    assert_eq!(posted["content"]["image_key"], "img_v2_1");
    Ok(())
}

#[tokio::test]
async fn identity_destinations_are_refused() -> anyhow::Result<()> {
    ensure_crypto_provider();
    let webhook = WebhookGateway::new(None);
    let to = Destination::Identity(Identity::new(Platform::Feishu, "ou_v"));
    assert!(webhook.send_text(&to, "hi").await.is_err());
    Ok(())
}

#[tokio::test]
async fn groups_and_files_are_refused_without_posting() -> anyhow::Result<()> {
    ensure_crypto_provider();
    let mock = MockFeishu::start().await?;
    let webhook = WebhookGateway::new(None);
    let to = Destination::Webhook { url: mock.url("/hook/abc") };

    let group = webhook.send_group(&to, &[png(), png()]).await;
    assert!(group.as_ref().is_err_and(|e| e.to_string().contains("image groups")), "{group:?}");
    let file = webhook.send_file(&to, "pack.zip", b"PK").await;
    assert!(file.as_ref().is_err_and(|e| e.to_string().contains("files")), "{file:?}");
    assert!(mock.paths().is_empty());
    Ok(())
}
