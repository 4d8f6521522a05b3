// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::FeishuGateway;
use crate::binding::Destination;
use crate::gateway::PlatformGateway;
use crate::model::{Asset, AssetKind, Identity, Platform};
use crate::test_support::{ensure_crypto_provider, MockFeishu};

fn gif() -> Asset {
    Asset {
        kind: AssetKind::Gif,
        mime_type: "image/gif".to_owned(),
        file_name: "dance.gif".to_owned(),
        animated: true,
        content: b"GIF89a".to_vec(),
    }
}

fn gateway(mock: &MockFeishu, secret: &str) -> FeishuGateway {
    FeishuGateway::with_base_url("cli_test".to_owned(), secret.to_owned(), mock.base_url())
}

#[tokio::test]
async fn image_is_uploaded_then_sent_to_open_id() -> anyhow::Result<()> {
    ensure_crypto_provider();
    let mock = MockFeishu::start().await?;
    let feishu = gateway(&mock, "s3cret");
    let to = Destination::Identity(Identity::new(Platform::Feishu, "ou_v"));

    feishu.send_asset(&to, &gif()).await?;
    feishu.send_text(&to, "-- batch 1/1 (items 1-1) --").await?;

    // Token fetched once and reused.
    assert_eq!(mock.paths(), ["/auth", "/images", "/messages", "/messages"]);
    let requests = mock.requests();
    assert_eq!(requests[0].body["app_id"], "cli_test");
    assert_eq!(requests[1].body["authorization"], "Bearer t-abc");

    let image = &requests[2].body;
    assert_eq!(image["receive_id"], "ou_v");
    assert_eq!(image["receive_id_type"], "open_id");
    assert_eq!(image["msg_type"], "image");
    let content: serde_json::Value =
        serde_json::from_str(image["content"].as_str().unwrap_or_default())?;
    assert_eq!(content["image_key"], "img_v2_1");

    let text = &requests[3].body;
    assert_eq!(text["msg_type"], "text");
    assert!(text["content"].as_str().is_some_and(|c| c.contains("batch 1/1")));
    Ok(())
}

#[tokio::test]
async fn refuses_destinations_on_other_platforms() -> anyhow::Result<()> {
    ensure_crypto_provider();
    let mock = MockFeishu::start().await?;
    let feishu = gateway(&mock, "s3cret");

    let telegram = Destination::Identity(Identity::new(Platform::Telegram, "42"));
    assert!(feishu.send_text(&telegram, "hi").await.is_err());
    let webhook = Destination::Webhook { url: mock.url("/hook/abc") };
    assert!(feishu.send_asset(&webhook, &gif()).await.is_err());
    assert!(mock.paths().is_empty());
    Ok(())
}

#[tokio::test]
async fn token_rejection_is_reported() -> anyhow::Result<()> {
    ensure_crypto_provider();
    let mock = MockFeishu::start().await?;
    let feishu = gateway(&mock, "wrong");
    let to = Destination::Identity(Identity::new(Platform::Feishu, "ou_v"));

    let result = feishu.send_text(&to, "hi").await;
    assert!(
        result.as_ref().is_err_and(|e| e.to_string().contains("10014")),
        "got {result:?}"
    );
    assert_eq!(mock.paths(), ["/auth"]);
    Ok(())
}

#[tokio::test]
async fn group_uploads_every_image_then_posts_once() -> anyhow::Result<()> {
    ensure_crypto_provider();
    let mock = MockFeishu::start().await?;
    let feishu = gateway(&mock, "s3cret");
    let to = Destination::Identity(Identity::new(Platform::Feishu, "ou_v"));

    feishu.send_group(&to, &[gif(), gif(), gif()]).await?;

    assert_eq!(mock.paths(), ["/auth", "/images", "/images", "/images", "/messages"]);
    let requests = mock.requests();
    let post = &requests[4].body;
    assert_eq!(post["msg_type"], "post");
    let content: serde_json::Value =
        serde_json::from_str(post["content"].as_str().unwrap_or_default())?;
    let lines = content["zh_cn"]["content"].as_array().map(Vec::len);
    assert_eq!(lines, Some(3));
    assert_eq!(content["zh_cn"]["content"][0][0]["image_key"], "img_v2_1");
    Ok(())
}

#[tokio::test]
async fn file_is_uploaded_then_sent_as_attachment() -> anyhow::Result<()> {
    ensure_crypto_provider();
    let mock = MockFeishu::start().await?;
    let feishu = gateway(&mock, "s3cret");
    let to = Destination::Identity(Identity::new(Platform::Feishu, "ou_v"));

    feishu.send_file(&to, "pack-1.zip", b"PK\x05\x06").await?;

    assert_eq!(mock.paths(), ["/auth", "/files", "/messages"]);
    let requests = mock.requests();
    assert_eq!(requests[1].body["authorization"], "Bearer t-abc");
    let message = &requests[2].body;
    assert_eq!(message["msg_type"], "file");
    let content: serde_json::Value =
        serde_json::from_str(message["content"].as_str().unwrap_or_default())?;
    assert_eq!(content["file_key"], "file_v3_1");
    Ok(())
}
