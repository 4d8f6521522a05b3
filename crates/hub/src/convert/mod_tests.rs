// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn asset(kind: AssetKind, mime: &str, file_name: &str, animated: bool) -> Asset {
    Asset {
        kind,
        mime_type: mime.to_owned(),
        file_name: file_name.to_owned(),
        animated,
        content: vec![1, 2, 3, 4],
    }
}

#[yare::parameterized(
    tgs = { AssetKind::Sticker, "application/x-tgsticker", "a.tgs", true, TargetFormat::Gif },
    tgs_upper = { AssetKind::Sticker, "Application/X-TGSticker", "a.tgs", true, TargetFormat::Gif },
    webm_sticker = { AssetKind::Sticker, "video/webm", "a.webm", true, TargetFormat::Gif },
    video_kind = { AssetKind::Video, "application/octet-stream", "clip", false, TargetFormat::Gif },
    mp4 = { AssetKind::Gif, "video/mp4", "anim.mp4", true, TargetFormat::Gif },
    gif = { AssetKind::Gif, "image/gif", "a.gif", true, TargetFormat::Original },
    png = { AssetKind::Image, "image/png", "a.png", false, TargetFormat::Original },
    jpeg = { AssetKind::Image, "image/jpeg", "a.jpg", false, TargetFormat::Original },
    webp = { AssetKind::Sticker, "image/webp", "a.webp", false, TargetFormat::Png },
    app_webp = { AssetKind::Sticker, "application/webp", "a.webp", false, TargetFormat::Png },
    unknown_animated = { AssetKind::Sticker, "application/x-custom", "a.bin", true, TargetFormat::Gif },
    unknown_static = { AssetKind::Image, "image/bmp", "a.bmp", false, TargetFormat::Original },
)]
fn picks_target_format(
    kind: AssetKind,
    mime: &str,
    name: &str,
    animated: bool,
    expected: TargetFormat,
) {
    assert_eq!(target_format(&asset(kind, mime, name, animated)), expected);
}

#[yare::parameterized(
    from_name = { "Sticker.WEBM", "video/mp4", "webm" },
    from_mime_tgs = { "sticker", "application/x-tgsticker", "tgs" },
    from_mime_webm = { "sticker", "video/webm", "webm" },
    dotfile = { ".hidden", "image/webp", "webp" },
    fallback = { "sticker", "application/octet-stream", "bin" },
)]
fn input_suffix_prefers_file_name(name: &str, mime: &str, expected: &str) {
    assert_eq!(input_suffix(&asset(AssetKind::Sticker, mime, name, false)), expected);
}

#[tokio::test]
async fn original_target_passes_through() -> anyhow::Result<()> {
    let converter = FfmpegConverter::new("/nonexistent/ffmpeg", "/nonexistent/lottie");
    let input = asset(AssetKind::Image, "image/png", "a.png", false);
    let output = converter.convert(input.clone(), TargetFormat::Original).await?;
    assert_eq!(output, input);
    Ok(())
}

#[tokio::test]
async fn missing_binary_is_reported() -> anyhow::Result<()> {
    let converter = FfmpegConverter::new("/nonexistent/ffmpeg", "/nonexistent/lottie");
    let input = asset(AssetKind::Sticker, "image/webp", "a.webp", false);
    let result = converter.convert(input, TargetFormat::Png).await;
    assert!(matches!(result, Err(ConversionError::MissingTool { .. })), "got {result:?}");
    Ok(())
}

#[tokio::test]
async fn tgs_falls_back_to_ffmpeg_and_reports_its_failure() -> anyhow::Result<()> {
    // `false` exits 1 for both the lottie step and the ffmpeg fallback.
    let converter = FfmpegConverter::new("false", "/nonexistent/lottie");
    let input = asset(AssetKind::Sticker, "application/x-tgsticker", "a.tgs", true);
    let result = converter.convert(input, TargetFormat::Gif).await;
    match result {
        Err(ConversionError::Failed { tool, .. }) => assert_eq!(tool, "false"),
        other => assert!(matches!(other, Err(ConversionError::Failed { .. })), "got {other:?}"),
    }
    Ok(())
}

#[test]
fn renamed_swaps_extension() {
    let a = asset(AssetKind::Sticker, "video/webm", "cat.sticker.webm", true);
    assert_eq!(a.renamed("gif"), "cat.sticker.gif");
    let b = asset(AssetKind::Sticker, "video/webm", "noext", true);
    assert_eq!(b.renamed("gif"), "noext.gif");
}
