// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Media normalization so destinations receive formats they can render.
//!
//! Telegram sends TGS (Lottie), WebM/MP4 and WebP stickers; Feishu renders
//! GIF, PNG and JPEG. Conversion shells out to `ffmpeg` and `lottie_convert.py`
//! inside a scoped temporary directory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use futures_util::future::BoxFuture;
use tokio::process::Command;

use crate::model::{Asset, AssetKind};

const TGS_MIME: &str = "application/x-tgsticker";

/// Transparency-preserving palette GIF at 15 fps, 512px wide.
const GIF_TRANSPARENT_FILTER: &str = "[0:v]format=rgba,fps=15,scale=512:-1:flags=lanczos,\
split[s0][s1];[s0]palettegen=stats_mode=diff:reserve_transparent=on[p];\
[s1][p]paletteuse=dither=bayer:bayer_scale=5:alpha_threshold=128";

/// Output format a destination should receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    Gif,
    Png,
    Original,
}

/// Pick the target format for `asset` from its MIME type and kind.
pub fn target_format(asset: &Asset) -> TargetFormat {
    let mime = asset.mime_type.to_ascii_lowercase();
    if mime == TGS_MIME {
        return TargetFormat::Gif;
    }
    if asset.kind == AssetKind::Video || mime.starts_with("video/") {
        return TargetFormat::Gif;
    }
    match mime.as_str() {
        "image/png" | "image/jpeg" | "image/jpg" | "image/gif" => TargetFormat::Original,
        "image/webp" | "application/webp" => TargetFormat::Png,
        _ if asset.animated => TargetFormat::Gif,
        _ => TargetFormat::Original,
    }
}

/// Conversion failure for a single asset.
#[derive(Debug)]
pub enum ConversionError {
    /// The converter binary could not be started.
    MissingTool { tool: String, detail: String },
    /// The converter ran and exited non-zero.
    Failed { tool: String, detail: String },
    Io(std::io::Error),
}

impl ConversionError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingTool { .. } => "MISSING_TOOL",
            Self::Failed { .. } => "CONVERSION_FAILED",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTool { tool, detail } => write!(f, "cannot run {tool}: {detail}"),
            Self::Failed { tool, detail } => write!(f, "{tool} failed: {detail}"),
            Self::Io(e) => write!(f, "conversion i/o: {e}"),
        }
    }
}

impl std::error::Error for ConversionError {}

impl From<std::io::Error> for ConversionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Converts an asset into a [`TargetFormat`].
pub trait MediaConverter: Send + Sync {
    fn convert<'a>(
        &'a self,
        asset: Asset,
        target: TargetFormat,
    ) -> BoxFuture<'a, Result<Asset, ConversionError>>;
}

/// Converter backed by external `ffmpeg` and `lottie_convert.py` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    ffmpeg: PathBuf,
    lottie: PathBuf,
}

impl Default for FfmpegConverter {
    fn default() -> Self {
        Self::new("ffmpeg", "lottie_convert.py")
    }
}

impl FfmpegConverter {
    pub fn new(ffmpeg: impl Into<PathBuf>, lottie: impl Into<PathBuf>) -> Self {
        Self { ffmpeg: ffmpeg.into(), lottie: lottie.into() }
    }

    async fn to_gif(&self, asset: Asset) -> Result<Asset, ConversionError> {
        let dir = scratch_dir()?;
        let suffix = input_suffix(&asset);
        let input = dir.path().join(format!("input.{suffix}"));
        let output = dir.path().join("output.gif");
        tokio::fs::write(&input, &asset.content).await?;

        if asset.mime_type.eq_ignore_ascii_case(TGS_MIME) {
            let mut lottie = Command::new(&self.lottie);
            lottie.arg(&input).arg(&output);
            if let Err(e) = run(lottie).await {
                tracing::warn!(file = %asset.file_name, err = %e, "lottie conversion failed, falling back to ffmpeg");
                run(self.ffmpeg_gif(&input, &output, false)).await?;
            }
        } else {
            run(self.ffmpeg_gif(&input, &output, suffix == "webm")).await?;
        }

        let content = tokio::fs::read(&output).await?;
        Ok(Asset {
            kind: AssetKind::Gif,
            mime_type: "image/gif".to_owned(),
            file_name: asset.renamed("gif"),
            animated: true,
            content,
        })
    }

    fn ffmpeg(&self) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-y", "-loglevel", "error"]);
        cmd
    }

    fn ffmpeg_gif(&self, input: &Path, output: &Path, vp9: bool) -> Command {
        let mut cmd = self.ffmpeg();
        // VP9 with alpha only keeps its transparency through libvpx.
        if vp9 {
            cmd.args(["-c:v", "libvpx-vp9"]);
        }
        cmd.arg("-i").arg(input);
        cmd.args(["-filter_complex", GIF_TRANSPARENT_FILTER, "-loop", "0"]);
        cmd.arg(output);
        cmd
    }

    async fn to_png(&self, asset: Asset) -> Result<Asset, ConversionError> {
        let dir = scratch_dir()?;
        let input = dir.path().join(format!("input.{}", input_suffix(&asset)));
        let output = dir.path().join("output.png");
        tokio::fs::write(&input, &asset.content).await?;

        let mut cmd = self.ffmpeg();
        cmd.arg("-i").arg(&input).args(["-pix_fmt", "rgba"]).arg(&output);
        run(cmd).await?;

        let content = tokio::fs::read(&output).await?;
        Ok(Asset {
            kind: AssetKind::Image,
            mime_type: "image/png".to_owned(),
            file_name: asset.renamed("png"),
            animated: false,
            content,
        })
    }
}

impl MediaConverter for FfmpegConverter {
    fn convert<'a>(
        &'a self,
        asset: Asset,
        target: TargetFormat,
    ) -> BoxFuture<'a, Result<Asset, ConversionError>> {
        Box::pin(async move {
            tracing::debug!(file = %asset.file_name, mime = %asset.mime_type, ?target, "converting asset");
            match target {
                TargetFormat::Original => Ok(asset),
                TargetFormat::Gif => self.to_gif(asset).await,
                TargetFormat::Png => self.to_png(asset).await,
            }
        })
    }
}

/// Temporary directory removed when dropped, on success and failure alike.
fn scratch_dir() -> Result<tempfile::TempDir, ConversionError> {
    Ok(tempfile::Builder::new().prefix("stickerhub-").tempdir()?)
}

/// Input file extension from the file name, else from the MIME type.
fn input_suffix(asset: &Asset) -> String {
    if let Some((stem, ext)) = asset.file_name.rsplit_once('.') {
        if !stem.is_empty() && !ext.is_empty() {
            return ext.to_ascii_lowercase();
        }
    }
    match asset.mime_type.to_ascii_lowercase().as_str() {
        TGS_MIME => "tgs",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
    .to_owned()
}

async fn run(mut cmd: Command) -> Result<(), ConversionError> {
    let tool = cmd.as_std().get_program().to_string_lossy().into_owned();
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ConversionError::MissingTool { tool: tool.clone(), detail: e.to_string() })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        let detail = if stderr.is_empty() { output.status.to_string() } else { stderr };
        return Err(ConversionError::Failed { tool, detail });
    }
    Ok(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
