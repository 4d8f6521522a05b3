// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ZIP packing for [`PackMode::Zip`](super::PackMode::Zip) deliveries.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::model::Asset;

pub const ARCHIVE_MIME: &str = "application/zip";

/// Archive file name for a task: `pack-<first uuid group>.zip`.
pub fn archive_name(task_id: &str) -> String {
    let short = task_id.split('-').next().filter(|s| !s.is_empty()).unwrap_or(task_id);
    format!("pack-{short}.zip")
}

/// Pack `assets` into a deflated ZIP, in order. Colliding file names get a
/// `_N` suffix before the extension.
pub fn build_archive(assets: &[Asset]) -> anyhow::Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut seen = HashSet::new();
    for asset in assets {
        let name = unique_name(&asset.file_name, &seen);
        writer.start_file(name.as_str(), options)?;
        writer.write_all(&asset.content)?;
        seen.insert(name);
    }
    Ok(writer.finish()?.into_inner())
}

fn unique_name(name: &str, seen: &HashSet<String>) -> String {
    if !seen.contains(name) {
        return name.to_owned();
    }
    let (stem, suffix) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };
    (1..)
        .map(|n| format!("{stem}_{n}{suffix}"))
        .find(|candidate| !seen.contains(candidate))
        .unwrap_or_else(|| name.to_owned())
}

#[cfg(test)]
#[path = "archive_tests.rs"]
mod tests;
