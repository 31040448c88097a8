//! Delta file descriptors and application planning.
//!
//! A delta manifest is a newline-separated list of file names. Names of the
//! form `<prefix>_<start>_<end>.<ext>` describe the changes made to the
//! catalog between two epoch-second timestamps, e.g.
//! `openfoodfacts_products_1700000000_1700086400.json.gz`. Anything else in
//! the manifest is ignored.
//!
//! [`plan_deltas`] turns a manifest and the current watermark into the exact
//! sequence of files to apply: only files ending after the watermark,
//! ascending by end timestamp. That order is mandatory. A later delta may
//! rewrite the same id as an earlier one, and the watermark only advances
//! one file at a time.

use serde::Serialize;
use std::collections::HashSet;

/// One parsed manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaDescriptor {
    pub file_name: String,
    pub start: i64,
    pub end: i64,
}

/// Parse a single manifest entry.
///
/// Returns `None` for blank lines, names that could escape the delta
/// directory (path separators, leading dot), names without the
/// `_<start>_<end>.<ext>` suffix, and ranges where `start > end`.
pub fn parse_delta_name(name: &str) -> Option<DeltaDescriptor> {
    let name = name.trim();
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return None;
    }

    let (stem, ext) = name.split_once('.')?;
    if ext.is_empty() {
        return None;
    }

    let mut parts = stem.rsplitn(3, '_');
    let end = parse_epoch(parts.next()?)?;
    let start = parse_epoch(parts.next()?)?;
    let prefix = parts.next()?;
    if prefix.is_empty() || start > end {
        return None;
    }

    Some(DeltaDescriptor {
        file_name: name.to_string(),
        start,
        end,
    })
}

/// Parse every valid entry of a manifest, in manifest order.
pub fn parse_manifest(manifest: &str) -> Vec<DeltaDescriptor> {
    manifest.lines().filter_map(parse_delta_name).collect()
}

/// Select and order the deltas that still need applying.
///
/// Keeps entries with `end > watermark` (all entries when there is no
/// watermark yet), sorts by `(end, start, file_name)`, and drops repeated
/// file names.
pub fn plan_deltas(manifest: &str, watermark: Option<i64>) -> Vec<DeltaDescriptor> {
    let mut selected: Vec<DeltaDescriptor> = parse_manifest(manifest)
        .into_iter()
        .filter(|d| watermark.map_or(true, |w| d.end > w))
        .collect();

    selected.sort_by(|a, b| {
        a.end
            .cmp(&b.end)
            .then(a.start.cmp(&b.start))
            .then_with(|| a.file_name.cmp(&b.file_name))
    });

    let mut seen = HashSet::new();
    selected.retain(|d| seen.insert(d.file_name.clone()));
    selected
}

fn parse_epoch(s: &str) -> Option<i64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
