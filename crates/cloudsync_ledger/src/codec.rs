//! JSON codec for the ledger document.

use crate::entry::Entry;
use crate::error::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

/// Value of the document's `name` field.
pub const LEDGER_NAME: &str = "cloudsync";

#[derive(Serialize)]
struct DocumentRef<'a> {
    name: &'a str,
    snapshots: &'a [Entry],
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    snapshots: Vec<Entry>,
}

/// Encodes entries as a ledger document.
///
/// Entries are written in the order given. An empty slice still produces the
/// wrapper object: `{"name":"cloudsync","snapshots":[]}`.
pub fn encode(entries: &[Entry]) -> LedgerResult<String> {
    serde_json::to_string(&DocumentRef {
        name: LEDGER_NAME,
        snapshots: entries,
    })
    .map_err(LedgerError::Encode)
}

/// Strictly decodes a ledger document.
///
/// A blank document decodes to no entries. If a name appears more than once
/// only its first entry is kept.
pub fn try_decode(document: &str) -> LedgerResult<Vec<Entry>> {
    if document.trim().is_empty() {
        return Ok(Vec::new());
    }

    let parsed: Document = serde_json::from_str(document).map_err(LedgerError::Decode)?;

    let mut seen = HashSet::with_capacity(parsed.snapshots.len());
    let mut entries = Vec::with_capacity(parsed.snapshots.len());
    for entry in parsed.snapshots {
        if seen.insert(entry.name.clone()) {
            entries.push(entry);
        } else {
            warn!(collection = %entry.name, "duplicate ledger entry dropped");
        }
    }
    Ok(entries)
}

/// Decodes a ledger document, treating anything unreadable as "no prior state".
///
/// Callers can always hand this a possibly-absent document.
pub fn decode(document: &str) -> Vec<Entry> {
    match try_decode(document) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "ignoring unreadable ledger");
            Vec::new()
        }
    }
}

/// Builds a fresh ledger, every entry `READY`, from discovered collection sizes.
///
/// Entries come out largest first; equal sizes are ordered by name so the
/// result does not depend on the iteration order of the input map.
pub fn from_sizes<I, S>(sizes: I) -> Vec<Entry>
where
    I: IntoIterator<Item = (S, u64)>,
    S: Into<String>,
{
    let mut entries: Vec<Entry> = sizes
        .into_iter()
        .map(|(name, size)| Entry::ready(name, size))
        .collect();
    entries.sort_by(|a, b| {
        b.size_in_bytes
            .cmp(&a.size_in_bytes)
            .then_with(|| a.name.cmp(&b.name))
    });
    entries
}
