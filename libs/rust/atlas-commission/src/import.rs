//! Batch import planning
//!
//! Pure dedup and accounting for an import run; persistence and the audit
//! entry live in [`crate::db`]. Duplicate protection is two-level: the file
//! SHA-256 short-circuits a re-upload of the whole file, the per-row
//! fingerprint skips rows already imported by any earlier batch.

use std::collections::HashSet;

use crate::sheet::SheetRow;

/// Counters reported back for one import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ImportCounters {
    pub total: i64,
    pub imported: i64,
    pub skipped: i64,
    pub errors: i64,
}

/// The plan for one batch: which rows to insert, which to skip.
#[derive(Debug)]
pub struct ImportPlan<'a> {
    pub to_insert: Vec<&'a SheetRow>,
    pub counters: ImportCounters,
}

/// Reason a row was skipped, for the row-level log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `(carrier, row_hash)` already imported by an earlier batch.
    Duplicate,
    /// Same fingerprint appears twice within this batch.
    DuplicateInBatch,
}

/// Decide row by row what an import of `rows` does, given the set of row
/// hashes already present for this carrier.
///
/// Importing the same parsed file twice therefore yields zero inserts.
pub fn plan_import<'a>(
    rows: &'a [SheetRow],
    existing_hashes: &HashSet<String>,
    parse_errors: usize,
) -> (ImportPlan<'a>, Vec<(i64, SkipReason)>) {
    let mut seen_in_batch: HashSet<&str> = HashSet::new();
    let mut to_insert = Vec::new();
    let mut skipped_rows = Vec::new();

    for row in rows {
        if existing_hashes.contains(&row.row_hash) {
            skipped_rows.push((row.source_row, SkipReason::Duplicate));
            continue;
        }
        if !seen_in_batch.insert(row.row_hash.as_str()) {
            skipped_rows.push((row.source_row, SkipReason::DuplicateInBatch));
            continue;
        }
        to_insert.push(row);
    }

    let counters = ImportCounters {
        total: rows.len() as i64 + parse_errors as i64,
        imported: to_insert.len() as i64,
        skipped: skipped_rows.len() as i64,
        errors: parse_errors as i64,
    };

    (
        ImportPlan {
            to_insert,
            counters,
        },
        skipped_rows,
    )
}
