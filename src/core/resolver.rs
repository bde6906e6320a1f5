//! Arbitrates overlapping claims: the most specific allocation wins.

use crate::core::ip;
use crate::domain::model::LocationRow;

/// `broader` is contradicted when `narrower` claims the same prefix or a
/// prefix inside it.
fn contradicts(broader: &LocationRow, narrower: &LocationRow) -> bool {
    if broader.address_family != narrower.address_family {
        return false;
    }

    let duplicate = broader.prefix_bits == narrower.prefix_bits
        && broader.declared_prefix.addr() == narrower.declared_prefix.addr();

    duplicate
        || ip::is_subnet_binary(
            narrower.address_family,
            narrower.ip_binary,
            narrower.prefix_bits,
            broader.ip_binary,
            broader.prefix_bits,
        )
}

/// Orders rows from the least to the most specific publishing range and
/// drops every row contradicted by a row that comes later in that order.
///
/// Validity is tracked beside the rows; the rows themselves are not modified.
/// The returned rows keep the sorted order.
pub fn resolve_priority(mut rows: Vec<LocationRow>) -> Vec<LocationRow> {
    tracing::info!("Validating prefixes ownership");
    rows.sort_by_key(|row| row.ip_range.prefix_len());

    let mut valid = vec![true; rows.len()];
    for n in 1..rows.len() {
        for i in 0..n {
            if valid[i] && contradicts(&rows[i], &rows[n]) {
                valid[i] = false;
            }
        }
    }

    let before = rows.len();
    let resolved: Vec<LocationRow> = rows
        .into_iter()
        .zip(valid)
        .filter_map(|(row, keep)| keep.then_some(row))
        .collect();
    tracing::debug!(
        "Priority resolution dropped {} of {} rows",
        before - resolved.len(),
        before
    );

    resolved
}
