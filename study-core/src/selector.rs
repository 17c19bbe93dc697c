use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::TermRecord;
use crate::terms::TermTable;

/// Draw one record uniformly at random.
///
/// Returns `None` for an empty table or one without `TERM`/`SCHEMA` columns.
/// With a seed the draw is deterministic for that (table, seed) pair.
pub fn select(table: &TermTable, seed: Option<u64>) -> Option<TermRecord> {
    if table.is_empty() || !table.has_required_columns() {
        return None;
    }

    let index = match seed {
        Some(seed) => StdRng::seed_from_u64(seed).gen_range(0..table.len()),
        None => rand::thread_rng().gen_range(0..table.len()),
    };
    table.record(index)
}
