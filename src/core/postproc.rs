// Post-processing of marked fields
//
// Stage 1 records which byte offsets need rewriting; this pass rewrites only
// the fields containing those offsets (`""` → `"`, `\r\n` → `\n`). Every
// other field goes through untouched. The containing field is found by
// binary search over the column slab, which is in ascending offset order by
// construction.

use super::stage1::PostProcMark;
use super::stage2::Slabs;

/// Rewrite the fields named by `marks` inside `records`.
///
/// `records` holds the chunk's rows starting at index `base` (earlier
/// entries come from the split row and are never marked). Marks that fall
/// outside the parsed payload (header or trailer bytes) find no column and
/// are ignored.
pub fn apply(records: &mut [Vec<String>], base: usize, slabs: &Slabs, marks: &[PostProcMark]) {
    if marks.is_empty() {
        return;
    }

    // Several marks can name the same field; rewriting it twice would
    // corrupt quad-quote content, so dedupe first.
    let mut targets: Vec<(usize, usize)> = marks
        .iter()
        .filter_map(|mark| locate(slabs, mark.offset))
        .collect();
    targets.sort_unstable();
    targets.dedup();

    for (row_idx, col_idx) in targets {
        let field = &mut records[base + row_idx][col_idx];
        if field.contains("\"\"") {
            *field = field.replace("\"\"", "\"");
        }
        if field.contains("\r\n") {
            *field = field.replace("\r\n", "\n");
        }
    }
}

/// Map a byte offset to the (row, column-within-row) containing it.
fn locate(slabs: &Slabs, offset: usize) -> Option<(usize, usize)> {
    let ci = slabs
        .columns
        .partition_point(|c| (c.offset as usize) <= offset)
        .checked_sub(1)?;
    let col = &slabs.columns[ci];
    if offset >= col.offset as usize + col.len as usize {
        return None;
    }
    let ri = slabs
        .rows
        .partition_point(|r| r.first_column as usize <= ci)
        .checked_sub(1)?;
    Some((ri, ci - slabs.rows[ri].first_column as usize))
}
