//! Region merging

use alloc::vec::Vec;

use super::Region;

fn widen(span: &mut Region, other: &Region) {
    span.read |= other.read;
    span.write |= other.write;
    span.execute |= other.execute;
    span.privilege = span.privilege.min(other.privilege);
}

/// Flatten possibly overlapping regions into sorted, disjoint spans
///
/// Each span between two consecutive boundaries gets the union of the
/// permissions of every active region covering it. Neighbouring spans with
/// the same rights are then joined. Ranges no region covers stay uncovered.
pub fn pure_merge(regions: &[Region]) -> Vec<Region> {
    let active: Vec<&Region> = regions.iter().filter(|r| r.active && r.len > 0).collect();

    let mut bounds: Vec<usize> = Vec::with_capacity(active.len() * 2);
    for region in &active {
        bounds.push(region.base);
        bounds.push(region.end());
    }
    bounds.sort_unstable();
    bounds.dedup();

    let mut merged: Vec<Region> = Vec::new();
    for pair in bounds.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        let mut span: Option<Region> = None;
        for region in active.iter().filter(|r| r.base <= lo && r.end() >= hi) {
            span = Some(match span {
                Some(mut covered) => {
                    widen(&mut covered, region);
                    covered
                }
                None => Region { base: lo, len: hi - lo, ..**region },
            });
        }
        let Some(span) = span else {
            continue;
        };

        match merged.last_mut() {
            Some(last) if last.end() == span.base && last.same_rights(&span) => last.len += span.len,
            _ => merged.push(span),
        }
    }
    merged
}
