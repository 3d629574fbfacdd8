//! Merge order.

use crate::domain::Domain;

/// Computes the merge order of a run.
///
/// Domains listed in `priority` come first, in priority order; the rest
/// follow in `discovery_order`. Only domains present in `discovery_order`
/// appear in the result, each once.
#[must_use]
pub fn merge_order(priority: &[Domain], discovery_order: &[Domain]) -> Vec<Domain> {
    let mut order: Vec<Domain> = priority
        .iter()
        .filter(|d| discovery_order.contains(d))
        .cloned()
        .collect();
    for domain in discovery_order {
        if !order.contains(domain) {
            order.push(domain.clone());
        }
    }
    order
}
