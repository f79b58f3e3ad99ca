//! Conflict resolution for overlapping detections
//!
//! PII analyzers routinely report the same entity twice (two recognizers, or
//! one recognizer with two boundary guesses) and sometimes label one stretch
//! of text with two different types. Before placeholders can be minted, those
//! detections have to be reduced to a deterministic set of spans.
//!
//! Two resolvers are provided:
//!
//! - [`resolve_conflicts`] for scored entities: same-type overlaps are widened
//!   into one span, then cross-type duplicates and nested spans are removed.
//! - [`resolve_conflicts_simple`] for unscored spans such as secret matches:
//!   a greedy first-wins pass that tolerates no overlap at all.

use crate::entity::EntityWithScore;
use crate::error::ConflictError;
use crate::interval::{contains, overlaps, validate, Interval};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;
use tracing::debug;

/// Resolve scored entity spans into a set without duplicates or nested spans.
///
/// Same-type spans that overlap are merged (`min start`, `max end`, `max score`).
/// The merged spans are then ordered by `(start, end, score desc)` and a span
/// survives only if no kept span coincides with or contains it. Containment
/// beats score: a nested span is dropped even when it is more confident.
///
/// The result is ordered by start offset. Partial overlaps between different
/// types are left in place; callers substituting text must skip them.
pub fn resolve_conflicts(
    entities: &[EntityWithScore],
) -> Result<Vec<EntityWithScore>, ConflictError> {
    validate_all(entities)?;
    if entities.len() <= 1 {
        return Ok(entities.to_vec());
    }

    let merged = merge_within_groups(
        entities,
        |entity| entity.entity_type.as_str(),
        |kept, next| kept.widen(next),
    );

    let resolved = remove_nested(merged, |a, b| {
        a.start
            .cmp(&b.start)
            .then(a.end.cmp(&b.end))
            .then_with(|| b.score.total_cmp(&a.score))
    });

    debug!(
        "Resolved {} entity detections into {} spans",
        entities.len(),
        resolved.len()
    );
    Ok(resolved)
}

/// Greedy resolution for spans without a confidence signal.
///
/// Spans are ordered by start and, for equal starts, longest first. A span is
/// kept only if it starts at or after the end of the last kept span, so
/// touching spans both survive while any overlap drops the later one.
pub fn resolve_conflicts_simple<T>(spans: &[T]) -> Result<Vec<T>, ConflictError>
where
    T: Interval + Clone,
{
    validate_all(spans)?;
    if spans.len() <= 1 {
        return Ok(spans.to_vec());
    }

    let mut sorted = spans.to_vec();
    sorted.sort_by(|a, b| {
        a.start()
            .cmp(&b.start())
            .then(b.length().cmp(&a.length()))
    });

    let mut kept: Vec<T> = Vec::with_capacity(sorted.len());
    for span in sorted {
        match kept.last() {
            Some(last) if span.start() < last.end() => continue,
            _ => kept.push(span),
        }
    }
    Ok(kept)
}

fn validate_all<T: Interval>(spans: &[T]) -> Result<(), ConflictError> {
    spans.iter().try_for_each(|span| validate(span))
}

/// Group spans by `key` (groups in first-seen order), sort each group by start
/// and fold overlapping neighbours together with `merge`.
fn merge_within_groups<'a, T, K, G, M>(items: &'a [T], key: G, merge: M) -> Vec<T>
where
    T: Interval + Clone,
    K: Eq + Hash,
    G: Fn(&'a T) -> K,
    M: Fn(&T, &T) -> T,
{
    let mut group_index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<Vec<T>> = Vec::new();

    for item in items {
        let slot = *group_index.entry(key(item)).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(item.clone());
    }

    let mut merged = Vec::with_capacity(items.len());
    for mut group in groups {
        group.sort_by_key(|item| item.start());

        let mut accepted: Vec<T> = Vec::with_capacity(group.len());
        for item in group {
            match accepted.last_mut() {
                Some(last) if overlaps(&*last, &item) => *last = merge(&*last, &item),
                _ => accepted.push(item),
            }
        }
        merged.extend(accepted);
    }
    merged
}

/// Walk spans in `order` and keep those not covered by an already kept span.
///
/// A kept span that turns out to sit inside a later, wider span (same start,
/// larger end) is evicted so that no survivor is nested in another.
fn remove_nested<T, O>(mut spans: Vec<T>, order: O) -> Vec<T>
where
    T: Interval,
    O: Fn(&T, &T) -> Ordering,
{
    spans.sort_by(|a, b| order(a, b));

    let mut kept: Vec<T> = Vec::with_capacity(spans.len());
    for span in spans {
        if kept.iter().any(|existing| contains(existing, &span)) {
            continue;
        }
        kept.retain(|existing| !contains(&span, existing));
        kept.push(span);
    }
    kept
}
