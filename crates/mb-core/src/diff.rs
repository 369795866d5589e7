//! Pure function computing the minimal fetch fragment needed to bring a
//! panel's previously-fetched window up to the currently active one.
//!
//! The previous window is always a contiguous interval, so its symmetric
//! difference with a new contiguous interval is at most one contiguous
//! fragment — this is what lets a single append-only fetch per refresh
//! suffice, instead of re-fetching the whole window every tick.

use mb_common::MetricQuery;

/// `(fragment_to_fetch, merged_window_if_fragment_succeeds)`.
///
/// `fragment` is `None` when the active window is already fully covered by
/// the previous one (subsumption) — no fetch is needed and `merged` is just
/// the previous window, unchanged.
pub type Diff = (Option<MetricQuery>, MetricQuery);

/// Compute the fetch fragment and resulting merged window for a panel.
///
/// `current` is normalized against `now` first (resolving the `end == 0`
/// streaming sentinel and clamping an inverted window). Equality of
/// endpoints is treated as subsumption, not extension, so a fragment is
/// never zero-width.
pub fn adjust(now: i64, previous: Option<MetricQuery>, current: MetricQuery) -> Diff {
    let current = current.normalize(now);

    let previous = match previous {
        None => return (Some(current), current),
        Some(p) => p,
    };

    let disjoint = previous.resolution != current.resolution
        || current.end < previous.start
        || current.start > previous.end;
    if disjoint {
        return (Some(current), current);
    }

    let subsumed = current.start >= previous.start && current.end <= previous.end;
    if subsumed {
        return (None, previous);
    }

    let right_extension =
        previous.start <= current.start && current.start <= previous.end && previous.end < current.end;
    if right_extension {
        let fragment = MetricQuery::new(previous.end, current.end, current.resolution);
        let merged = MetricQuery::new(previous.start, current.end, current.resolution);
        return (Some(fragment), merged);
    }

    let left_extension =
        current.start < previous.start && previous.start <= current.end && current.end <= previous.end;
    if left_extension {
        let fragment = MetricQuery::new(current.start, previous.start, current.resolution);
        let merged = MetricQuery::new(current.start, previous.end, current.resolution);
        return (Some(fragment), merged);
    }

    // Both-side extension (current strictly wider on both ends) isn't
    // reached by a single refresh step in practice — the caller re-issues
    // the query after the first fragment lands — but a full refetch is a
    // safe fallback rather than panicking on an unmodeled case.
    (Some(current), current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(start: i64, end: i64, resolution: i64) -> MetricQuery {
        MetricQuery::new(start, end, resolution)
    }

    #[test]
    fn absent_previous_is_full_refetch() {
        let (fragment, merged) = adjust(0, None, q(1_000_000, 2_000_000, 10_000));
        assert_eq!(fragment, Some(q(1_000_000, 2_000_000, 10_000)));
        assert_eq!(merged, q(1_000_000, 2_000_000, 10_000));
    }

    #[test]
    fn resolution_change_forces_full_refetch() {
        let previous = q(1_000_000, 3_000_000, 10_000);
        let (fragment, merged) = adjust(0, Some(previous), q(1_000_000, 3_000_000, 20_000));
        assert_eq!(fragment, Some(q(1_000_000, 3_000_000, 20_000)));
        assert_eq!(merged, q(1_000_000, 3_000_000, 20_000));
    }

    #[test]
    fn disjoint_left_is_full_refetch() {
        let previous = q(10_000, 20_000, 1_000);
        let (fragment, _) = adjust(0, Some(previous), q(0, 5_000, 1_000));
        assert_eq!(fragment, Some(q(0, 5_000, 1_000)));
    }

    #[test]
    fn disjoint_right_is_full_refetch() {
        let previous = q(0, 5_000, 1_000);
        let (fragment, _) = adjust(0, Some(previous), q(10_000, 20_000, 1_000));
        assert_eq!(fragment, Some(q(10_000, 20_000, 1_000)));
    }

    #[test]
    fn subsumed_window_needs_no_fetch() {
        let previous = q(1_000_000, 3_000_000, 10_000);
        let (fragment, merged) = adjust(0, Some(previous), q(1_500_000, 2_500_000, 10_000));
        assert_eq!(fragment, None);
        assert_eq!(merged, previous);
    }

    #[test]
    fn exact_equality_is_subsumption_not_extension() {
        let previous = q(1_000_000, 3_000_000, 10_000);
        let (fragment, merged) = adjust(0, Some(previous), previous);
        assert_eq!(fragment, None);
        assert_eq!(merged, previous);
    }

    #[test]
    fn right_extension_fetches_only_the_new_tail() {
        let previous = q(1_000_000, 2_000_000, 10_000);
        let (fragment, merged) = adjust(0, Some(previous), q(1_000_000, 3_000_000, 10_000));
        assert_eq!(fragment, Some(q(2_000_000, 3_000_000, 10_000)));
        assert_eq!(merged, q(1_000_000, 3_000_000, 10_000));
    }

    #[test]
    fn left_extension_fetches_only_the_new_head() {
        let previous = q(2_000_000, 3_000_000, 10_000);
        let (fragment, merged) = adjust(0, Some(previous), q(1_000_000, 3_000_000, 10_000));
        assert_eq!(fragment, Some(q(1_000_000, 2_000_000, 10_000)));
        assert_eq!(merged, q(1_000_000, 3_000_000, 10_000));
    }

    #[test]
    fn streaming_sentinel_resolves_against_now() {
        let (fragment, merged) = adjust(5_000_000, None, q(1_000_000, 0, 10_000));
        assert_eq!(fragment, Some(q(1_000_000, 5_000_000, 10_000)));
        assert_eq!(merged.end, 5_000_000);
    }

    #[test]
    fn is_a_pure_function_of_its_inputs() {
        let previous = Some(q(1_000_000, 2_000_000, 10_000));
        let current = q(1_000_000, 3_000_000, 10_000);
        assert_eq!(adjust(42, previous, current), adjust(42, previous, current));
    }
}
