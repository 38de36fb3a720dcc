//! Checkpoint advancement rule.

/// Compute the checkpoint to commit after a cycle.
///
/// The result is `max(current, proposed)`, except that when some records failed to persist the
/// proposal is capped at `earliest_unpersisted - 1` so the next strictly-after fetch returns the
/// failed record again. The result never falls below `current`.
pub fn next_checkpoint(
	current: Option<u64>,
	proposed: Option<u64>,
	earliest_unpersisted: Option<u64>,
) -> Option<u64> {
	let proposed = match (proposed, earliest_unpersisted) {
		(Some(p), Some(failed)) => Some(p.min(failed.saturating_sub(1))),
		(p, _) => p,
	};

	match (current, proposed) {
		(Some(c), Some(p)) => Some(c.max(p)),
		(None, Some(p)) if earliest_unpersisted == Some(0) && p == 0 => None,
		(c, p) => c.or(p),
	}
}
