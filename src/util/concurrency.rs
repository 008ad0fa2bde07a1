//! Bounded-concurrency mapper.
//!
//! The engine is I/O-bound: parallelism comes from overlapping awaited
//! I/O, never from an unbounded fan-out over a potentially large file or
//! provider set.

use futures::{stream, StreamExt};

/// Maps `items` through the async `f`, running at most `concurrency` futures
/// at a time, and returns results in the original order.
///
/// Each item's result is independent: a panic-free error in one mapping
/// does not cancel the others, so callers that need "settle all, then
/// evaluate" semantics get that for free since this never short-circuits
/// on `Err`.
pub async fn bounded_map<T, R, F, Fut>(items: Vec<T>, concurrency: usize, f: F) -> Vec<R>
where
	T: Send + 'static,
	F: Fn(T) -> Fut + Clone,
	Fut: std::future::Future<Output = R>,
{
	let concurrency = concurrency.max(1);
	stream::iter(items)
		.map(|item| {
			let f = f.clone();
			async move { f(item).await }
		})
		.buffered(concurrency)
		.collect()
		.await
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	#[tokio::test]
	async fn preserves_order() {
		let items = vec![1, 2, 3, 4, 5];
		let results = bounded_map(items, 2, |n| async move { n * 10 }).await;
		assert_eq!(results, vec![10, 20, 30, 40, 50]);
	}

	#[tokio::test]
	async fn respects_concurrency_bound() {
		let in_flight = Arc::new(AtomicUsize::new(0));
		let max_seen = Arc::new(AtomicUsize::new(0));

		let items: Vec<usize> = (0..20).collect();
		let in_flight_c = in_flight.clone();
		let max_seen_c = max_seen.clone();
		bounded_map(items, 4, move |n| {
			let in_flight = in_flight_c.clone();
			let max_seen = max_seen_c.clone();
			async move {
				let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
				max_seen.fetch_max(now, Ordering::SeqCst);
				tokio::task::yield_now().await;
				in_flight.fetch_sub(1, Ordering::SeqCst);
				n
			}
		})
		.await;

		assert!(max_seen.load(Ordering::SeqCst) <= 4);
	}
}
