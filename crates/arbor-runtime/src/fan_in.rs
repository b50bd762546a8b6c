//! Arrival-order merge of independent event producers.
//!
//! Each producer runs as its own task forwarding into a shared channel, so
//! an item is emitted as soon as its producer yields it — no producer is
//! drained before another starts. Per-producer order is preserved by the
//! channel; cross-producer order is arrival order and nothing more.
//!
//! The merged stream ends only when every producer has completed. A terminal
//! fault from any producer aborts the in-flight ones, and the fault is
//! re-raised after their cancellation completes.

use std::pin::Pin;

use async_stream::stream;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Boxed fallible event stream, the unit the merge operates on.
pub type EventStream<T, E> = Pin<Box<dyn Stream<Item = Result<T, E>> + Send>>;

/// Channel depth between producers and the merged consumer.
const MERGE_CHANNEL_CAPACITY: usize = 32;

/// Merge independent producers into one arrival-order stream.
pub fn merge<T, E>(producers: Vec<EventStream<T, E>>) -> EventStream<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    Box::pin(stream! {
        let (tx, mut rx) = mpsc::channel::<Result<T, E>>(MERGE_CHANNEL_CAPACITY);
        let mut tasks = JoinSet::new();

        for mut producer in producers {
            let tx = tx.clone();
            let _abort = tasks.spawn(async move {
                while let Some(item) = producer.next().await {
                    if tx.send(item).await.is_err() {
                        // Consumer dropped the merged stream.
                        break;
                    }
                }
            });
        }
        // The channel closes once every producer task is done.
        drop(tx);

        while let Some(item) = rx.recv().await {
            match item {
                Ok(event) => yield Ok(event),
                Err(fault) => {
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    yield Err(fault);
                    return;
                }
            }
        }

        // Surface producer panics instead of swallowing them.
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    std::panic::resume_unwind(e.into_panic());
                }
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::time::Duration;

    fn timed<E: Send + 'static>(
        items: Vec<(u64, Result<&'static str, E>)>,
    ) -> EventStream<&'static str, E> {
        Box::pin(stream! {
            for (delay_ms, item) in items {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                yield item;
            }
        })
    }

    async fn collect_ok<E: std::fmt::Debug + Send + 'static>(
        merged: EventStream<&'static str, E>,
    ) -> Vec<&'static str> {
        merged
            .map(|item| item.unwrap())
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn preserves_per_producer_order_and_completes_after_all() {
        let a = timed::<Infallible>(vec![(10, Ok("a1")), (10, Ok("a2"))]);
        let b = timed::<Infallible>(vec![(15, Ok("b1"))]);

        let out = collect_ok(merge(vec![a, b])).await;

        assert_eq!(out.len(), 3, "completes only after both producers");
        let pos = |needle| out.iter().position(|&x| x == needle).unwrap();
        assert!(pos("a1") < pos("a2"));
        assert!(out.contains(&"b1"));
    }

    #[tokio::test(start_paused = true)]
    async fn emits_on_arrival_not_per_producer_drain() {
        // A's second item lands well after B's only item; a drain-first merge
        // would emit [a1, a2, b1].
        let a = timed::<Infallible>(vec![(0, Ok("a1")), (50, Ok("a2"))]);
        let b = timed::<Infallible>(vec![(10, Ok("b1"))]);

        let out = collect_ok(merge(vec![a, b])).await;
        assert_eq!(out, vec!["a1", "b1", "a2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn single_producer_passthrough() {
        let a = timed::<Infallible>(vec![(1, Ok("x")), (1, Ok("y"))]);
        let out = collect_ok(merge(vec![a])).await;
        assert_eq!(out, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn empty_input_completes_immediately() {
        let merged = merge::<&str, Infallible>(vec![]);
        assert_eq!(collect_ok(merged).await.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fault_cancels_in_flight_producers_and_re_raises() {
        // A never completes on its own; B faults early.
        let a: EventStream<&'static str, &'static str> = Box::pin(stream! {
            yield Ok("a1");
            tokio::time::sleep(Duration::from_secs(3600)).await;
            yield Ok("a2");
        });
        let b = timed(vec![(5, Err("boom"))]);

        let mut merged = merge(vec![a, b]);
        let mut seen_fault = false;
        while let Some(item) = merged.next().await {
            if let Err(fault) = item {
                assert_eq!(fault, "boom");
                seen_fault = true;
            }
        }
        assert!(seen_fault, "fault is re-raised after cancellation");
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_after_the_fault() {
        let a: EventStream<&'static str, &'static str> = Box::pin(stream! {
            tokio::time::sleep(Duration::from_millis(50)).await;
            yield Ok("late");
        });
        let b = timed(vec![(1, Err("early"))]);

        let items: Vec<_> = merge(vec![a, b]).collect().await;
        assert!(matches!(items.last(), Some(Err("early"))));
        assert!(!items.iter().any(|i| matches!(i, Ok("late"))));
    }
}
