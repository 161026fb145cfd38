//! Broadcast to several conditions as one step.

use std::sync::Arc;

use smallvec::SmallVec;

use super::condition::{Condition, drain};
use crate::tracing_compat::debug;

/// Locks every distinct condition in `conditions`, wakes all of their
/// waiters, then waits until every woken waiter has left.
///
/// Conditions are locked in ascending [`Condition::id`] order, so two
/// overlapping `notify_many` calls cannot deadlock each other. Duplicates
/// are ignored. A race registered on several of the listed conditions is
/// woken once and drained once.
pub async fn notify_many(conditions: &[Condition]) {
    let mut ordered: SmallVec<[&Condition; 8]> = conditions.iter().collect();
    ordered.sort_by_key(|condition| condition.id());
    ordered.dedup_by_key(|condition| condition.id());

    let mut guards = Vec::with_capacity(ordered.len());
    for condition in &ordered {
        guards.push(condition.lock().await);
    }

    let mut exits = Vec::new();
    for condition in &ordered {
        for exit in condition.broadcast(None) {
            if !exits.iter().any(|known| Arc::ptr_eq(known, &exit)) {
                exits.push(exit);
            }
        }
    }
    debug!(conditions = ordered.len(), draining = exits.len(), "notify_many");
    drain(exits).await;
    drop(guards);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Race;
    use crate::test_utils::{assert_completes_within, init_test_logging, run_test};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn wakes_and_drains_every_condition() {
        init_test("wakes_and_drains_every_condition");
        run_test(|| async {
            let c1 = Condition::new();
            let c2 = Condition::new();
            let done = Arc::new(AtomicUsize::new(0));
            for cond in [&c1, &c2, &c1] {
                let race = cond.enter();
                let done = Arc::clone(&done);
                tokio::spawn(async move {
                    let woken = race.wait().await;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    drop(woken);
                });
            }

            notify_many(&[c1.clone(), c2.clone()]).await;
            let finished = done.load(Ordering::SeqCst);
            crate::assert_with_log!(finished == 3, "all waiters drained", 3usize, finished);
        });
        crate::test_complete!("wakes_and_drains_every_condition");
    }

    #[test]
    fn race_on_both_conditions_is_woken_once() {
        init_test("race_on_both_conditions_is_woken_once");
        run_test(|| async {
            let c1 = Condition::new();
            let c2 = Condition::new();
            let hits = Arc::new(AtomicUsize::new(0));
            let race = Race::register(&[c1.clone(), c2.clone()]);
            let task = {
                let hits = Arc::clone(&hits);
                tokio::spawn(async move {
                    let _woken = race.wait().await;
                    hits.fetch_add(1, Ordering::SeqCst);
                })
            };

            notify_many(&[c2.clone(), c1.clone()]).await;
            task.await.expect("race task panicked");
            assert_eq!(hits.load(Ordering::SeqCst), 1);
            assert_eq!(c1.waiter_count() + c2.waiter_count(), 0);
        });
        crate::test_complete!("race_on_both_conditions_is_woken_once");
    }

    #[test]
    fn duplicate_condition_does_not_deadlock() {
        init_test("duplicate_condition_does_not_deadlock");
        run_test(|| async {
            let cond = Condition::new();
            let race = cond.enter();
            tokio::spawn(async move {
                let _woken = race.wait().await;
            });
            let conditions = [cond.clone(), cond.clone(), cond];
            assert_completes_within(
                Duration::from_secs(1),
                "duplicate notify_many",
                notify_many(&conditions),
            )
            .await;
        });
        crate::test_complete!("duplicate_condition_does_not_deadlock");
    }

    #[test]
    fn empty_list_is_a_no_op() {
        init_test("empty_list_is_a_no_op");
        run_test(|| async {
            notify_many(&[]).await;
        });
        crate::test_complete!("empty_list_is_a_no_op");
    }
}
