//! TaskGroup fan-out/fan-in across threads

use cadence_core::{CancelToken, GroupOutcome, TaskGroup, WorkQueue};
use cadence_runtime::{QueueOptions, ThreadQueue};
use crossbeam::channel;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn queue() -> Arc<ThreadQueue> {
    ThreadQueue::start(QueueOptions::default().workers(4).thread_prefix("group-test")).unwrap()
}

#[test]
fn test_fan_in_appends_every_value() {
    let queue = queue();
    let dyn_queue: Arc<dyn WorkQueue> = queue.clone();
    let group: Arc<TaskGroup<Vec<u32>, String, _>> = Arc::new(TaskGroup::appending());

    for i in 0..16u32 {
        group.enter();
        let group = group.clone();
        queue.run_now(Box::new(move || group.leave_value(vec![i])));
    }

    let (tx, rx) = channel::bounded(1);
    group.notify(dyn_queue, move |outcome| {
        let _ = tx.send(outcome);
    });

    let mut values = rx
        .recv_timeout(Duration::from_secs(2))
        .unwrap()
        .into_value()
        .unwrap();
    values.sort_unstable();
    assert_eq!(values, (0..16).collect::<Vec<_>>());
    assert_eq!(group.pending(), 0);
}

#[test]
fn test_failure_wins_across_threads() {
    let queue = queue();
    let dyn_queue: Arc<dyn WorkQueue> = queue.clone();
    let group: Arc<TaskGroup<u32, String>> = Arc::new(TaskGroup::new());

    for i in 0..8u32 {
        group.enter();
        let group = group.clone();
        queue.run_now(Box::new(move || {
            if i == 5 {
                group.leave_error(format!("child {} failed", i));
            } else {
                group.leave_value(i);
            }
        }));
    }

    let (tx, rx) = channel::bounded(1);
    group.notify(dyn_queue, move |outcome| {
        let _ = tx.send(outcome);
    });

    assert_eq!(
        rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        GroupOutcome::Failed(vec!["child 5 failed".to_string()])
    );
}

#[test]
fn test_cancel_unblocks_cooperative_children() {
    let queue = queue();
    let dyn_queue: Arc<dyn WorkQueue> = queue.clone();
    let group: Arc<TaskGroup<u32, ()>> = Arc::new(TaskGroup::new());

    let children: Vec<_> = (0..4)
        .map(|_| {
            let token = CancelToken::new();
            group.enter_with(token.clone());
            let group = group.clone();
            thread::spawn(move || {
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
                group.leave_cancelled();
            })
        })
        .collect();

    let (tx, rx) = channel::bounded(1);
    group.notify(dyn_queue, move |outcome| {
        let _ = tx.send(outcome);
    });

    thread::sleep(Duration::from_millis(10));
    group.cancel();

    assert_eq!(
        rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        GroupOutcome::Cancelled
    );
    for child in children {
        child.join().unwrap();
    }
    assert_eq!(group.pending(), 0);
}
