//! Task queue behaviour: routing, ordering, completion, alarms and history

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use relay_core::{QueueError, Task, TaskQueue};

use crate::helpers::*;

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("scrape target {0} unreachable")]
struct ScrapeError(String);

#[tokio::test]
async fn test_unknown_subject_leaves_history_unchanged() {
    let order = Arc::new(Mutex::new(vec![]));
    let queue = gated_queue(4, Gate::closed(), order);

    queue.push_sync("record", vec![1]).await.unwrap();
    let before: Vec<u8> = queue.history().iter().map(|task| task.index).collect();

    for subject in ["", "nsca", "RECORD", "record "] {
        assert_matches!(
            queue.push_async(subject, vec![2]),
            Err(QueueError::UnknownSubject(s)) if s == subject
        );
    }

    let after: Vec<u8> = queue.history().iter().map(|task| task.index).collect();
    assert_eq!(before, after);

    // The rejected pushes did not consume sequence indices either
    let next = queue.push_async("record", vec![3]).unwrap();
    assert_eq!(next.index(), 1);
    next.wait().await.unwrap();
}

#[tokio::test]
async fn test_tasks_complete_in_push_order() {
    let order = Arc::new(Mutex::new(vec![]));
    let queue = gated_queue(8, Gate::closed(), order.clone());

    let handles: Vec<_> = (1..=3)
        .map(|id| queue.push_async("record", vec![id]).unwrap())
        .collect();

    for handle in handles {
        handle.wait().await.unwrap();
    }

    assert_eq!(*order.lock(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_push_sync_returns_handler_error_untouched() {
    let queue = TaskQueue::<String>::builder()
        .handler("scrape", |args: Vec<String>| async move {
            match args.first() {
                Some(target) => Err(ScrapeError(target.clone()).into()),
                None => anyhow::Ok(()),
            }
        })
        .spawn();

    queue.push_sync("scrape", vec![]).await.unwrap();

    let err = queue
        .push_sync("scrape", vec!["10.0.0.7:9100".to_string()])
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "scrape target 10.0.0.7:9100 unreachable");
    assert_matches!(&err, QueueError::Handler(inner) => {
        assert_eq!(
            inner.downcast_ref::<ScrapeError>(),
            Some(&ScrapeError("10.0.0.7:9100".to_string()))
        );
    });
}

#[tokio::test]
async fn test_failed_task_does_not_stop_worker() {
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_clone = runs.clone();

    let queue = TaskQueue::<bool>::builder()
        .handler("flaky", move |args: Vec<bool>| {
            let runs = runs_clone.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                if args.first() == Some(&true) {
                    anyhow::bail!("boom");
                }
                anyhow::Ok(())
            }
        })
        .spawn();

    assert!(queue.push_sync("flaky", vec![true]).await.is_err());
    assert!(queue.push_sync("flaky", vec![false]).await.is_ok());
    assert!(queue.push_sync("flaky", vec![true]).await.is_err());
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_sequence_index_wraps_after_256() {
    let queue = TaskQueue::<()>::builder()
        .capacity(1)
        .handler("noop", |_args: Vec<()>| async { anyhow::Ok(()) })
        .spawn();

    let mut indices = vec![];
    for _ in 0..257 {
        let handle = queue.push_async("noop", vec![]).unwrap();
        indices.push(handle.index());
        handle.wait().await.unwrap();
    }

    assert_eq!(indices[0], 0);
    assert_eq!(indices[255], 255);
    assert_eq!(indices[256], indices[0]);
}

#[tokio::test(start_paused = true)]
async fn test_alarm_fires_once_for_slow_task() {
    let alarms: Arc<Mutex<Vec<(String, u8)>>> = Arc::new(Mutex::new(vec![]));
    let alarms_clone = alarms.clone();

    let queue = TaskQueue::<u32>::builder()
        .handler("slow", |_args: Vec<u32>| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            anyhow::Ok(())
        })
        .alarm(Duration::from_millis(50), move |task: &Task<u32>| {
            alarms_clone.lock().push((task.subject.clone(), task.index));
        })
        .spawn();

    // The alarm does not interrupt the handler; its result still arrives
    queue.push_sync("slow", vec![]).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(*alarms.lock(), vec![("slow".to_string(), 0)]);
}

#[tokio::test(start_paused = true)]
async fn test_alarm_never_fires_for_fast_task() {
    let alarms = Arc::new(AtomicUsize::new(0));
    let alarms_clone = alarms.clone();

    let queue = TaskQueue::<u32>::builder()
        .handler("fast", |_args: Vec<u32>| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            anyhow::Ok(())
        })
        .alarm(Duration::from_millis(50), move |_task: &Task<u32>| {
            alarms_clone.fetch_add(1, Ordering::SeqCst);
        })
        .spawn();

    for _ in 0..5 {
        queue.push_sync("fast", vec![]).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(alarms.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_history_is_oldest_first_and_bounded() {
    let queue = TaskQueue::<u32>::builder()
        .capacity(3)
        .handler("noop", |_args: Vec<u32>| async { anyhow::Ok(()) })
        .spawn();

    for id in 0..5 {
        queue.push_sync("noop", vec![id]).await.unwrap();
    }

    let history: Vec<u32> = queue.history().iter().map(|task| task.args[0]).collect();
    assert_eq!(history, vec![2, 3, 4]);
}

#[tokio::test]
async fn test_shutdown_drains_pending_tasks() {
    let order = Arc::new(Mutex::new(vec![]));
    let queue = gated_queue(8, Gate::closed(), order.clone());

    let handles: Vec<_> = (0..5)
        .map(|id| queue.push_async("record", vec![id]).unwrap())
        .collect();

    queue.shutdown().await;

    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    assert_eq!(queue.pending(), 0);
    for handle in handles {
        handle.wait().await.unwrap();
    }
    assert_matches!(queue.push_sync("record", vec![9]).await, Err(QueueError::Closed));
}

#[tokio::test]
async fn test_concurrent_shutdowns_all_wait_for_drain() {
    let gate = Gate::closed();
    let queue = gated_queue(4, gate.clone(), Arc::new(Mutex::new(vec![])));

    let running = queue.push_async("gated", vec![]).unwrap();
    settle().await;

    let first = tokio::spawn({
        let queue = queue.clone();
        async move { queue.shutdown().await }
    });
    settle().await;

    // Shutdown is in progress elsewhere, yet this caller must still wait
    let second = tokio::time::timeout(Duration::from_millis(100), queue.shutdown()).await;
    assert!(second.is_err());
    assert_eq!(queue.pending(), 1);
    assert!(queue.is_closed());

    gate.open(1);
    first.await.unwrap();
    queue.shutdown().await;

    assert_eq!(queue.pending(), 0);
    running.wait().await.unwrap();
}

#[tokio::test]
async fn test_subjects_lists_registered_handlers() {
    let queue = gated_queue(2, Gate::closed(), Arc::new(Mutex::new(vec![])));

    let mut subjects: Vec<&str> = queue.subjects().collect();
    subjects.sort();

    assert_eq!(subjects, vec!["gated", "record"]);
}
