use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::*;

#[test]
fn tasks_run_in_submission_order() {
    let actor = Actor::spawn("order", Vec::<u32>::new()).unwrap();
    for i in 0..100 {
        actor.submit(move |log| log.push(i));
    }
    let log = actor.call(|log| log.clone()).unwrap();
    assert_eq!(log, (0..100).collect::<Vec<_>>());
    actor.shutdown();
}

#[test]
fn equal_delays_keep_submission_order() {
    let actor = Actor::spawn("delays", Vec::<u32>::new()).unwrap();
    for i in 0..10 {
        actor.submit_delayed(move |log| log.push(i), Duration::from_millis(20));
    }
    actor.wait_idle();
    let log = actor.call(|log| log.clone()).unwrap();
    assert_eq!(log, (0..10).collect::<Vec<_>>());
    actor.shutdown();
}

#[test]
fn delayed_task_runs_after_immediate_ones() {
    let actor = Actor::spawn("mixed", Vec::<&'static str>::new()).unwrap();
    let started = Instant::now();
    actor.submit_delayed(|log| log.push("late"), Duration::from_millis(30));
    actor.submit(|log| log.push("now"));
    actor.wait_idle();
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(actor.call(|log| log.clone()).unwrap(), vec!["now", "late"]);
    actor.shutdown();
}

#[test]
fn tasks_never_overlap() {
    let actor = SerialActor::serial("overlap").unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let submitters: Vec<_> = (0..4)
        .map(|_| {
            let actor = actor.clone();
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let active = Arc::clone(&active);
                    let max_seen = Arc::clone(&max_seen);
                    actor.submit(move |_| {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        std::thread::yield_now();
                        active.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        })
        .collect();
    for s in submitters {
        s.join().unwrap();
    }
    actor.wait_idle();
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    actor.shutdown();
}

#[test]
fn cancel_removes_pending_task() {
    let actor = Actor::spawn("cancel", 0u32).unwrap();
    let id = actor.submit_delayed(|n| *n += 1, Duration::from_secs(60));
    assert!(actor.cancel(id));
    assert!(!actor.cancel(id));
    actor.wait_idle();
    assert_eq!(actor.call(|n| *n).unwrap(), 0);
    actor.shutdown();
}

#[test]
fn panicking_task_does_not_kill_worker() {
    let actor = Actor::spawn("panics", 0u32).unwrap();
    actor.submit(|_| panic!("task failure"));
    actor.submit(|n| *n += 1);
    assert_eq!(actor.call(|n| *n).unwrap(), 1);
    actor.shutdown();
}

#[test]
fn shutdown_drops_pending_and_ignores_later_posts() {
    let actor = Actor::spawn("shutdown", 0u32).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&ran);
    actor.submit_delayed(
        move |_| {
            flag.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_secs(60),
    );
    actor.shutdown();
    actor.shutdown();
    assert!(actor.is_shut_down());
    actor.submit(|n| *n += 1);
    assert!(actor.call(|n| *n).is_none());
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn call_from_actor_thread_does_not_deadlock() {
    let actor = Actor::spawn("reentrant", 0u32).unwrap();
    let inner = actor.clone();
    let result = actor.call(move |_| (inner.is_current(), inner.call(|n| *n))).unwrap();
    assert_eq!(result, (true, None));
    assert!(!actor.is_current());
    actor.shutdown();
}

#[test]
fn shutdown_from_task_does_not_self_join() {
    let actor = Actor::spawn("self-stop", ()).unwrap();
    let inner = actor.clone();
    actor.submit(move |_| inner.shutdown());
    let deadline = Instant::now() + Duration::from_secs(5);
    while !actor.is_shut_down() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(actor.is_shut_down());
    actor.shutdown();
}

#[test]
fn drain_discards_pending_tasks() {
    let actor = Actor::spawn("drain", 0u32).unwrap();
    actor.submit_delayed(|n| *n += 1, Duration::from_secs(60));
    actor.submit_delayed(|n| *n += 1, Duration::from_secs(60));
    assert_eq!(actor.drain(), 2);
    actor.wait_idle();
    assert_eq!(actor.call(|n| *n).unwrap(), 0);
    assert_eq!(actor.drain(), 0);
    actor.shutdown();
}

#[test]
fn drained_delayed_task_never_runs() {
    let actor = Actor::spawn("drain-delayed", 0u32).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&ran);
    actor.submit_delayed(
        move |_| {
            flag.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_millis(50),
    );
    let started = Instant::now();
    assert_eq!(actor.drain(), 1);
    assert!(started.elapsed() < Duration::from_millis(50));
    std::thread::sleep(Duration::from_millis(120));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    actor.shutdown();
}

#[test]
fn dropping_the_last_handle_stops_the_worker() {
    let actor = Actor::spawn("dropped", 0u32).unwrap();
    let clone = actor.clone();
    drop(actor);
    assert!(!clone.is_shut_down());
    assert_eq!(clone.call(|n| *n), Some(0));

    let shared = Arc::downgrade(&clone.shared);
    drop(clone);
    assert!(shared.upgrade().is_none(), "worker joined and released its reference");
}
