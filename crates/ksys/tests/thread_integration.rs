//! Scheduling and thread lifecycle, driven through the public API.

use kcore::console::{self, BufferConsole};
use kcore::sync::{Arc, Mutex};

use ksys::{
    JoinOutcome, Kernel, KernelConfig, KernelError, SimPort, ThreadConfig, ThreadState, ThreadStep,
};

type Log = Arc<Mutex<Vec<String>>>;

fn kernel() -> Kernel {
    let config = KernelConfig::builder()
        .priority_levels(8)
        .max_threads(16)
        .id_capacity(64)
        .build()
        .unwrap();
    Kernel::new(config)
}

fn note(log: &Log, text: impl Into<String>) {
    log.lock().push(text.into());
}

#[test]
fn better_priority_runs_first() {
    let mut k = kernel();
    let log: Log = Arc::default();

    for (name, prio) in [("low", 5usize), ("high", 2)] {
        let log = Arc::clone(&log);
        k.create_thread(
            ThreadConfig::new(name, prio),
            Box::new(move |_| {
                note(&log, name);
                ThreadStep::Exit(0)
            }),
        )
        .unwrap();
    }

    k.run_until_idle(20);
    assert_eq!(log.lock().as_slice(), ["high", "low"]);
}

#[test]
fn equal_priority_peer_does_not_preempt() {
    let mut k = kernel();
    let log: Log = Arc::default();

    let peer_log = Arc::clone(&log);
    let body_log = Arc::clone(&log);
    let mut phase = 0;
    k.create_thread(
        ThreadConfig::new("first", 3),
        Box::new(move |k| {
            phase += 1;
            if phase == 1 {
                note(&body_log, "first:1");
                let peer_log = Arc::clone(&peer_log);
                k.create_thread(
                    ThreadConfig::new("peer", 3),
                    Box::new(move |_| {
                        note(&peer_log, "peer");
                        ThreadStep::Exit(0)
                    }),
                )
                .unwrap();
                ThreadStep::Continue
            } else {
                note(&body_log, "first:2");
                ThreadStep::Exit(0)
            }
        }),
    )
    .unwrap();

    k.run_until_idle(20);
    // The creator keeps running past the creation of an equal-priority
    // peer; only strictly better candidates preempt.
    assert_eq!(log.lock().as_slice(), ["first:1", "first:2", "peer"]);
}

#[test]
fn strictly_better_thread_preempts_at_next_step() {
    let mut k = kernel();
    let log: Log = Arc::default();

    let urgent_log = Arc::clone(&log);
    let body_log = Arc::clone(&log);
    let mut phase = 0;
    k.create_thread(
        ThreadConfig::new("base", 5),
        Box::new(move |k| {
            phase += 1;
            if phase == 1 {
                note(&body_log, "base:1");
                let urgent_log = Arc::clone(&urgent_log);
                k.create_thread(
                    ThreadConfig::new("urgent", 1),
                    Box::new(move |_| {
                        note(&urgent_log, "urgent");
                        ThreadStep::Exit(0)
                    }),
                )
                .unwrap();
                ThreadStep::Continue
            } else {
                note(&body_log, "base:2");
                ThreadStep::Exit(0)
            }
        }),
    )
    .unwrap();

    k.run_until_idle(20);
    assert_eq!(log.lock().as_slice(), ["base:1", "urgent", "base:2"]);
}

#[test]
fn yield_rotates_equal_priorities_fifo() {
    let mut k = kernel();
    let log: Log = Arc::default();

    for name in ["t1", "t2"] {
        let log = Arc::clone(&log);
        let mut rounds = 0;
        k.create_thread(
            ThreadConfig::new(name, 4),
            Box::new(move |_| {
                rounds += 1;
                note(&log, name);
                if rounds < 2 {
                    ThreadStep::Yield
                } else {
                    ThreadStep::Exit(0)
                }
            }),
        )
        .unwrap();
    }

    k.run_until_idle(20);
    assert_eq!(log.lock().as_slice(), ["t1", "t2", "t1", "t2"]);
}

#[test]
fn blocking_join_collects_status_once() {
    let mut k = kernel();
    let log: Log = Arc::default();

    let worker = k
        .create_thread(
            ThreadConfig::new("worker", 5),
            Box::new(|_| ThreadStep::Exit(42)),
        )
        .unwrap();

    let join_log = Arc::clone(&log);
    k.create_thread(
        ThreadConfig::new("joiner", 2),
        Box::new(move |k| match k.wait_for_thread(worker, true) {
            Ok(JoinOutcome::Exited(status)) => {
                note(&join_log, format!("joined:{status}"));
                ThreadStep::Exit(0)
            }
            Ok(JoinOutcome::AlreadyGone) => ThreadStep::Exit(-1),
            Err(KernelError::Retry) => ThreadStep::Blocked,
            Err(err) => ThreadStep::Exit(err.code()),
        }),
    )
    .unwrap();

    k.run_until_idle(20);
    assert_eq!(log.lock().as_slice(), ["joined:42"]);
    // The status was collected by the joiner; the handle is stale now.
    assert_eq!(
        k.wait_for_thread(worker, false),
        Ok(JoinOutcome::AlreadyGone)
    );
}

#[test]
fn cancelled_waiter_leaves_the_wait_queue() {
    let mut k = kernel();
    let sem = k.sem_init(0).unwrap();

    let waiter = k
        .create_thread(
            ThreadConfig::new("parked", 3),
            Box::new(move |k| match k.sem_wait(sem) {
                Ok(()) => ThreadStep::Exit(1),
                Err(KernelError::Retry) => ThreadStep::Blocked,
                Err(err) => ThreadStep::Exit(err.code()),
            }),
        )
        .unwrap();

    k.run_until_idle(20);
    assert_eq!(k.thread_state(waiter), Some(ThreadState::Wait));

    k.cancel_thread(waiter).unwrap();
    assert_eq!(
        k.wait_for_thread(waiter, false),
        Ok(JoinOutcome::Exited(-1))
    );
    assert_eq!(
        k.wait_for_thread(waiter, false),
        Ok(JoinOutcome::AlreadyGone)
    );

    // The wait queue no longer holds the cancelled thread: a post finds
    // no waiter and increments the count instead.
    k.sem_post(sem).unwrap();
    assert_eq!(k.sem_value(sem), Ok(1));
}

#[test]
fn thread_slots_are_generation_checked() {
    let mut k = kernel();
    let first = k
        .create_thread(
            ThreadConfig::new("one", 3),
            Box::new(|_| ThreadStep::Exit(0)),
        )
        .unwrap();
    k.run_until_idle(20);
    assert_eq!(k.wait_for_thread(first, false), Ok(JoinOutcome::Exited(0)));

    // The slot is free now; the next thread reuses it with a fresh id.
    let second = k
        .create_thread(
            ThreadConfig::new("two", 3),
            Box::new(|_| ThreadStep::Yield),
        )
        .unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(
        k.wait_for_thread(first, false),
        Ok(JoinOutcome::AlreadyGone)
    );
    assert_eq!(
        k.wait_for_thread(second, false),
        Err(KernelError::NotFinished)
    );
}

#[test]
fn sysinfo_reports_through_the_console() {
    let console = BufferConsole::new();
    let config = KernelConfig::builder()
        .priority_levels(8)
        .max_threads(8)
        .id_capacity(64)
        .build()
        .unwrap();
    let mut k = Kernel::with_parts(
        config,
        Box::new(SimPort::new()),
        console::shared(console.clone()),
    );

    k.create_thread(
        ThreadConfig::new("report", 3),
        Box::new(|_| ThreadStep::Yield),
    )
    .unwrap();
    k.tick();
    k.sysinfo();
    k.thread_info();

    let text = console.contents();
    assert!(text.contains("ticks=1"), "unexpected sysinfo: {text}");
    assert!(text.contains("name=report"), "unexpected listing: {text}");
    assert!(text.contains("name=idle"), "unexpected listing: {text}");
}
