//! Scheduler and synchronization tests
//!
//! Kernel-thread workloads over the cooperative scheduler: semaphore
//! accounting, lock ownership, Mesa conditions, rendezvous ports, join
//! semantics and priority donation.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use osprey_kernel::sched::thread;
use osprey_kernel::sync::{Condition, Lock, Port, Semaphore};

#[test]
fn semaphore_counting_balances() {
    let kernel = common::plain_kernel("sem");
    kernel.run(|k| {
        const WORKERS: usize = 4;
        const ROUNDS: usize = 25;

        let items = Arc::new(Semaphore::new("items", 0));
        let done = Arc::new(Semaphore::new("done", 0));

        for i in 0..WORKERS {
            let items_p = Arc::clone(&items);
            let done_p = Arc::clone(&done);
            thread::fork(&k.arc(), &format!("producer-{}", i), 4, move |k| {
                for _ in 0..ROUNDS {
                    items_p.v(k);
                    thread::yield_now(k);
                }
                done_p.v(k);
            });

            let items_c = Arc::clone(&items);
            let done_c = Arc::clone(&done);
            thread::fork(&k.arc(), &format!("consumer-{}", i), 4, move |k| {
                for _ in 0..ROUNDS {
                    items_c.p(k);
                }
                done_c.v(k);
            });
        }

        for _ in 0..2 * WORKERS {
            done.p(k);
        }
        // Every V has been matched by a P: back to the initial value.
        assert_eq!(items.value(), 0);
    });
}

#[test]
fn lock_provides_mutual_exclusion() {
    let kernel = common::plain_kernel("lock");
    kernel.run(|k| {
        const WORKERS: usize = 5;
        const ROUNDS: usize = 20;

        let lock = Arc::new(Lock::new("counter lock"));
        let inside = Arc::new(AtomicUsize::new(0));
        let count = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(Semaphore::new("done", 0));

        for i in 0..WORKERS {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let count = Arc::clone(&count);
            let done = Arc::clone(&done);
            thread::fork(&k.arc(), &format!("worker-{}", i), 4, move |k| {
                for _ in 0..ROUNDS {
                    lock.acquire(k);
                    assert!(lock.is_held_by_current_thread(k));
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    // Give everyone else a chance to break in.
                    thread::yield_now(k);
                    let value = count.load(Ordering::SeqCst);
                    thread::yield_now(k);
                    count.store(value + 1, Ordering::SeqCst);
                    inside.fetch_sub(1, Ordering::SeqCst);
                    lock.release(k);
                }
                done.v(k);
            });
        }

        for _ in 0..WORKERS {
            done.p(k);
        }
        assert_eq!(count.load(Ordering::SeqCst), WORKERS * ROUNDS);
    });
}

#[test]
fn condition_is_mesa_style() {
    let kernel = common::plain_kernel("cond");
    kernel.run(|k| {
        const WAITERS: usize = 3;

        let lock = Arc::new(Lock::new("flag lock"));
        let cond = Arc::new(Condition::new("flag set"));
        let flag = Arc::new(AtomicBool::new(false));
        let done = Arc::new(Semaphore::new("done", 0));

        for i in 0..WAITERS {
            let lock = Arc::clone(&lock);
            let cond = Arc::clone(&cond);
            let flag = Arc::clone(&flag);
            let done = Arc::clone(&done);
            thread::fork(&k.arc(), &format!("waiter-{}", i), 4, move |k| {
                lock.acquire(k);
                // Mesa contract: a woken waiter re-checks its predicate.
                while !flag.load(Ordering::SeqCst) {
                    cond.wait(k, &lock);
                }
                lock.release(k);
                done.v(k);
            });
        }

        // Let every waiter reach its wait.
        for _ in 0..WAITERS * 2 {
            thread::yield_now(k);
        }

        lock.acquire(k);
        flag.store(true, Ordering::SeqCst);
        cond.broadcast(k);
        lock.release(k);

        for _ in 0..WAITERS {
            done.p(k);
        }
    });
}

#[test]
fn condition_signal_wakes_in_fifo_order() {
    let kernel = common::plain_kernel("cond-fifo");
    kernel.run(|k| {
        let lock = Arc::new(Lock::new("order lock"));
        let cond = Arc::new(Condition::new("order"));
        let order = Arc::new(spin::Mutex::new(Vec::new()));
        let woken = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(Semaphore::new("done", 0));

        for i in 0..3 {
            let lock = Arc::clone(&lock);
            let cond = Arc::clone(&cond);
            let order = Arc::clone(&order);
            let woken = Arc::clone(&woken);
            let done = Arc::clone(&done);
            thread::fork(&k.arc(), &format!("sleeper-{}", i), 4, move |k| {
                lock.acquire(k);
                while woken.load(Ordering::SeqCst) <= i {
                    cond.wait(k, &lock);
                }
                order.lock().push(i);
                lock.release(k);
                done.v(k);
            });
            // Queue the waiters in a known order.
            thread::yield_now(k);
        }

        for expected in 0..3 {
            lock.acquire(k);
            woken.store(expected + 1, Ordering::SeqCst);
            cond.broadcast(k);
            lock.release(k);
            done.p(k);
        }

        assert_eq!(*order.lock(), vec![0, 1, 2]);
    });
}

#[test]
fn port_rendezvous_delivers_in_order() {
    let kernel = common::plain_kernel("port");
    kernel.run(|k| {
        let port = Arc::new(Port::new());
        let received = Arc::new(spin::Mutex::new(Vec::new()));
        let done = Arc::new(Semaphore::new("done", 0));

        let port_s = Arc::clone(&port);
        let done_s = Arc::clone(&done);
        thread::fork(&k.arc(), "sender", 4, move |k| {
            for message in 1..=10 {
                port_s.send(k, message);
            }
            done_s.v(k);
        });

        let port_r = Arc::clone(&port);
        let received_r = Arc::clone(&received);
        let done_r = Arc::clone(&done);
        thread::fork(&k.arc(), "receiver", 4, move |k| {
            for _ in 0..10 {
                received_r.lock().push(port_r.receive(k));
            }
            done_r.v(k);
        });

        done.p(k);
        done.p(k);
        assert_eq!(*received.lock(), (1..=10).collect::<Vec<i32>>());
    });
}

#[test]
fn join_observes_exit_status() {
    let kernel = common::plain_kernel("join");
    kernel.run(|k| {
        let finished = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&finished);
        let tid = thread::fork(&k.arc(), "worker", 4, move |k| {
            thread::yield_now(k);
            flag.store(true, Ordering::SeqCst);
            k.current_thread().set_exit_status(7);
        });

        let status = thread::join(k, tid);
        // A completed join means the worker has fully exited.
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(status, 7);
        assert!(k.threads.get(tid).is_finished());
    });
}

/// Priority donation scenario: low-priority L holds the lock, high-priority
/// H blocks on it, and middle-priority M must not run until L, boosted to
/// H's priority, has released.
#[test]
fn priority_donation_blocks_middle_priority() {
    let kernel = common::plain_kernel("donation");
    kernel.run(|k| {
        const HIGH: usize = 1;
        const MID: usize = 3;
        const LOW: usize = 6;

        let lock = Arc::new(Lock::new("donated lock"));
        let events = Arc::new(spin::Mutex::new(Vec::<String>::new()));
        let l_holds = Arc::new(Semaphore::new("L holds", 0));
        let all_done = Arc::new(Semaphore::new("all done", 0));

        {
            let lock = Arc::clone(&lock);
            let events = Arc::clone(&events);
            let l_holds = Arc::clone(&l_holds);
            let all_done = Arc::clone(&all_done);
            thread::fork(&k.arc(), "L", LOW, move |k| {
                lock.acquire(k);
                events.lock().push("L acquired".into());
                l_holds.v(k);
                // Lose the CPU while holding the lock.
                thread::yield_now(k);

                let boosted = k.current_thread().priority();
                events.lock().push(format!("L running at priority {}", boosted));
                lock.release(k);
                let restored = k.current_thread().priority();
                events.lock().push(format!("L released at priority {}", restored));
                all_done.v(k);
            });
        }

        l_holds.p(k);

        {
            let events = Arc::clone(&events);
            let all_done = Arc::clone(&all_done);
            thread::fork(&k.arc(), "M", MID, move |k| {
                events.lock().push("M ran".into());
                all_done.v(k);
            });
        }
        {
            let lock = Arc::clone(&lock);
            let events = Arc::clone(&events);
            let all_done = Arc::clone(&all_done);
            thread::fork(&k.arc(), "H", HIGH, move |k| {
                events.lock().push("H acquiring".into());
                lock.acquire(k);
                events.lock().push("H acquired".into());
                lock.release(k);
                all_done.v(k);
            });
        }

        for _ in 0..3 {
            all_done.p(k);
        }

        let events = events.lock();
        assert_eq!(
            *events,
            vec![
                "L acquired".to_owned(),
                "H acquiring".to_owned(),
                "L running at priority 1".to_owned(),
                "L released at priority 6".to_owned(),
                "H acquired".to_owned(),
                "M ran".to_owned(),
            ]
        );
    });
}

#[test]
fn yield_round_robins_equal_priorities() {
    let kernel = common::plain_kernel("rr");
    kernel.run(|k| {
        let trace = Arc::new(spin::Mutex::new(Vec::new()));
        let done = Arc::new(Semaphore::new("done", 0));

        for id in 0..3 {
            let trace = Arc::clone(&trace);
            let done = Arc::clone(&done);
            thread::fork(&k.arc(), &format!("spinner-{}", id), 4, move |k| {
                for _ in 0..3 {
                    trace.lock().push(id);
                    thread::yield_now(k);
                }
                done.v(k);
            });
        }

        for _ in 0..3 {
            done.p(k);
        }

        let trace = trace.lock();
        // Strict FIFO alternation among equal priorities.
        assert_eq!(*trace, vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);
    });
}
