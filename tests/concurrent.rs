/// Concurrent access integration tests
///
/// Many threads install, reconfigure and remove services against one
/// container at the same time; the graph must still converge.

mod common;

use crossbeam_utils::thread;
use ferrous_lifecycle::{FnService, LifecycleError, Mode, State};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use common::name;

const THREADS: usize = 8;

#[test]
fn test_concurrent_installs_of_one_name_admit_exactly_one() {
    let container = common::container();
    let barrier = Barrier::new(THREADS);
    let winners = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|_| {
                barrier.wait();
                match container.add_service(name("contested")).install() {
                    Ok(_) => {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(LifecycleError::DuplicateService(_)) => {}
                    Err(other) => panic!("unexpected error: {}", other),
                }
            });
        }
    })
    .unwrap();

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    container.await_stability();
    assert_eq!(container.required_service(&name("contested")).unwrap().state(), State::Up);
    container.shutdown();
}

#[test]
fn test_wide_fan_in_converges_from_many_threads() {
    let container = common::container();
    let started = Arc::new(AtomicUsize::new(0));
    let barrier = Barrier::new(THREADS);

    thread::scope(|s| {
        for t in 0..THREADS {
            let started = Arc::clone(&started);
            let container = &container;
            let barrier = &barrier;
            s.spawn(move |_| {
                barrier.wait();
                for i in 0..10 {
                    let mut builder = container.add_service(name(&format!("leaf.t{}.s{}", t, i)));
                    builder.add_dependency(name("root")).set_initial_mode(Mode::OnDemand);
                    let counter = Arc::clone(&started);
                    builder.set_service(FnService::new(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }));
                    builder.install().unwrap();
                }
            });
        }
        s.spawn(|_| {
            container.add_service(name("root")).install().unwrap();
        });
    })
    .unwrap();

    container.await_stability();
    // nothing demands the on-demand leaves
    assert_eq!(started.load(Ordering::SeqCst), 0);

    let mut top = container.add_service(name("top"));
    for t in 0..THREADS {
        for i in 0..10 {
            top.add_dependency(name(&format!("leaf.t{}.s{}", t, i)));
        }
    }
    let top = top.install().unwrap();
    assert!(container.await_stability_timeout(Duration::from_secs(30)));
    assert_eq!(top.state(), State::Up);
    assert_eq!(started.load(Ordering::SeqCst), THREADS * 10);

    container.shutdown();
    assert!(container.service_names().is_empty());
}

#[test]
fn test_mode_flapping_settles_on_the_last_mode() {
    let container = common::container();
    let base = container.add_service(name("base")).install().unwrap();
    let mut dependents = Vec::new();
    for i in 0..4 {
        let mut builder = container.add_service(name(&format!("dep{}", i)));
        builder.add_dependency(name("base"));
        dependents.push(builder.install().unwrap());
    }
    container.await_stability();

    thread::scope(|s| {
        for t in 0..THREADS {
            let base = &base;
            s.spawn(move |_| {
                for i in 0..50 {
                    let mode = if (t + i) % 2 == 0 { Mode::Never } else { Mode::Active };
                    base.set_mode(mode).unwrap();
                }
            });
        }
    })
    .unwrap();

    base.set_mode(Mode::Active).unwrap();
    assert!(container.await_stability_timeout(Duration::from_secs(30)));
    assert_eq!(base.state(), State::Up);
    for dep in &dependents {
        assert_eq!(dep.state(), State::Up);
    }

    base.set_mode(Mode::Never).unwrap();
    container.await_stability();
    for dep in &dependents {
        assert_eq!(dep.state(), State::Down);
        assert_eq!(dep.unavailable_dependencies(), vec![name("base")]);
    }
    container.shutdown();
}

#[test]
fn test_removal_races_with_dependent_installation() {
    for round in 0..20 {
        let container = common::container();
        let provider = container.add_service(name("provider")).install().unwrap();
        container.await_stability();

        thread::scope(|s| {
            s.spawn(|_| provider.set_mode(Mode::Remove).unwrap());
            s.spawn(|_| {
                let mut builder = container.add_service(name("consumer"));
                builder.add_dependency(name("provider"));
                builder.install().unwrap();
            });
        })
        .unwrap();

        assert!(
            container.await_stability_timeout(Duration::from_secs(10)),
            "round {} did not settle",
            round
        );
        let consumer = container.required_service(&name("consumer")).unwrap();
        assert_eq!(provider.state(), State::Removed);
        assert_ne!(consumer.state(), State::Up);
        assert_eq!(consumer.unavailable_dependencies(), vec![name("provider")]);
        container.shutdown();
    }
}
