/// Lifecycle scenario tests
///
/// Each test builds a small service graph, drives it with mode changes and
/// checks where the graph comes to rest.

mod common;

use ferrous_lifecycle::{
    FnService, LifecycleEvent, Mode, ServiceContainer, ServiceController, ServiceListener, State,
    Substate,
};
use parking_lot::Mutex;
use std::sync::Arc;

use common::name;

/// Records the order in which services start.
#[derive(Default)]
struct StartLog(Mutex<Vec<String>>);

impl StartLog {
    fn service(self: &Arc<Self>, label: &str) -> FnService {
        let log = Arc::clone(self);
        let label = label.to_string();
        FnService::new(move |_| {
            log.0.lock().push(label.clone());
            Ok(())
        })
    }

    fn position(&self, label: &str) -> Option<usize> {
        self.0.lock().iter().position(|l| l == label)
    }
}

/// Snapshots the children's states when the parent reports its removal.
#[derive(Default)]
struct RemovalWatch {
    children: Mutex<Vec<ServiceController>>,
    at_parent_removal: Mutex<Option<Vec<State>>>,
}

impl ServiceListener for RemovalWatch {
    fn lifecycle_event(&self, _controller: &ServiceController, event: LifecycleEvent) {
        if event == LifecycleEvent::Removed {
            let states = self.children.lock().iter().map(|c| c.state()).collect();
            *self.at_parent_removal.lock() = Some(states);
        }
    }
}

// ===== Stability convergence =====

fn install_chain(container: &ServiceContainer, log: &Arc<StartLog>, which: &str) -> ServiceController {
    let mut builder = container.add_service(name(which));
    builder.set_service(log.service(which));
    match which {
        "b" => {
            builder.add_dependency(name("a"));
        }
        "c" => {
            builder.add_dependency(name("b")).set_initial_mode(Mode::OnDemand);
        }
        _ => {}
    }
    builder.install().unwrap()
}

#[test]
fn test_on_demand_leaf_stays_down_in_every_install_order() {
    let orders = [
        ["a", "b", "c"],
        ["a", "c", "b"],
        ["b", "a", "c"],
        ["b", "c", "a"],
        ["c", "a", "b"],
        ["c", "b", "a"],
    ];
    for order in orders {
        let container = common::container();
        let log = Arc::new(StartLog::default());
        let mut controllers = Vec::new();
        for which in order {
            controllers.push((which, install_chain(&container, &log, which)));
        }
        container.await_stability();

        for (which, ctl) in &controllers {
            let expected = if *which == "c" { State::Down } else { State::Up };
            assert_eq!(ctl.state(), expected, "{} in order {:?}", which, order);
        }
        assert!(log.position("c").is_none());
        assert!(log.position("a") < log.position("b"));

        // demand c from a new active dependent
        let mut demander = container.add_service(name("d"));
        demander.add_dependency(name("c"));
        let demander = demander.install().unwrap();
        container.await_stability();

        assert_eq!(demander.state(), State::Up);
        assert_eq!(container.required_service(&name("c")).unwrap().state(), State::Up);
        assert!(log.position("b") < log.position("c"));
        container.shutdown();
    }
}

#[test]
fn test_passive_service_waits_for_dependencies_without_demanding_them() {
    let container = common::container();
    let mut q = container.add_service(name("q"));
    q.set_initial_mode(Mode::OnDemand);
    let q = q.install().unwrap();

    let mut p = container.add_service(name("p"));
    p.add_dependency(name("q")).set_initial_mode(Mode::Passive);
    let p = p.install().unwrap();
    container.await_stability();

    assert_eq!(q.substate(), Substate::Waiting);
    assert_eq!(p.substate(), Substate::Waiting);

    q.set_mode(Mode::Active).unwrap();
    container.await_stability();
    assert_eq!(q.state(), State::Up);
    assert_eq!(p.state(), State::Up);
    container.shutdown();
}

#[test]
fn test_lazy_service_stays_up_after_demand_goes_away() {
    let container = common::container();
    let mut lazy = container.add_service(name("lazy"));
    lazy.set_initial_mode(Mode::Lazy);
    let lazy = lazy.install().unwrap();
    container.await_stability();
    assert_eq!(lazy.state(), State::Down);

    let mut user = container.add_service(name("user"));
    user.add_dependency(name("lazy"));
    let user = user.install().unwrap();
    container.await_stability();
    assert_eq!(lazy.state(), State::Up);

    user.set_mode(Mode::Remove).unwrap();
    container.await_stability();
    assert_eq!(user.state(), State::Removed);
    assert_eq!(lazy.state(), State::Up);
    container.shutdown();
}

// ===== Optional dependencies =====

#[test]
fn test_missing_optional_dependency_only_blocks_once_demanded() {
    let container = common::container();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut e = container.add_service(name("e"));
    let value = e.requires_optional::<u32>(name("opt"));
    e.set_initial_mode(Mode::Passive);
    let sink = Arc::clone(&seen);
    e.set_service(FnService::new(move |_| {
        sink.lock().push(value.try_get().map(|v| *v));
        Ok(())
    }));
    let e = e.install().unwrap();
    container.await_stability();

    // not demanded: the missing dependency looks up
    assert_eq!(e.state(), State::Up);
    assert!(e.unavailable_dependencies().is_empty());

    let mut f = container.add_service(name("f"));
    f.add_dependency(name("e"));
    let f = f.install().unwrap();
    container.await_stability();

    // demanded: the missing dependency is now seen as unavailable, but
    // a service already running without it keeps running
    assert_eq!(e.unavailable_dependencies(), vec![name("opt")]);
    assert_eq!(e.state(), State::Up);
    assert_eq!(f.state(), State::Up);

    let mut opt = container.add_service(name("opt"));
    let provided = opt.provides::<u32>();
    opt.set_service(FnService::new(move |_| provided.set(5).map_err(|e| e.to_string().into())));
    opt.set_initial_mode(Mode::OnDemand);
    let opt = opt.install().unwrap();
    container.await_stability();

    assert!(e.unavailable_dependencies().is_empty());
    assert_eq!(opt.state(), State::Down);

    // once restarted, e runs on top of the real dependency
    e.set_mode(Mode::Never).unwrap();
    container.await_stability();
    assert_eq!(f.substate(), Substate::Problem);
    e.set_mode(Mode::Active).unwrap();
    container.await_stability();

    assert_eq!(opt.state(), State::Up);
    assert_eq!(e.state(), State::Up);
    assert_eq!(f.state(), State::Up);
    assert_eq!(*seen.lock(), vec![None, Some(5)]);
    container.shutdown();
}

#[test]
fn test_optional_value_is_injected_when_present() {
    let container = common::container();
    let mut opt = container.add_service(name("opt"));
    let provided = opt.provides::<String>();
    opt.set_service(FnService::new(move |_| {
        provided.set("hello".to_string()).map_err(|e| e.to_string().into())
    }));
    opt.install().unwrap();

    let seen = Arc::new(Mutex::new(None));
    let mut user = container.add_service(name("user"));
    let value = user.requires_optional::<String>(name("opt"));
    let sink = Arc::clone(&seen);
    user.set_service(FnService::new(move |_| {
        *sink.lock() = value.try_get().map(|v| v.to_string());
        Ok(())
    }));
    let user = user.install().unwrap();
    container.await_stability();

    assert_eq!(user.state(), State::Up);
    assert_eq!(seen.lock().as_deref(), Some("hello"));
    container.shutdown();
}

// ===== Anti-dependencies =====

#[test]
fn test_anti_dependency_runs_only_while_target_is_down() {
    let container = common::container();
    let mut fallback = container.add_service(name("fallback"));
    fallback.add_anti_dependency(name("primary"));
    let fallback = fallback.install().unwrap();
    container.await_stability();
    assert_eq!(fallback.state(), State::Up);

    let mut primary = container.add_service(name("primary"));
    primary.set_initial_mode(Mode::Never);
    let primary = primary.install().unwrap();
    container.await_stability();
    assert_eq!(fallback.state(), State::Up);

    primary.set_mode(Mode::Active).unwrap();
    container.await_stability();
    assert_eq!(primary.state(), State::Up);
    assert_ne!(fallback.state(), State::Up);

    primary.set_mode(Mode::Never).unwrap();
    container.await_stability();
    assert_eq!(fallback.state(), State::Up);
    container.shutdown();
}

#[test]
fn test_anti_dependency_stops_a_lazy_target() {
    let container = common::container();
    let mut lazy = container.add_service(name("lazy"));
    lazy.set_initial_mode(Mode::Lazy);
    let lazy = lazy.install().unwrap();

    let mut user = container.add_service(name("user"));
    user.add_dependency(name("lazy"));
    let user = user.install().unwrap();
    container.await_stability();
    user.set_mode(Mode::Remove).unwrap();
    container.await_stability();
    assert_eq!(lazy.state(), State::Up);

    let mut opponent = container.add_service(name("opponent"));
    opponent.add_anti_dependency(name("lazy"));
    let opponent = opponent.install().unwrap();
    container.await_stability();

    assert_eq!(lazy.state(), State::Down);
    assert_eq!(opponent.state(), State::Up);
    container.shutdown();
}

// ===== Removal =====

#[test]
fn test_removing_a_parent_removes_children_first() {
    let container = common::container();
    let watch = Arc::new(RemovalWatch::default());

    let mut parent = container.add_service(name("host"));
    parent.add_listener(Arc::clone(&watch) as Arc<dyn ServiceListener>);
    let children = Arc::clone(&watch);
    parent.set_service(FnService::new(move |ctx| {
        let target = ctx.child_target();
        for child in ["one", "two", "three"] {
            let child_name = ctx.name().append([child]).map_err(|e| e.to_string())?;
            let builder = target.add_service(child_name).map_err(|e| e.to_string())?;
            let controller = builder.install().map_err(|e| e.to_string())?;
            children.children.lock().push(controller);
        }
        Ok(())
    }));
    let parent = parent.install().unwrap();
    container.await_stability();
    assert_eq!(container.service_names().len(), 4);

    parent.set_mode(Mode::Remove).unwrap();
    container.await_stability();

    assert_eq!(parent.state(), State::Removed);
    assert!(container.service_names().is_empty());
    let states = watch.at_parent_removal.lock().clone().unwrap();
    assert_eq!(states, vec![State::Removed; 3]);
}

#[test]
fn test_shutdown_removes_everything() {
    let container = common::container();
    let log = Arc::new(StartLog::default());
    for which in ["a", "b", "c"] {
        install_chain(&container, &log, which);
    }
    container.await_stability();

    container.shutdown();
    assert!(container.service_names().is_empty());
    assert!(container.is_stable());
}
