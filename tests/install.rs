/// Installation and value wiring tests
///
/// Covers name claims, aliases, cycle rejection, value handles and the
/// extra stability monitors a builder can attach.

mod common;

use ferrous_lifecycle::{
    FnService, Injector, LifecycleError, LoggingListener, Mode, StabilityMonitor,
    StartError, State,
};
use std::sync::Arc;
use std::time::Duration;

use common::name;

#[test]
fn test_duplicate_names_are_rejected() {
    let container = common::container();
    container.add_service(name("db")).install().unwrap();

    let err = container.add_service(name("db")).install().unwrap_err();
    assert!(matches!(err, LifecycleError::DuplicateService(n) if n == name("db")));

    // an alias clashing with an installed primary name fails the same way
    let mut builder = container.add_service(name("db2"));
    builder.add_alias(name("db"));
    assert!(matches!(builder.install(), Err(LifecycleError::DuplicateService(_))));
    assert!(container.service(&name("db2")).is_none());
    container.shutdown();
}

#[test]
fn test_aliases_resolve_to_the_same_controller() {
    let container = common::container();
    let mut builder = container.add_service(name("jdbc.main"));
    builder.add_alias(name("jdbc.default"));
    let ctl = builder.install().unwrap();

    let mut user = container.add_service(name("app"));
    user.add_dependency(name("jdbc.default"));
    let user = user.install().unwrap();
    container.await_stability();

    assert_eq!(container.service(&name("jdbc.default")), Some(ctl.clone()));
    assert_eq!(ctl.aliases(), &[name("jdbc.default")]);
    assert_eq!(user.state(), State::Up);
    assert_eq!(container.service_names(), vec![name("app"), name("jdbc.default"), name("jdbc.main")]);

    ctl.set_mode(Mode::Remove).unwrap();
    container.await_stability();
    assert!(container.service(&name("jdbc.default")).is_none());
    assert_eq!(user.unavailable_dependencies(), vec![name("jdbc.default")]);
    container.shutdown();
}

#[test]
fn test_cycles_are_rejected_with_their_path() {
    let container = common::container();
    let mut a = container.add_service(name("a"));
    a.add_dependency(name("b"));
    a.install().unwrap();
    let mut b = container.add_service(name("b"));
    b.add_dependency(name("c"));
    b.install().unwrap();

    let mut c = container.add_service(name("c"));
    c.add_dependency(name("a"));
    match c.install() {
        Err(LifecycleError::CircularDependency(path)) => {
            assert_eq!(path, vec![name("c"), name("a"), name("b"), name("c")]);
        }
        other => panic!("expected a cycle, got {:?}", other),
    }
    assert!(container.service(&name("c")).is_none());

    let mut selfish = container.add_service(name("self"));
    selfish.add_dependency(name("self"));
    assert!(matches!(selfish.install(), Err(LifecycleError::CircularDependency(_))));
    container.shutdown();
}

#[test]
fn test_conflicting_dependency_kinds_are_rejected() {
    let container = common::container();
    let mut builder = container.add_service(name("confused"));
    builder.add_dependency(name("x")).add_anti_dependency(name("x"));
    assert!(matches!(builder.install(), Err(LifecycleError::IllegalState(_))));

    // declaring the same kind twice is fine
    let mut builder = container.add_service(name("repeated"));
    builder.add_dependency(name("x")).add_dependency(name("x"));
    let ctl = builder.install().unwrap();
    assert_eq!(ctl.dependencies(), vec![name("x")]);
    container.shutdown();
}

#[test]
fn test_values_flow_from_providers_to_dependents() {
    let container = common::container();
    let mut config = container.add_service(name("config"));
    let port = config.provides::<u16>();
    let host = config.provides_as::<String>(name("config.host"));
    config.set_service(FnService::new(move |_| {
        port.set(8080).map_err(|e| StartError::with_source("port", e))?;
        host.set("localhost".into()).map_err(|e| StartError::with_source("host", e))?;
        Ok(())
    }));
    let config = config.install().unwrap();

    let mut server = container.add_service(name("server"));
    let port = server.requires::<u16>(name("config"));
    let host = server.requires::<String>(name("config.host"));
    let address = server.provides::<String>();
    server.set_service(FnService::new(move |_| {
        let port = port.get().map_err(|e| e.to_string())?;
        let host = host.get().map_err(|e| e.to_string())?;
        address.set(format!("{}:{}", host, port)).map_err(|e| e.to_string().into())
    }));
    let target: Injector<String> = Injector::new();
    server.add_injection(&target);
    let server = server.install().unwrap();

    assert_eq!(
        server.await_value_timeout::<String>(Duration::from_secs(5)).unwrap().as_str(),
        "localhost:8080"
    );
    container.await_stability();
    assert_eq!(target.get().unwrap().as_str(), "localhost:8080");
    assert_eq!(*config.value::<u16>().unwrap(), 8080);
    assert!(matches!(config.value::<String>(), Err(LifecycleError::TypeMismatch { .. })));

    // stopping clears both the provided value and the injection target
    server.set_mode(Mode::Never).unwrap();
    container.await_stability();
    assert!(server.value::<String>().is_err());
    assert!(target.get().is_none());
    container.shutdown();
}

#[test]
fn test_failed_start_reports_through_await_value() {
    let container = common::container();
    let mut builder = container.add_service(name("broken"));
    builder.set_service(FnService::new(|_| Err("no database".into())));
    builder.add_listener(Arc::new(LoggingListener::with_prefix("test")));
    let ctl = builder.install().unwrap();

    match ctl.await_value::<u32>() {
        Err(LifecycleError::StartFailed(err)) => {
            assert_eq!(err.message(), "no database");
            assert_eq!(err.service(), Some(&name("broken")));
            assert_eq!(err.to_string(), "Service broken failed to start: no database");
        }
        other => panic!("expected a start failure, got {:?}", other),
    }
    container.shutdown();
}

#[test]
fn test_extra_monitors_track_their_services_only() {
    let container = common::container();
    let monitor = Arc::new(StabilityMonitor::new());

    let (tx, rx) = std::sync::mpsc::sync_channel(1);
    let mut slow = container.add_service(name("slow"));
    slow.add_monitor(Arc::clone(&monitor));
    slow.set_service(FnService::new(move |ctx| {
        tx.send(ctx.asynchronous()).map_err(|e| e.to_string())?;
        Ok(())
    }));
    let slow = slow.install().unwrap();
    container.add_service(name("fast")).install().unwrap();

    let completion = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(!monitor.await_stability_timeout(Duration::from_millis(50)));
    assert!(!container.is_stable());

    completion.complete().unwrap();
    assert!(monitor.await_stability_timeout(Duration::from_secs(5)));
    container.await_stability();
    assert_eq!(slow.state(), State::Up);
    assert_eq!(monitor.unstable_count(), 0);
    container.shutdown();
}

#[test]
fn test_required_service_reports_missing_names() {
    let container = common::container();
    assert!(matches!(
        container.required_service(&name("ghost")),
        Err(LifecycleError::ServiceNotFound(_))
    ));
    assert!(container.service_names().is_empty());
}
