#![no_main]

use libfuzzer_sys::fuzz_target;
use ferrous_lifecycle::{Mode, ServiceContainer, ServiceName, State};
use std::time::Duration;

const SERVICES: u8 = 6;

fn mode_of(byte: u8) -> Mode {
    match byte % 6 {
        0 => Mode::Remove,
        1 => Mode::Never,
        2 => Mode::OnDemand,
        3 => Mode::Lazy,
        4 => Mode::Passive,
        _ => Mode::Active,
    }
}

fuzz_target!(|data: &[u8]| {
    if data.len() < SERVICES as usize * 2 {
        return;
    }
    let names: Vec<ServiceName> = (0..SERVICES)
        .map(|i| ServiceName::of(["fuzz".to_string(), format!("s{}", i)]).unwrap())
        .collect();

    let container = ServiceContainer::new();
    let (layout, ops) = data.split_at(SERVICES as usize * 2);

    // Each service may depend on lower-numbered ones; byte pairs choose
    // the dependency mask and the initial mode
    for (i, pair) in layout.chunks(2).enumerate() {
        let mut builder = container.add_service(names[i].clone());
        for (j, dep) in names.iter().enumerate().take(i) {
            if pair[0] & (1 << j) != 0 {
                match pair[0] >> 6 {
                    0 => builder.add_optional_dependency(dep.clone()),
                    1 => builder.add_anti_dependency(dep.clone()),
                    _ => builder.add_dependency(dep.clone()),
                };
            }
        }
        builder.set_initial_mode(mode_of(pair[1]));
        let _ = builder.install();
    }

    for op in ops.chunks(2) {
        let target = &names[(op[0] % SERVICES) as usize];
        if let Some(ctl) = container.service(target) {
            let _ = ctl.set_mode(mode_of(*op.get(1).unwrap_or(&5)));
        }
    }

    assert!(
        container.await_stability_timeout(Duration::from_secs(10)),
        "graph did not settle"
    );
    for name in &names {
        if let Some(ctl) = container.service(name) {
            assert!(ctl.state() != State::Starting && ctl.state() != State::Stopping);
        }
    }
    container.shutdown();
});
