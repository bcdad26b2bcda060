//! # ferrous-lifecycle
//!
//! Dependency-driven service lifecycle management.
//!
//! Services are installed under hierarchical [`ServiceName`]s and declare
//! what they depend on. Each service is driven by its own controller
//! through a state machine: it starts once every required dependency is up,
//! stops before any of them stops, and reacts to failures, removals and
//! mode changes anywhere in the graph. All work runs on an [`Executor`]; a
//! [`StabilityMonitor`] reports when the whole graph has come to rest.
//!
//! ## Features
//!
//! - **Modes**: `ACTIVE`, `PASSIVE`, `ON_DEMAND`, `LAZY`, `NEVER` and
//!   `REMOVE` decide when a service wants to run (see [`Mode`])
//! - **Dependency kinds**: required, optional and anti-dependencies
//! - **Value injection**: typed [`Required`] / [`Provided`] handles and
//!   outbound [`Injector`]s
//! - **Child services**: installed from a parent's start, removed with it
//! - **Asynchronous start/stop** through [`StartCompletion`] and
//!   [`StopCompletion`]
//! - **Cycle detection** at install time, with the full path
//! - **Listeners** for transitions and lifecycle events
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrous_lifecycle::{FnService, Mode, ServiceContainer, ServiceName, State};
//!
//! let container = ServiceContainer::new();
//! let config = ServiceName::parse("app.config").unwrap();
//! let server = ServiceName::parse("app.server").unwrap();
//!
//! let mut builder = container.add_service(config.clone());
//! let port = builder.provides::<u16>();
//! builder.set_service(FnService::new(move |_| port.set(8080).map_err(|e| e.to_string().into())));
//! builder.set_initial_mode(Mode::OnDemand);
//! let config_ctl = builder.install().unwrap();
//!
//! let mut builder = container.add_service(server);
//! let port = builder.requires::<u16>(config);
//! builder.set_service(FnService::new(move |_| {
//!     assert_eq!(*port.get().map_err(|e| e.to_string())?, 8080);
//!     Ok(())
//! }));
//! let server_ctl = builder.install().unwrap();
//!
//! container.await_stability();
//! // the server demands its on-demand dependency, so both are up
//! assert_eq!(config_ctl.state(), State::Up);
//! assert_eq!(server_ctl.state(), State::Up);
//!
//! // removing the server releases the demand and config stops again
//! server_ctl.set_mode(Mode::Remove).unwrap();
//! container.await_stability();
//! assert_eq!(config_ctl.state(), State::Down);
//! container.shutdown();
//! ```
//!
//! ## Failure handling
//!
//! ```rust
//! use ferrous_lifecycle::{FnService, ServiceContainer, ServiceName, StartError, State};
//!
//! let container = ServiceContainer::new();
//! let mut builder = container.add_service(ServiceName::parse("flaky").unwrap());
//! builder.set_service(FnService::new(|_| Err(StartError::new("disk full"))));
//! let flaky = builder.install().unwrap();
//!
//! container.await_stability();
//! assert_eq!(flaky.state(), State::StartFailed);
//! assert_eq!(flaky.start_error().unwrap().message(), "disk full");
//! container.shutdown();
//! ```

// Module declarations
pub mod builder;
pub mod config;
pub mod container;
pub mod controller;
pub mod error;
pub mod executor;
pub mod mode;
pub mod name;
pub mod observer;
pub mod service;
pub mod stability;
pub mod value;

mod dependency;
mod internal;
mod registration;

// Re-exports for convenience
pub use builder::ServiceBuilder;
pub use config::{ContainerConfig, ENV_PREFIX};
pub use container::ServiceContainer;
pub use controller::{
    ChildTarget, ServiceController, StartCompletion, StartContext, StopCompletion, StopContext,
};
pub use error::{LifecycleError, LifecycleResult, StartError};
pub use executor::{Executor, Job, ThreadPoolExecutor};
pub use mode::{DependencyKind, LifecycleEvent, Mode, State, Substate};
pub use name::ServiceName;
pub use observer::{LoggingListener, ServiceListener};
pub use service::{FnService, NullService, Service};
pub use stability::StabilityMonitor;
pub use value::{Injector, Provided, Required};
