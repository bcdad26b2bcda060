//! Error types for the service lifecycle engine.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::name::ServiceName;

/// Lifecycle errors
///
/// Represents the various error conditions that can occur while naming,
/// installing, reconfiguring or reading values from services.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{LifecycleError, ServiceName};
///
/// let err = ServiceName::parse("app..db").unwrap_err();
/// assert!(matches!(err, LifecycleError::InvalidName(_)));
///
/// let duplicate = LifecycleError::DuplicateService(ServiceName::parse("app.db").unwrap());
/// assert_eq!(duplicate.to_string(), "Service app.db is already installed");
/// ```
#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
    /// A service name could not be constructed or parsed
    #[error("Invalid service name: {0}")]
    InvalidName(String),
    /// A controller is already installed under this name
    #[error("Service {0} is already installed")]
    DuplicateService(ServiceName),
    /// Installing the service would close a dependency cycle (includes path)
    #[error("Circular dependency: {}", join_path(.0))]
    CircularDependency(Vec<ServiceName>),
    /// No controller is installed under this name
    #[error("Service not found: {0}")]
    ServiceNotFound(ServiceName),
    /// The value behind a slot was read before its producer set it
    #[error("Value of {0} is not available")]
    ValueNotAvailable(ServiceName),
    /// A single-assignment value slot was written twice
    #[error("Value of {0} was already set")]
    ValueAlreadySet(ServiceName),
    /// The stored value has a different type than requested
    #[error("Type mismatch for value of {name}: expected {expected}")]
    TypeMismatch {
        name: ServiceName,
        expected: &'static str,
    },
    /// The operation is not valid in the controller's current state
    #[error("Illegal state: {0}")]
    IllegalState(&'static str),
    /// The service failed to start
    #[error(transparent)]
    StartFailed(#[from] StartError),
    /// The service was removed before the value became available
    #[error("Service {0} was removed")]
    ServiceRemoved(ServiceName),
    /// A configuration value could not be parsed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn join_path(path: &[ServiceName]) -> String {
    path.iter()
        .map(ServiceName::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type for lifecycle operations
///
/// A convenience type alias for `Result<T, LifecycleError>` used throughout
/// ferrous-lifecycle.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Structured start failure.
///
/// Returned by a service's start operation (or passed to
/// [`StartCompletion::failed`](crate::StartCompletion::failed)). The
/// controller stamps the originating service name onto the error before it
/// is stored, so [`ServiceController::start_error`](crate::ServiceController::start_error)
/// always reports which service failed.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::StartError;
///
/// let io = std::io::Error::new(std::io::ErrorKind::Other, "port in use");
/// let err = StartError::with_source("cannot bind listener", io);
/// assert_eq!(err.message(), "cannot bind listener");
/// assert!(err.service().is_none());
/// ```
#[derive(Clone)]
pub struct StartError {
    service: Option<ServiceName>,
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl StartError {
    /// Creates a failure carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            service: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a failure wrapping an underlying error.
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            service: None,
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// The service that failed, once the controller has recorded the error.
    pub fn service(&self) -> Option<&ServiceName> {
        self.service.as_ref()
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn for_service(mut self, name: &ServiceName) -> Self {
        if self.service.is_none() {
            self.service = Some(name.clone());
        }
        self
    }
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.service {
            Some(name) => write!(f, "Service {} failed to start: {}", name, self.message),
            None => write!(f, "Service failed to start: {}", self.message),
        }
    }
}

impl fmt::Debug for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartError")
            .field("service", &self.service)
            .field("message", &self.message)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

impl From<String> for StartError {
    fn from(message: String) -> Self {
        StartError::new(message)
    }
}

impl From<&str> for StartError {
    fn from(message: &str) -> Self {
        StartError::new(message)
    }
}
