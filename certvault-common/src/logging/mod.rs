// Logging utilities for the Certvault system
//
// Loggers are cheap to clone and carry their context with them:
// - the component that emits the message
// - an instance id (process or engine name)
// - the owner an operation runs on behalf of
// - the operation name (generate, import, export, ...)

use log::{log, log_enabled, Level};
use std::fmt::{self, Arguments, Display, Formatter};

/// Predefined components for logging categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Engine,
    Keystore,
    CLI,
    Custom(&'static str),
}

impl Component {
    /// Get the string representation of the component
    pub fn as_str(&self) -> &str {
        match self {
            Component::Engine => "Engine",
            Component::Keystore => "Keystore",
            Component::CLI => "CLI",
            Component::Custom(name) => name,
        }
    }
}

// Renders `Parent.Component|owner=..|op=..` without building an intermediate String
struct PrefixDisplay<'a> {
    logger: &'a Logger,
}

impl Display for PrefixDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let logger = self.logger;
        match logger.parent_component {
            Some(parent) if parent != logger.component => {
                write!(f, "{}.{}", parent.as_str(), logger.component.as_str())?
            }
            _ => write!(f, "{}", logger.component.as_str())?,
        }
        if let Some(owner) = &logger.owner {
            write!(f, "|owner={owner}")?;
        }
        if let Some(op) = &logger.operation {
            write!(f, "|op={op}")?;
        }
        Ok(())
    }
}

/// A component-scoped logger
#[derive(Clone, Debug)]
pub struct Logger {
    /// Component this logger is for
    component: Component,
    /// Instance identifier (process, engine or test name)
    instance_id: String,
    /// Parent component for hierarchical logging (if any)
    parent_component: Option<Component>,
    /// Owner on whose behalf the current operation runs
    owner: Option<String>,
    /// Name of the operation being traced
    operation: Option<String>,
}

impl Logger {
    /// Create a new root logger for a component and instance id
    pub fn new_root(component: Component, instance_id: &str) -> Self {
        Self {
            component,
            instance_id: instance_id.to_string(),
            parent_component: None,
            owner: None,
            operation: None,
        }
    }

    /// Create a child logger with the same instance id but a different component
    pub fn with_component(&self, component: Component) -> Self {
        Self {
            component,
            instance_id: self.instance_id.clone(),
            parent_component: Some(self.component),
            owner: self.owner.clone(),
            operation: self.operation.clone(),
        }
    }

    /// Create a logger scoped to an owner
    pub fn with_owner(&self, owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..self.clone()
        }
    }

    /// Create a logger scoped to a named operation
    pub fn with_operation(&self, operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            ..self.clone()
        }
    }

    pub fn component(&self) -> Component {
        self.component
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    /// Full prefix as rendered in log lines
    pub fn prefix(&self) -> String {
        PrefixDisplay { logger: self }.to_string()
    }

    fn emit(&self, level: Level, args: Arguments) {
        if log_enabled!(level) {
            log!(
                level,
                "[{}][{}] {}",
                self.instance_id,
                PrefixDisplay { logger: self },
                args
            );
        }
    }

    /// Log a debug message
    pub fn debug(&self, message: impl Into<String>) {
        if log_enabled!(Level::Debug) {
            self.emit(Level::Debug, format_args!("{}", message.into()));
        }
    }

    /// Log a debug message using fmt::Arguments (avoids allocating message String)
    pub fn debug_args(&self, args: Arguments) {
        self.emit(Level::Debug, args);
    }

    /// Log an info message
    pub fn info(&self, message: impl Into<String>) {
        if log_enabled!(Level::Info) {
            self.emit(Level::Info, format_args!("{}", message.into()));
        }
    }

    pub fn info_args(&self, args: Arguments) {
        self.emit(Level::Info, args);
    }

    /// Log a warning message
    pub fn warn(&self, message: impl Into<String>) {
        if log_enabled!(Level::Warn) {
            self.emit(Level::Warn, format_args!("{}", message.into()));
        }
    }

    pub fn warn_args(&self, args: Arguments) {
        self.emit(Level::Warn, args);
    }

    /// Log an error message
    pub fn error(&self, message: impl Into<String>) {
        if log_enabled!(Level::Error) {
            self.emit(Level::Error, format_args!("{}", message.into()));
        }
    }

    pub fn error_args(&self, args: Arguments) {
        self.emit(Level::Error, args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_includes_parent_owner_and_operation() {
        let root = Logger::new_root(Component::Engine, "test");
        assert_eq!(root.prefix(), "Engine");

        let child = root
            .with_component(Component::Keystore)
            .with_owner("alice")
            .with_operation("generate");
        assert_eq!(child.prefix(), "Engine.Keystore|owner=alice|op=generate");
        assert_eq!(child.instance_id(), "test");
        assert_eq!(child.owner(), Some("alice"));
    }

    #[test]
    fn custom_component_uses_its_name() {
        let logger = Logger::new_root(Component::Custom("Audit"), "x");
        assert_eq!(logger.component().as_str(), "Audit");
        // Logging without an installed logger must be a no-op
        logger.info("hello");
        logger.debug_args(format_args!("value={}", 1));
        crate::log_info!(logger, "formatted {}", "message");
    }

    #[test]
    fn scoped_op_logger_is_built_only_when_enabled() {
        let logger = Logger::new_root(Component::Engine, "op-test");
        let mut built = false;
        // no logger is installed, so every level is disabled
        crate::log_op!(
            {
                built = true;
                &logger
            },
            "alice",
            "delete";
            warn,
            "identity {} kept",
            42
        );
        assert!(!built);
        assert!(logger.owner().is_none());
    }
}
