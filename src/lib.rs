pub mod actuator;
pub mod config;
pub mod messages;
pub mod runtime;
