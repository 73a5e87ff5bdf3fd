pub mod command;
pub mod commands;
pub mod config;
pub mod elevation;
pub mod engine;
pub mod error;
pub mod gate;
pub mod layout;
pub mod package;
pub mod reboot;
pub mod report;
pub mod runtime;
pub mod service;
pub mod shell;
