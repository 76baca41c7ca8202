pub mod auth;
pub mod bootstrap;
pub mod commands;
pub mod journal;
pub mod navigation;
pub mod session;
pub mod settings;
pub mod snapshot;
pub mod stores;
pub mod tasks;
