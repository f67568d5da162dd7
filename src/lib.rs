pub mod command;
pub mod config;
pub mod irc;
pub mod store;
