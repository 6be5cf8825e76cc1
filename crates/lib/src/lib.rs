//! supportdesk core library: backend client, chat sync engine, configuration and
//! history persistence used by the CLI.

pub mod api;
pub mod config;
pub mod init;
pub mod store;
pub mod sync;
