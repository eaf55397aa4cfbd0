//! NAS service daemon library.
//!
//! Renders Samba, NFS and vsftpd configs from typed records, deploys them
//! atomically with backups, drives the services through systemd and rolls
//! back configs a service rejects. Health checks and metrics report whether
//! the deployed configs are live. Everything is reachable over a local
//! Unix control socket.

pub mod auth;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod services;
pub mod socket;
pub mod store;
pub mod templates;
pub mod validation;
