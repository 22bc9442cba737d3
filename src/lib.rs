//! Forklift: run an application with the backing services it needs.
//!
//! Each requested service (PostgreSQL, Elasticsearch, Redis, ...) is obtained
//! from the first provider that can produce a working instance: a server
//! already on this machine, a Docker container started on demand, or an
//! in-process sink. The application then runs with environment variables
//! describing every service.

pub mod cli;
pub mod config;
pub mod containers;
pub mod drivers;
pub mod error;
pub mod satellite;
pub mod services;
pub mod testing;
pub mod wait;
