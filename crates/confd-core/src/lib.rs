//! # confd-core
//!
//! The runtime supervisor that turns configuration, a backend adapter, and
//! a set of template resources into a running daemon: it resolves config,
//! discovers `conf.d` resources, builds the backend, spawns the
//! [`confd_scheduler::Scheduler`], wires up signal handling for graceful
//! shutdown and reload, and exposes a small HTTP surface for operators.
//!
//! ## Modules
//!
//! - [`supervisor`] — top-level `run`/`run_onetime` entry points and the
//!   SIGTERM/SIGINT/SIGHUP signal loop
//! - [`discovery`] — SRV-record node discovery for backends configured with
//!   `srv_domain`/`srv_record` instead of a static node list
//! - [`http`] — `/health`, `/ready`, `/ready/detailed`, `/metrics` endpoints
//! - [`notify`] — service-manager readiness notification (systemd-style)
//! - [`metrics`] — the `Metrics` trait ambient plumbing uses to record
//!   cycle outcomes, with a no-op default

pub mod discovery;
pub mod http;
pub mod metrics;
pub mod notify;
pub mod supervisor;

pub use supervisor::{ExecutionMode, Supervisor};
