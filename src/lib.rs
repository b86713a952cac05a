//! # mqttagent
//!
//! `mqttagent` is a device-side MQTT messaging agent built with Rust and Tokio.
//! It keeps one independent session per configured broker, funnels every
//! inbound message through a bounded queue into a fixed pool of workers, and
//! shuts all of it down in a fixed order.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `agent`: Wires sessions and the dispatcher together from loaded settings.
//! - `config`: Handles loading and merging the agent configuration.
//! - `dispatcher`: Fans session streams into the shared task queue and runs the worker pool.
//! - `session`: Manages one broker connection: reconnects, presence, subscriptions, publishing.
//! - `task`: Defines the unit of work executed by the workers.
//! - `utils`: Contains shared utilities, such as error types, logging and signals.

pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod session;
pub mod task;
pub mod utils;
