//! Client library for the service registry.
//!
//! Registers an instance, keeps it alive with a background heartbeat loop and
//! discovers other services.

mod client;

pub use client::{InstanceRecord, Registration, RegistryClient, Result};
