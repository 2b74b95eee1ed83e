//! Bluetooth route discovery.
//!
//! This module provides the BlueZ-backed implementation of the route
//! source the connection monitor consumes.

pub mod route_source;
