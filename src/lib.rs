//! `AirPods` connection monitor.
//!
//! Tracks whether an `AirPods`-family accessory is on the active audio
//! route, reports its name, and notifies an observer when that changes.
//! The platform route and the accessory classifier are pluggable; a
//! BlueZ-backed route source and a D-Bus front end are included.

pub mod bluetooth;
pub mod classifier;
pub mod config;
pub mod dbus;
pub mod error;
pub mod event;
pub mod global;
pub mod monitor;
pub mod route;

pub use crate::{
   classifier::{AccessoryClassifier, PatternClassifier},
   error::{MonitorError, Result},
   event::ConnectionObserver,
   monitor::{ConnectionMonitor, ConnectionState},
   route::{Direction, Endpoint, PortKind, RouteCallback, RouteSnapshot, RouteSource, SubscriptionId},
};
