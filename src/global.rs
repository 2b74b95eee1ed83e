//! Process-wide monitor instance.
//!
//! The embedding application calls [`install`] once at startup; afterwards
//! the free functions here forward to that instance. Before installation
//! they report "not connected" and ignore lifecycle requests.

use std::sync::{Arc, OnceLock};

use log::warn;
use smol_str::SmolStr;

use crate::{
   classifier::AccessoryClassifier,
   error::{MonitorError, Result},
   monitor::ConnectionMonitor,
   route::RouteSource,
};

static MONITOR: OnceLock<ConnectionMonitor> = OnceLock::new();

/// Builds the process-wide monitor. Fails if one is already installed.
pub fn install<C>(source: Arc<dyn RouteSource>, classifier: C) -> Result<&'static ConnectionMonitor>
where
   C: AccessoryClassifier + 'static,
{
   let mut created = false;
   let monitor = MONITOR.get_or_init(|| {
      created = true;
      ConnectionMonitor::new(source, classifier)
   });
   if created {
      Ok(monitor)
   } else {
      Err(MonitorError::AlreadyInstalled)
   }
}

pub fn monitor() -> Option<&'static ConnectionMonitor> {
   MONITOR.get()
}

pub fn is_airpods_connected() -> bool {
   monitor().is_some_and(ConnectionMonitor::is_connected)
}

pub fn connected_device_name() -> Option<SmolStr> {
   monitor().and_then(ConnectionMonitor::connected_device_name)
}

pub fn start_monitoring() {
   match monitor() {
      Some(monitor) => monitor.start_monitoring(),
      None => warn!("start_monitoring called before the monitor was installed"),
   }
}

pub fn stop_monitoring() {
   match monitor() {
      Some(monitor) => monitor.stop_monitoring(),
      None => warn!("stop_monitoring called before the monitor was installed"),
   }
}
