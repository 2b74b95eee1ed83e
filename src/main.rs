//! `AirPods` connection monitor D-Bus service.
//!
//! This service watches the BlueZ audio route for `AirPods`-family
//! accessories and exposes the connection state over D-Bus, emitting a
//! signal whenever it changes.

use std::{sync::Arc, time::Duration};

use crossbeam::queue::SegQueue;
use log::{info, warn};
use tokio::{signal, sync::Notify, time};
use zbus::{Connection, connection, object_server::InterfaceRef};

use airpods_monitor::{
   ConnectionState, PatternClassifier, Result,
   bluetooth::route_source::BluezRouteSource,
   config::Config,
   dbus::{self, MonitorService},
   global,
};

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting AirPods monitor D-Bus service...");

   // Load configuration
   let config = Config::load()?;
   info!(
      "Loaded configuration with {} bluetooth and {} wired patterns",
      config.bluetooth_patterns.len(),
      config.wired_patterns.len()
   );

   // Route source and the process-wide monitor
   let source = BluezRouteSource::spawn(config.rescan_interval()).await?;
   let monitor = global::install(source, PatternClassifier::from_config(&config))?;

   let event_bus = EventProcessor::new();
   let sink = event_bus.clone();
   monitor.set_observer(move |state: &ConnectionState| sink.emit(state.clone()));

   // Build D-Bus connection
   let connection = connection::Builder::session()?
      .name("org.kairpods.monitor")?
      .serve_at("/org/kairpods/monitor", MonitorService::new(monitor.clone()))?
      .build()
      .await?;

   info!("AirPods monitor D-Bus service started at org.kairpods.monitor");

   // Start event processor
   event_bus.spawn_dispatcher(connection).await?;

   if config.monitor_on_startup {
      global::start_monitoring();
   }

   // Wait for shutdown signal
   signal::ctrl_c().await?;
   info!("Shutting down AirPods monitor...");
   global::stop_monitoring();

   Ok(())
}

struct EventProcessor {
   queue: SegQueue<ConnectionState>,
   notifier: Notify,
}

impl EventProcessor {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
      })
   }

   fn emit(&self, state: ConnectionState) {
      self.queue.push(state);
      self.notifier.notify_waiters();
   }

   async fn recv(self: &Arc<Self>) -> Option<ConnectionState> {
      loop {
         if let Some(state) = self.queue.pop() {
            return Some(state);
         }
         let notify = self.notifier.notified();
         if let Some(state) = self.queue.pop() {
            return Some(state);
         }
         if Arc::strong_count(self) == 1 {
            return None;
         }
         let _ = time::timeout(Duration::from_secs(1), notify).await;
      }
   }

   async fn dispatch(
      &self,
      iface: &InterfaceRef<MonitorService>,
      state: ConnectionState,
   ) -> Result<()> {
      dbus::notify_connection_changed(iface, &state).await?;
      Ok(())
   }

   async fn spawn_dispatcher(self: Arc<Self>, connection: Connection) -> Result<()> {
      let iface = connection
         .object_server()
         .interface::<_, MonitorService>("/org/kairpods/monitor")
         .await?;
      tokio::spawn(async move {
         while let Some(state) = self.recv().await {
            if let Err(e) = self.dispatch(&iface, state).await {
               warn!("Error dispatching connection change: {e}");
            }
         }
      });

      Ok(())
   }
}
