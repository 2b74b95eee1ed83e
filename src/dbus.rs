use log::info;
use zbus::{
   interface,
   object_server::{InterfaceRef, SignalEmitter},
};

use crate::monitor::{ConnectionMonitor, ConnectionState};

pub struct MonitorService {
   monitor: ConnectionMonitor,
}

impl MonitorService {
   pub const fn new(monitor: ConnectionMonitor) -> Self {
      Self { monitor }
   }
}

fn status_json(monitor: &ConnectionMonitor) -> serde_json::Value {
   let mut status = monitor.state().to_json();
   status["monitoring"] = monitor.is_monitoring().into();
   status
}

/// Announces a new connection state: the `ConnectionChanged` signal, then
/// `PropertiesChanged` for `Connected`.
pub async fn notify_connection_changed(
   iface: &InterfaceRef<MonitorService>,
   state: &ConnectionState,
) -> zbus::Result<()> {
   let emitter = iface.signal_emitter();
   let name = state.device_name().map_or("", |name| name.as_str());
   MonitorService::connection_changed(emitter, state.is_connected(), name).await?;
   iface.get().await.connected_changed(emitter).await
}

#[interface(name = "org.kde.plasma.airpods.monitor")]
impl MonitorService {
   #[zbus(name = "IsAirPodsConnected")]
   fn is_airpods_connected(&self) -> bool {
      self.monitor.is_connected()
   }

   /// Empty when no accessory is connected.
   fn get_connected_device_name(&self) -> String {
      self
         .monitor
         .connected_device_name()
         .map(String::from)
         .unwrap_or_default()
   }

   async fn start_monitoring(
      &self,
      #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
   ) -> zbus::fdo::Result<()> {
      info!("StartMonitoring requested over D-Bus");
      self.monitor.start_monitoring();
      self.monitoring_changed(&emitter).await?;
      Ok(())
   }

   async fn stop_monitoring(
      &self,
      #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
   ) -> zbus::fdo::Result<()> {
      info!("StopMonitoring requested over D-Bus");
      self.monitor.stop_monitoring();
      self.monitoring_changed(&emitter).await?;
      Ok(())
   }

   fn refresh(&self) {
      self.monitor.refresh();
   }

   fn get_status(&self) -> String {
      status_json(&self.monitor).to_string()
   }

   // Signals
   #[zbus(signal)]
   pub async fn connection_changed(
      emitter: &SignalEmitter<'_>,
      connected: bool,
      device_name: &str,
   ) -> zbus::Result<()>;

   #[zbus(property)]
   fn connected(&self) -> bool {
      self.monitor.is_connected()
   }

   #[zbus(property)]
   fn monitoring(&self) -> bool {
      self.monitor.is_monitoring()
   }
}

#[cfg(test)]
mod tests {
   use std::{collections::HashMap, sync::Arc, time::Duration};

   use futures::StreamExt;
   use serde_json::json;
   use tokio::{net::UnixStream, time};
   use zbus::{Guid, MessageStream, connection, message, zvariant::OwnedValue};

   use super::*;
   use crate::{
      classifier::PatternClassifier,
      error::{MonitorError, Result},
      route::{
         Direction, Endpoint, PortKind, RouteCallback, RouteSnapshot, RouteSource, SubscriptionId,
      },
   };

   struct OneDevice;

   impl RouteSource for OneDevice {
      fn current_route(&self) -> Result<RouteSnapshot> {
         Ok(RouteSnapshot::new([Endpoint::new(
            "Beats Solo3",
            PortKind::BluetoothA2dp,
            Direction::Output,
         )]))
      }

      fn subscribe(&self, _callback: RouteCallback) -> Result<SubscriptionId> {
         Ok(SubscriptionId::new(7))
      }

      fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
         Err(MonitorError::SubscriptionNotFound(id))
      }
   }

   #[test]
   fn test_status_json() {
      let monitor = ConnectionMonitor::new(Arc::new(OneDevice), PatternClassifier::default());
      assert_eq!(
         status_json(&monitor),
         json!({ "connected": false, "device_name": null, "monitoring": false })
      );

      monitor.start_monitoring();
      assert_eq!(
         status_json(&monitor),
         json!({ "connected": true, "device_name": "Beats Solo3", "monitoring": true })
      );

      monitor.stop_monitoring();
      assert_eq!(
         status_json(&monitor),
         json!({ "connected": true, "device_name": "Beats Solo3", "monitoring": false })
      );
   }

   const PATH: &str = "/org/kairpods/monitor";
   const INTERFACE: &str = "org.kde.plasma.airpods.monitor";

   /// Names of the signals in `stream` until it stays quiet, with the
   /// changed property names appended for `PropertiesChanged`.
   async fn drain_signals(stream: &mut MessageStream) -> Vec<String> {
      let mut seen = Vec::new();
      while let Ok(Some(Ok(msg))) = time::timeout(Duration::from_millis(500), stream.next()).await {
         if msg.message_type() != message::Type::Signal {
            continue;
         }
         let header = msg.header();
         let Some(member) = header.member() else {
            continue;
         };
         if member.as_str() == "PropertiesChanged" {
            let (_, changed, _): (String, HashMap<String, OwnedValue>, Vec<String>) =
               msg.body().deserialize().unwrap();
            let mut names: Vec<_> = changed.into_keys().collect();
            names.sort();
            seen.extend(names.into_iter().map(|name| format!("PropertiesChanged:{name}")));
         } else {
            seen.push(member.to_string());
         }
      }
      seen
   }

   #[tokio::test]
   async fn test_state_changes_emit_properties_changed() {
      let monitor = ConnectionMonitor::new(Arc::new(OneDevice), PatternClassifier::default());
      let (server_end, client_end) = UnixStream::pair().unwrap();
      let (server, client) = futures::try_join!(
         connection::Builder::unix_stream(server_end)
            .server(Guid::generate())
            .unwrap()
            .p2p()
            .serve_at(PATH, MonitorService::new(monitor.clone()))
            .unwrap()
            .build(),
         connection::Builder::unix_stream(client_end).p2p().build(),
      )
      .unwrap();
      let mut stream = MessageStream::from(&client);

      client
         .call_method(None::<&str>, PATH, Some(INTERFACE), "StartMonitoring", &())
         .await
         .unwrap();
      assert_eq!(drain_signals(&mut stream).await, ["PropertiesChanged:Monitoring"]);

      let iface = server
         .object_server()
         .interface::<_, MonitorService>(PATH)
         .await
         .unwrap();
      notify_connection_changed(&iface, &monitor.state()).await.unwrap();
      assert_eq!(
         drain_signals(&mut stream).await,
         ["ConnectionChanged", "PropertiesChanged:Connected"]
      );

      client
         .call_method(None::<&str>, PATH, Some(INTERFACE), "StopMonitoring", &())
         .await
         .unwrap();
      assert_eq!(drain_signals(&mut stream).await, ["PropertiesChanged:Monitoring"]);
      assert!(!monitor.is_monitoring());
   }
}
