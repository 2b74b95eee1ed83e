//! BlueZ-backed audio route source.
//!
//! A background task keeps a cached [`RouteSnapshot`] of every connected
//! audio-capable Bluetooth device across all adapters. It rescans on
//! adapter events, on device property changes and on a fixed interval, and
//! invokes the registered callbacks whenever the snapshot changes.

use std::{
   collections::{BTreeMap, HashMap, HashSet},
   pin::pin,
   sync::{
      Arc,
      atomic::{AtomicU64, Ordering},
   },
   time::Duration,
};

use bluer::{Adapter, AdapterEvent, Address, Device, DeviceEvent, Session};
use futures::stream::StreamExt;
use log::{debug, info, warn};
use parking_lot::RwLock;
use smallvec::SmallVec;
use smol_str::{SmolStr, ToSmolStr};
use tokio::{
   select,
   sync::mpsc,
   task::JoinHandle,
   time::{self, MissedTickBehavior},
};
use uuid::Uuid;

use crate::{
   error::{MonitorError, Result},
   route::{Direction, Endpoint, PortKind, RouteCallback, RouteSnapshot, RouteSource, SubscriptionId},
};

/// Channel buffer size
const CHANNEL_BUFFER_SIZE: usize = 256;

const fn bt_uuid(short: u32) -> Uuid {
   Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_00805f9b34fb)
}

/// A2DP Audio Sink
const A2DP_SINK: Uuid = bt_uuid(0x110B);
/// Headset Profile
const HSP_HEADSET: Uuid = bt_uuid(0x1108);
/// Hands-Free Profile (hands-free unit)
const HFP_HANDSFREE: Uuid = bt_uuid(0x111E);
/// LE Audio: Audio Stream Control and Published Audio Capabilities
const LE_AUDIO: [Uuid; 2] = [bt_uuid(0x184E), bt_uuid(0x1850)];

#[derive(Default)]
struct Shared {
   // `None` until the first scan succeeds, and again after a session failure.
   snapshot: RwLock<Option<RouteSnapshot>>,
   callbacks: RwLock<HashMap<SubscriptionId, RouteCallback>>,
   next_id: AtomicU64,
}

impl Shared {
   /// Stores `next` and notifies subscribers if it differs from the cache.
   fn publish(&self, next: Option<RouteSnapshot>) {
      {
         let mut snapshot = self.snapshot.write();
         if *snapshot == next {
            return;
         }
         *snapshot = next;
      }

      let callbacks: Vec<RouteCallback> = self.callbacks.read().values().cloned().collect();
      debug!("Audio route changed, notifying {} subscriber(s)", callbacks.len());
      for callback in callbacks {
         callback();
      }
   }

   /// Publishes a scan result. A failed scan leaves the route unknown rather
   /// than empty, so readers keep their last state instead of seeing every
   /// device disconnect.
   fn publish_scan(&self, scan: Result<RouteSnapshot>) {
      let next = match scan {
         Ok(snapshot) => Some(snapshot),
         Err(e) => {
            warn!("Failed to scan audio route: {e}");
            None
         },
      };
      self.publish(next);
   }
}

/// Endpoints found by one scan, keyed by adapter name and device address so
/// the snapshot order does not depend on BlueZ enumeration order.
type ScanResult = BTreeMap<(SmolStr, Address), SmallVec<[Endpoint; 2]>>;

fn snapshot_from_scan(found: ScanResult) -> RouteSnapshot {
   found.into_values().flatten().collect()
}

/// [`RouteSource`] reading the active Bluetooth audio devices from BlueZ.
pub struct BluezRouteSource {
   shared: Arc<Shared>,
   task: JoinHandle<()>,
}

impl BluezRouteSource {
   /// Connects to BlueZ, performs the first scan and spawns the watcher.
   pub async fn spawn(rescan_interval: Duration) -> Result<Arc<Self>> {
      let session = Session::new().await?;
      let shared = Arc::new(Shared::default());

      let mut watcher = RouteWatcher::new(session, shared.clone(), rescan_interval);
      watcher.initialize_adapters().await;
      watcher.rescan().await;

      let task = tokio::spawn(watcher.run());
      Ok(Arc::new(Self { shared, task }))
   }
}

impl Drop for BluezRouteSource {
   fn drop(&mut self) {
      self.task.abort();
   }
}

impl RouteSource for BluezRouteSource {
   fn current_route(&self) -> Result<RouteSnapshot> {
      self
         .shared
         .snapshot
         .read()
         .clone()
         .ok_or(MonitorError::RouteUnavailable)
   }

   fn subscribe(&self, callback: RouteCallback) -> Result<SubscriptionId> {
      let id = SubscriptionId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1);
      self.shared.callbacks.write().insert(id, callback);
      debug!("Route subscriber added ({id})");
      Ok(id)
   }

   fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
      self
         .shared
         .callbacks
         .write()
         .remove(&id)
         .map(drop)
         .ok_or(MonitorError::SubscriptionNotFound(id))
   }
}

// === Watcher ===

#[derive(Debug)]
enum WatchCommand {
   AdapterChanged(SmolStr),
   AdapterLost(SmolStr),
   DeviceAdded(Address, SmolStr), // address, adapter_name
   DeviceRemoved(Address),
   DeviceChanged(Address),
}

struct RouteWatcher {
   session: Session,
   shared: Arc<Shared>,
   rescan_interval: Duration,
   loopback_rx: mpsc::Receiver<WatchCommand>,
   loopback_tx: mpsc::Sender<WatchCommand>,

   adapters: BTreeMap<SmolStr, (Adapter, JoinHandle<()>)>,
   devices: HashMap<Address, JoinHandle<()>>,
}

impl Drop for RouteWatcher {
   fn drop(&mut self) {
      for (_, handle) in self.adapters.values() {
         handle.abort();
      }
      for handle in self.devices.values() {
         handle.abort();
      }
   }
}

impl RouteWatcher {
   fn new(session: Session, shared: Arc<Shared>, rescan_interval: Duration) -> Self {
      let (loopback_tx, loopback_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
      Self {
         session,
         shared,
         rescan_interval,
         loopback_rx,
         loopback_tx,
         adapters: BTreeMap::new(),
         devices: HashMap::new(),
      }
   }

   async fn run(mut self) {
      info!("Audio route watcher starting up");

      let mut rescan_interval = time::interval(self.rescan_interval);
      rescan_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

      loop {
         select! {
             _ = rescan_interval.tick() => {
                 self.initialize_adapters().await;
                 self.rescan().await;
             }
             cmd = self.loopback_rx.recv() => {
                 let Some(cmd) = cmd else {
                     break;
                 };
                 self.handle_command(cmd).await;
             }
         }
      }

      info!("Audio route watcher shutting down");
   }

   async fn handle_command(&mut self, cmd: WatchCommand) {
      match cmd {
         WatchCommand::AdapterChanged(name) => {
            debug!("Adapter {name} changed");
         },
         WatchCommand::AdapterLost(name) => {
            warn!("Adapter lost: {name}");
            if let Some((_, handle)) = self.adapters.remove(&name) {
               handle.abort();
            }
         },
         WatchCommand::DeviceAdded(addr, adapter_name) => {
            debug!("Device added on {adapter_name}: {addr}");
            if let Some((adapter, _)) = self.adapters.get(&adapter_name)
               && let Ok(device) = adapter.device(addr)
            {
               self.watch_device(device);
            }
         },
         WatchCommand::DeviceRemoved(addr) => {
            debug!("Device removed: {addr}");
            if let Some(handle) = self.devices.remove(&addr) {
               handle.abort();
            }
         },
         WatchCommand::DeviceChanged(addr) => {
            debug!("Device {addr} properties changed");
         },
      }
      self.rescan().await;
   }

   async fn initialize_adapters(&mut self) {
      let names = match self.session.adapter_names().await {
         Ok(names) => names,
         Err(e) => {
            warn!("Failed to get adapter names: {e}");
            return;
         },
      };

      for name in names.into_iter().map(SmolStr::from) {
         if self.adapters.contains_key(&name) {
            continue;
         }
         match self.session.adapter(&name) {
            Ok(adapter) => {
               info!("Watching adapter: {name}");
               let handle =
                  Self::start_adapter_monitor(self.loopback_tx.clone(), name.clone(), adapter.clone());
               self.adapters.insert(name, (adapter.clone(), handle));
               self.watch_known_devices(&adapter).await;
            },
            Err(e) => {
               warn!("Failed to open adapter {name}: {e}");
            },
         }
      }
   }

   async fn watch_known_devices(&mut self, adapter: &Adapter) {
      let Ok(addresses) = adapter.device_addresses().await else {
         return;
      };
      for addr in addresses {
         if let Ok(device) = adapter.device(addr) {
            self.watch_device(device);
         }
      }
   }

   fn start_adapter_monitor(
      loopback: mpsc::Sender<WatchCommand>,
      name: SmolStr,
      adapter: Adapter,
   ) -> JoinHandle<()> {
      tokio::spawn(async move {
         let Ok(mut events) = adapter.events().await else {
            let _ = loopback.send(WatchCommand::AdapterLost(name)).await;
            return;
         };

         while let Some(event) = events.next().await {
            let cmd = match event {
               AdapterEvent::DeviceAdded(addr) => WatchCommand::DeviceAdded(addr, name.clone()),
               AdapterEvent::DeviceRemoved(addr) => WatchCommand::DeviceRemoved(addr),
               AdapterEvent::PropertyChanged(_) => WatchCommand::AdapterChanged(name.clone()),
               #[allow(unreachable_patterns)]
               _ => continue,
            };
            if loopback.send(cmd).await.is_err() {
               return;
            }
         }

         // If we exit the event loop, adapter is probably gone
         let _ = loopback.send(WatchCommand::AdapterLost(name)).await;
      })
   }

   fn watch_device(&mut self, device: Device) {
      let addr = device.address();
      if self.devices.get(&addr).is_some_and(|h| !h.is_finished()) {
         return;
      }

      let loopback = self.loopback_tx.clone();
      let handle = tokio::spawn(async move {
         let events = match device.events().await {
            Ok(events) => events,
            Err(e) => {
               warn!("Failed to watch device {addr}: {e}");
               return;
            },
         };
         let mut events = pin!(events);
         while let Some(DeviceEvent::PropertyChanged(_)) = events.next().await {
            if loopback.send(WatchCommand::DeviceChanged(addr)).await.is_err() {
               return;
            }
         }
      });
      self.devices.insert(addr, handle);
   }

   async fn rescan(&self) {
      self.shared.publish_scan(self.scan().await);
   }

   async fn scan(&self) -> Result<RouteSnapshot> {
      if self.adapters.is_empty() {
         return Err(MonitorError::RouteUnavailable);
      }

      let mut found = ScanResult::new();
      for (name, (adapter, _)) in &self.adapters {
         for addr in adapter.device_addresses().await? {
            let endpoints = match connected_endpoints(adapter, addr).await {
               Ok(endpoints) => endpoints,
               Err(e) => {
                  if device_vanished(adapter, addr).await {
                     debug!("Device {addr} went away during scan: {e}");
                     continue;
                  }
                  return Err(e);
               },
            };
            if !endpoints.is_empty() {
               found.insert((name.clone(), addr), endpoints);
            }
         }
      }
      Ok(snapshot_from_scan(found))
   }
}

/// Audio endpoints of `addr`, empty when it is not connected.
async fn connected_endpoints(adapter: &Adapter, addr: Address) -> Result<SmallVec<[Endpoint; 2]>> {
   let device = adapter.device(addr)?;
   if !device.is_connected().await? {
      return Ok(SmallVec::new());
   }
   device_endpoints(&device).await
}

async fn device_vanished(adapter: &Adapter, addr: Address) -> bool {
   adapter
      .device_addresses()
      .await
      .is_ok_and(|addresses| !addresses.contains(&addr))
}

/// Maps a connected device onto the audio endpoints it provides.
async fn device_endpoints(device: &Device) -> Result<SmallVec<[Endpoint; 2]>> {
   let uuids = device.uuids().await?.unwrap_or_default();
   let mut endpoints = audio_endpoints(&uuids, display_name(device).await);

   if let Some(modalias) = device.modalias().await? {
      for endpoint in &mut endpoints {
         endpoint.vendor_id = Some(modalias.vendor);
         endpoint.product_id = Some(modalias.product);
      }
   }
   Ok(endpoints)
}

async fn display_name(device: &Device) -> SmolStr {
   if let Ok(alias) = device.alias().await
      && !alias.is_empty()
   {
      return alias.into();
   }
   if let Ok(Some(name)) = device.name().await
      && !name.is_empty()
   {
      return name.into();
   }
   device.address().to_smolstr()
}

fn audio_endpoints(uuids: &HashSet<Uuid>, name: SmolStr) -> SmallVec<[Endpoint; 2]> {
   let mut endpoints = SmallVec::new();
   let a2dp = uuids.contains(&A2DP_SINK);
   let hfp = uuids.contains(&HFP_HANDSFREE) || uuids.contains(&HSP_HEADSET);

   if a2dp {
      endpoints.push(Endpoint::new(name.clone(), PortKind::BluetoothA2dp, Direction::Output));
   } else if hfp {
      endpoints.push(Endpoint::new(name.clone(), PortKind::BluetoothHfp, Direction::Output));
   } else if LE_AUDIO.iter().any(|u| uuids.contains(u)) {
      endpoints.push(Endpoint::new(name.clone(), PortKind::BluetoothLe, Direction::Output));
   }
   if hfp {
      endpoints.push(Endpoint::new(name, PortKind::BluetoothHfp, Direction::Input));
   }
   endpoints
}
