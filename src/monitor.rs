//! Connection-state monitor.
//!
//! [`ConnectionMonitor`] keeps a single [`ConnectionState`] in sync with a
//! [`RouteSource`]. Every route-change notification triggers a fresh route
//! query; the classifier picks the matching endpoint and the result is
//! published only when it differs from what callers last saw.
//!
//! Locking:
//! - `published` guards the state. The route query runs before it is taken,
//!   so a source that re-enters the monitor from `current_route` cannot
//!   deadlock.
//! - `lifecycle` serializes start/stop. Nothing else waits on it: readers
//!   of the subscription handle go through `subscription`, and the start-up
//!   recompute runs after it is released.
//! - Observer calls happen after every lock above is released, one at a
//!   time, in publication order. States published while a start/stop is in
//!   flight (a source may fire from inside `subscribe`) are held back and
//!   delivered by that start/stop once it has let go of `lifecycle`.

use std::sync::{
   Arc, Weak,
   atomic::{AtomicU64, AtomicUsize, Ordering},
};

use crossbeam::queue::SegQueue;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use smol_str::SmolStr;

use crate::{
   classifier::AccessoryClassifier,
   event::{ConnectionObserver, ObserverRef},
   route::{RouteCallback, RouteSnapshot, RouteSource, SubscriptionId},
};

/// Whether a target accessory is connected, and its display name if so.
///
/// The name is present exactly when connected; there is no way to build a
/// value that violates this.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
   device_name: Option<SmolStr>,
}

impl ConnectionState {
   pub const fn disconnected() -> Self {
      Self { device_name: None }
   }

   pub fn connected(device_name: impl Into<SmolStr>) -> Self {
      Self {
         device_name: Some(device_name.into()),
      }
   }

   /// Derives the state from a route snapshot.
   ///
   /// When several endpoints match, an output endpoint wins over an
   /// input-only one; otherwise the first in snapshot order is used.
   pub fn from_route(snapshot: &RouteSnapshot, classifier: &dyn AccessoryClassifier) -> Self {
      snapshot
         .find_preferred(|endpoint| classifier.matches(endpoint))
         .map_or_else(Self::disconnected, |endpoint| Self::connected(endpoint.name.clone()))
   }

   pub const fn is_connected(&self) -> bool {
      self.device_name.is_some()
   }

   pub fn device_name(&self) -> Option<&SmolStr> {
      self.device_name.as_ref()
   }

   pub fn to_json(&self) -> serde_json::Value {
      json!({
         "connected": self.is_connected(),
         "device_name": self.device_name.as_deref(),
      })
   }
}

#[derive(Default)]
struct Published {
   state: ConnectionState,
   // Ticket of the recompute that last wrote `state`.
   ticket: u64,
}

struct Inner {
   source: Arc<dyn RouteSource>,
   classifier: RwLock<Arc<dyn AccessoryClassifier>>,
   observer: RwLock<Option<ObserverRef>>,

   published: RwLock<Published>,
   tickets: AtomicU64,

   // Last subscription epoch handed out.
   lifecycle: Mutex<u64>,
   subscription: RwLock<Option<SubscriptionId>>,
   // Epoch of the live subscription, 0 while idle.
   active_epoch: AtomicU64,

   pending: SegQueue<ConnectionState>,
   dispatch: Mutex<()>,
   // Number of start/stop calls currently inside `lifecycle`.
   deferring: AtomicUsize,
}

/// Holds observer dispatch back for as long as it lives.
struct DeferDispatch<'a>(&'a AtomicUsize);

impl<'a> DeferDispatch<'a> {
   fn new(counter: &'a AtomicUsize) -> Self {
      counter.fetch_add(1, Ordering::SeqCst);
      Self(counter)
   }
}

impl Drop for DeferDispatch<'_> {
   fn drop(&mut self) {
      self.0.fetch_sub(1, Ordering::SeqCst);
   }
}

/// Tracks whether an `AirPods`-family accessory is on the active route.
///
/// Cloning yields another handle to the same monitor.
#[derive(Clone)]
pub struct ConnectionMonitor {
   inner: Arc<Inner>,
}

impl ConnectionMonitor {
   pub fn new<C>(source: Arc<dyn RouteSource>, classifier: C) -> Self
   where
      C: AccessoryClassifier + 'static,
   {
      Self {
         inner: Arc::new(Inner {
            source,
            classifier: RwLock::new(Arc::new(classifier)),
            observer: RwLock::new(None),
            published: RwLock::new(Published::default()),
            tickets: AtomicU64::new(0),
            lifecycle: Mutex::new(0),
            subscription: RwLock::new(None),
            active_epoch: AtomicU64::new(0),
            pending: SegQueue::new(),
            dispatch: Mutex::new(()),
            deferring: AtomicUsize::new(0),
         }),
      }
   }

   /// Last computed connection flag.
   pub fn is_connected(&self) -> bool {
      self.inner.published.read().state.is_connected()
   }

   /// Display name of the connected accessory, `None` when not connected.
   pub fn connected_device_name(&self) -> Option<SmolStr> {
      self.inner.published.read().state.device_name().cloned()
   }

   /// Both fields from one consistent read.
   pub fn state(&self) -> ConnectionState {
      self.inner.published.read().state.clone()
   }

   pub fn is_monitoring(&self) -> bool {
      self.inner.subscription.read().is_some()
   }

   /// Handle of the live route subscription, if any.
   pub fn subscription(&self) -> Option<SubscriptionId> {
      *self.inner.subscription.read()
   }

   pub fn set_observer<O>(&self, observer: O)
   where
      O: ConnectionObserver + 'static,
   {
      *self.inner.observer.write() = Some(Arc::new(observer));
   }

   pub fn clear_observer(&self) {
      *self.inner.observer.write() = None;
   }

   /// Replaces the classifier; applies from the next recompute on.
   pub fn set_classifier<C>(&self, classifier: C)
   where
      C: AccessoryClassifier + 'static,
   {
      *self.inner.classifier.write() = Arc::new(classifier);
   }

   /// Subscribes to route changes and recomputes the state once.
   ///
   /// No-op while already monitoring.
   pub fn start_monitoring(&self) {
      let subscribed = {
         let _defer = DeferDispatch::new(&self.inner.deferring);
         self.subscribe()
      };
      if subscribed {
         self.inner.update();
      }
      self.inner.dispatch_pending();
   }

   /// Returns `false` if a subscription already existed.
   fn subscribe(&self) -> bool {
      let mut epochs = self.inner.lifecycle.lock();
      if let Some(id) = *self.inner.subscription.read() {
         debug!("Already monitoring ({id})");
         return false;
      }

      *epochs += 1;
      let epoch = *epochs;
      // Published before subscribing so a callback fired from inside
      // `subscribe` is accepted.
      self.inner.active_epoch.store(epoch, Ordering::Release);

      match self.inner.source.subscribe(self.route_callback(epoch)) {
         Ok(id) => {
            *self.inner.subscription.write() = Some(id);
            info!("Started route monitoring ({id})");
         },
         Err(e) => {
            self.inner.active_epoch.store(0, Ordering::Release);
            warn!("Failed to subscribe to route changes: {e}");
         },
      }
      true
   }

   /// Drops the route subscription. The last known state is kept.
   ///
   /// No-op while idle.
   pub fn stop_monitoring(&self) {
      {
         let _defer = DeferDispatch::new(&self.inner.deferring);
         let _epochs = self.inner.lifecycle.lock();
         let Some(id) = self.inner.subscription.write().take() else {
            debug!("Not monitoring");
            return;
         };
         self.inner.active_epoch.store(0, Ordering::Release);

         if let Err(e) = self.inner.source.unsubscribe(id) {
            warn!("Failed to unsubscribe {id}, discarding handle: {e}");
         }
         info!("Stopped route monitoring ({id})");
      }
      self.inner.dispatch_pending();
   }

   /// Recomputes the state now, whether or not monitoring is active.
   pub fn refresh(&self) {
      self.inner.recompute();
   }

   fn route_callback(&self, epoch: u64) -> RouteCallback {
      let weak: Weak<Inner> = Arc::downgrade(&self.inner);
      Arc::new(move || {
         let Some(inner) = weak.upgrade() else {
            return;
         };
         if inner.active_epoch.load(Ordering::Acquire) != epoch {
            debug!("Ignoring route change for stale subscription");
            return;
         }
         inner.recompute();
      })
   }
}

impl Inner {
   fn recompute(&self) {
      self.update();
      self.dispatch_pending();
   }

   /// Queries the route and publishes the derived state if it changed.
   fn update(&self) {
      let ticket = self.tickets.fetch_add(1, Ordering::AcqRel) + 1;

      let snapshot = match self.source.current_route() {
         Ok(snapshot) => snapshot,
         Err(e) => {
            warn!("Route query failed, keeping previous state: {e}");
            return;
         },
      };
      let classifier = self.classifier.read().clone();
      let next = ConnectionState::from_route(&snapshot, classifier.as_ref());

      let mut published = self.published.write();
      if ticket < published.ticket {
         debug!("Dropping route result #{ticket}, #{} is newer", published.ticket);
         return;
      }
      published.ticket = ticket;
      if published.state == next {
         return;
      }

      match next.device_name() {
         Some(name) => info!("AirPods connected: {name}"),
         None => info!("AirPods disconnected"),
      }
      published.state = next.clone();
      // Queued under the write lock so queue order is publication order.
      self.pending.push(next);
   }

   fn dispatch_pending(&self) {
      while !self.pending.is_empty() {
         if self.deferring.load(Ordering::SeqCst) > 0 {
            // The start/stop in flight delivers once it is done.
            return;
         }
         // Whoever holds the guard drains for everyone, including states
         // queued by the observer itself.
         let Some(_guard) = self.dispatch.try_lock() else {
            return;
         };
         while let Some(state) = self.pending.pop() {
            let observer = self.observer.read().clone();
            if let Some(observer) = observer {
               observer.on_connection_changed(&state);
            }
         }
      }
   }
}
