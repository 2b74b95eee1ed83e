//! Audio route model and the route-source collaborator.
//!
//! A [`RouteSnapshot`] is the set of currently active audio endpoints. It is
//! produced on demand by a [`RouteSource`], which also delivers change
//! notifications to registered callbacks.

use std::{fmt, sync::Arc};

use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::error::Result;

/// Kind of port an endpoint is attached through.
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   strum::Display,
   strum::EnumString,
   strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum PortKind {
   BluetoothA2dp,
   BluetoothLe,
   BluetoothHfp,
   Headphones,
   HeadsetMic,
   BuiltInSpeaker,
   Other,
}

impl PortKind {
   pub const fn is_bluetooth(self) -> bool {
      matches!(self, Self::BluetoothA2dp | Self::BluetoothLe | Self::BluetoothHfp)
   }

   pub const fn is_wired(self) -> bool {
      matches!(self, Self::Headphones | Self::HeadsetMic)
   }
}

/// Direction of audio flow through an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
   Output,
   Input,
}

/// One addressable audio source or sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
   pub name: SmolStr,
   pub kind: PortKind,
   pub direction: Direction,
   /// Vendor id from the device modalias, if known.
   pub vendor_id: Option<u32>,
   /// Product id from the device modalias, if known.
   pub product_id: Option<u32>,
}

impl Endpoint {
   pub fn new(name: impl Into<SmolStr>, kind: PortKind, direction: Direction) -> Self {
      Self {
         name: name.into(),
         kind,
         direction,
         vendor_id: None,
         product_id: None,
      }
   }

   #[must_use]
   pub fn with_modalias(mut self, vendor_id: u32, product_id: u32) -> Self {
      self.vendor_id = Some(vendor_id);
      self.product_id = Some(product_id);
      self
   }

   pub const fn is_output(&self) -> bool {
      matches!(self.direction, Direction::Output)
   }
}

/// The set of active endpoints at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteSnapshot {
   endpoints: SmallVec<[Endpoint; 4]>,
}

impl RouteSnapshot {
   pub fn new(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
      Self {
         endpoints: endpoints.into_iter().collect(),
      }
   }

   pub fn endpoints(&self) -> &[Endpoint] {
      &self.endpoints
   }

   pub fn is_empty(&self) -> bool {
      self.endpoints.is_empty()
   }

   /// Finds the endpoint `pred` accepts, preferring output endpoints over
   /// input-only ones and otherwise keeping snapshot order.
   pub fn find_preferred(&self, mut pred: impl FnMut(&Endpoint) -> bool) -> Option<&Endpoint> {
      let mut fallback = None;
      for endpoint in &self.endpoints {
         if !pred(endpoint) {
            continue;
         }
         if endpoint.is_output() {
            return Some(endpoint);
         }
         if fallback.is_none() {
            fallback = Some(endpoint);
         }
      }
      fallback
   }
}

impl FromIterator<Endpoint> for RouteSnapshot {
   fn from_iter<I: IntoIterator<Item = Endpoint>>(iter: I) -> Self {
      Self::new(iter)
   }
}

/// Opaque handle for a live route-change registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
   pub const fn new(raw: u64) -> Self {
      Self(raw)
   }

   pub const fn get(self) -> u64 {
      self.0
   }
}

impl fmt::Display for SubscriptionId {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "#{}", self.0)
   }
}

/// Handler invoked by a route source whenever the route may have changed.
///
/// Carries no payload: receivers re-query [`RouteSource::current_route`].
pub type RouteCallback = Arc<dyn Fn() + Send + Sync>;

/// Platform collaborator that reports the active audio route.
///
/// Delivery is at-least-once with no ordering guarantee, and callbacks may
/// run on any thread the source controls.
pub trait RouteSource: Send + Sync {
   /// Returns the current set of active endpoints.
   fn current_route(&self) -> Result<RouteSnapshot>;

   /// Registers `callback` for route-change notifications.
   fn subscribe(&self, callback: RouteCallback) -> Result<SubscriptionId>;

   /// Removes a registration created by [`RouteSource::subscribe`].
   fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}
