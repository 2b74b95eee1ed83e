//! Recognition of `AirPods`-family endpoints.
//!
//! The monitor treats classification as a black box behind
//! [`AccessoryClassifier`]. [`PatternClassifier`] is the stock predicate: it
//! looks at the Apple modalias when the endpoint carries one and otherwise
//! falls back to case-insensitive name patterns.

use crate::{
   config::Config,
   route::{Endpoint, PortKind},
};

/// Default name patterns for Bluetooth endpoints (case-insensitive).
pub const BLUETOOTH_PATTERNS: &[&str] = &["airpods", "beats", "powerbeats", "studio", "solo"];

/// Default name patterns for wired endpoints (case-insensitive).
// Only Lightning AirPods show up wired; "beats" there is usually a 3.5mm headset.
pub const WIRED_PATTERNS: &[&str] = &["airpods"];

/// Apple vendor ID
const APPLE_VID: u32 = 0x004C;

/// All Apple headphone PIDs known
const AIRPOD_PIDS: &[u32] = &[
   0x2002, // Beats (also some AirPods variants)
   0x200E, // AirPods (2nd gen)
   0x200A, // AirPods (3rd gen)
   0x200F, // Beats Solo Pro
   0x2012, // PowerBeats Pro
   0x2013, // AirPods Max
   0x2014, // AirPods Pro (2nd gen)
   0x2024, // AirPods Pro (1st gen)
];

/// Decides whether an endpoint belongs to the target accessory family.
pub trait AccessoryClassifier: Send + Sync {
   fn matches(&self, endpoint: &Endpoint) -> bool;
}

impl<F> AccessoryClassifier for F
where
   F: Fn(&Endpoint) -> bool + Send + Sync,
{
   fn matches(&self, endpoint: &Endpoint) -> bool {
      self(endpoint)
   }
}

/// Modalias + name-pattern classifier.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
   bluetooth_patterns: Vec<String>,
   wired_patterns: Vec<String>,
}

impl Default for PatternClassifier {
   fn default() -> Self {
      Self::new(BLUETOOTH_PATTERNS.iter().copied(), WIRED_PATTERNS.iter().copied())
   }
}

impl PatternClassifier {
   pub fn new<B, W>(bluetooth_patterns: B, wired_patterns: W) -> Self
   where
      B: IntoIterator,
      B::Item: AsRef<str>,
      W: IntoIterator,
      W::Item: AsRef<str>,
   {
      Self {
         bluetooth_patterns: normalize(bluetooth_patterns),
         wired_patterns: normalize(wired_patterns),
      }
   }

   pub fn from_config(config: &Config) -> Self {
      Self::new(&config.bluetooth_patterns, &config.wired_patterns)
   }

   fn patterns_for(&self, kind: PortKind) -> &[String] {
      if kind.is_bluetooth() {
         &self.bluetooth_patterns
      } else if kind.is_wired() {
         &self.wired_patterns
      } else {
         &[]
      }
   }
}

fn normalize<I>(patterns: I) -> Vec<String>
where
   I: IntoIterator,
   I::Item: AsRef<str>,
{
   patterns
      .into_iter()
      .map(|p| p.as_ref().trim().to_ascii_lowercase())
      .filter(|p| !p.is_empty())
      .collect()
}

fn is_apple_headphone(endpoint: &Endpoint) -> bool {
   matches!(
      (endpoint.vendor_id, endpoint.product_id),
      (Some(APPLE_VID), Some(pid)) if AIRPOD_PIDS.contains(&pid)
   )
}

impl AccessoryClassifier for PatternClassifier {
   fn matches(&self, endpoint: &Endpoint) -> bool {
      // 1. Modalias (most reliable, only reported over Bluetooth)
      if endpoint.kind.is_bluetooth() && is_apple_headphone(endpoint) {
         log::debug!(
            "AirPods detected via modalias: {} ({:#06x})",
            endpoint.name,
            endpoint.product_id.unwrap_or_default()
         );
         return true;
      }

      // 2. Name pattern matching
      let patterns = self.patterns_for(endpoint.kind);
      if patterns.is_empty() {
         return false;
      }
      let name = endpoint.name.to_ascii_lowercase();
      for pattern in patterns {
         if name.contains(pattern.as_str()) {
            log::debug!("AirPods detected via name pattern: {name} => {pattern}");
            return true;
         }
      }
      false
   }
}
