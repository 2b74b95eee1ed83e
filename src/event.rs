//! Observer hook for connection-state changes.
//!
//! The embedding application registers a [`ConnectionObserver`] with the
//! monitor to hear about transitions between connected and disconnected (or
//! a change of connected device).

use std::sync::Arc;

use crate::monitor::ConnectionState;

/// Trait for receiving connection-state changes.
pub trait ConnectionObserver: Send + Sync {
   /// Called once per published state change, in publication order.
   fn on_connection_changed(&self, state: &ConnectionState);
}

impl<F> ConnectionObserver for F
where
   F: Fn(&ConnectionState) + Send + Sync,
{
   fn on_connection_changed(&self, state: &ConnectionState) {
      self(state);
   }
}

/// Type alias for a shared observer.
pub type ObserverRef = Arc<dyn ConnectionObserver>;
