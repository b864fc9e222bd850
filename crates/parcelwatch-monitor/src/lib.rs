//! Background checking of subscribed shipments.
//!
//! [`CheckEngine`] ties the pieces together: it pulls due subscriptions from
//! the store, asks the tracking provider for fresh state, lets the
//! verification scheduler pick the next check and sends the arrival push
//! when a parcel is ready for pickup.

pub mod engine;
pub mod error;
pub mod notify;
pub mod tracking;

pub use engine::{CheckEngine, CycleReport, EngineSettings};
pub use error::{MonitorError, Result};
pub use notify::{build_notifier, LogNotifier, Notifier, NotifyError, OneSignalNotifier};
pub use tracking::{HttpTrackingClient, TrackingClient, TrackingError};
