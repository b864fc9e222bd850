//! `parcelwatch-scheduler`: adaptive verification scheduling for tracked shipments.
//!
//! # Overview
//!
//! [`schedule::VerificationScheduler`] answers one question per shipment:
//! *when should the tracking provider be asked again?* It never sleeps or
//! stores anything; the caller persists the decision and calls back later.
//!
//! # Phases
//!
//! | Phase            | Condition                                         | Next check                     |
//! |------------------|---------------------------------------------------|--------------------------------|
//! | Delivered        | status contains a terminal phrase                 | none ([`ScheduleDecision::Stop`]) |
//! | Pre-dispatch     | status lacks every dispatch phrase                | `now + pre_dispatch_interval`  |
//! | Threshold        | first in-transit check, elapsed < fraction × H    | `dispatch + fraction × H`      |
//! | Arrival window   | past the threshold, not past H                    | `now + post_threshold_interval`|
//! | Overdue          | elapsed > H                                       | `now + overdue_interval`       |
//!
//! `H` is the route's travel estimate from [`routes::RouteTable`].

pub mod error;
pub mod routes;
pub mod schedule;
pub mod timestamps;
pub mod types;

pub use error::{Result, ScheduleError};
pub use routes::{canonical_city, RouteTable};
pub use schedule::VerificationScheduler;
pub use types::{CheckReason, DispatchReference, ReferenceSource, ScheduleDecision, ShipmentSnapshot};
