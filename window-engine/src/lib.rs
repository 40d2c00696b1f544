// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Live window over a remote, ordered document collection.
//!
//! [`WindowEngine`] keeps a buffer of documents around a `[from, to)` window
//! of a sorted query. It snapshots the range once the change stream is live,
//! places incoming mutations in sort order, and tops up each side of the
//! buffer with pivot queries when it runs short. Observers receive
//! [`WindowEvent`]s through a [`WindowSubscription`].
//!
//! [`WindowState`] holds the buffer arithmetic and can be driven without a
//! runtime.

pub mod buffer;
pub mod engine;
pub mod error;
pub mod events;
pub mod merge;
pub mod metrics;

pub use buffer::{
    Deficits, FillOutcome, FillPlan, MutationOutcome, Placement, Regions, WindowState,
};
pub use engine::{Phase, WindowEngine, WindowSubscription};
pub use error::{TransportError, WindowError};
pub use events::WindowEvent;
pub use merge::merge;
pub use metrics::{WindowMetrics, WindowMetricsSnapshot};
