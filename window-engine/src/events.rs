// Copyright (c) James Kassemi, SC, US. All rights reserved.

use core_types::{Document, Mutation};
use doc_query::Side;

use crate::{buffer::Regions, error::TransportError};

/// Everything an observer can see, in emission order.
#[derive(Clone, Debug)]
pub enum WindowEvent {
    /// The change stream is live. `reconnected` is set on every welcome after the first.
    Connect { reconnected: bool },
    /// A snapshot replaced the buffer.
    Snapshot { documents: Vec<Document> },
    /// Raw change, forwarded before it is applied.
    Mutation(Mutation),
    /// A pivot fetch is about to run.
    Backfill { side: Side, count: usize },
    /// Current window contents.
    Data { documents: Vec<Document> },
    /// Buffer split around the window; follows every `Data`.
    Debug(Regions),
    /// No connect, fetch or backfill timer is outstanding.
    Settle,
    Error(TransportError),
}

impl WindowEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WindowEvent::Connect { .. } => "connect",
            WindowEvent::Snapshot { .. } => "snapshot",
            WindowEvent::Mutation(_) => "mutation",
            WindowEvent::Backfill { .. } => "backfill",
            WindowEvent::Data { .. } => "data",
            WindowEvent::Debug(_) => "debug",
            WindowEvent::Settle => "settle",
            WindowEvent::Error(_) => "error",
        }
    }
}
