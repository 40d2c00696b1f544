// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Shared document model, change events and configuration for the live window engine.

pub mod config;
pub mod document;
pub mod mutation;
pub mod range;

pub use config::{ConfigurationError, WindowConfig};
pub use document::{Document, DocumentError, DEFAULT_ID_FIELD};
pub use mutation::{Mutation, MutationEvent, Removal, Transition};
pub use range::{validate_range, RangeError, MAX_RANGE};
