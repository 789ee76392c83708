//! Notification dispatch and delivery tracking.
//!
//! A `Dispatcher` fans one notification out across every (recipient, method)
//! pair, resolving contacts, rendering templates and sending through the
//! registered channel adapters. Each pair is tracked as its own delivery record.

pub mod channels;
pub mod dispatch;
pub mod gateway;
pub mod memory;
pub mod resolver;
pub mod schedule;
pub mod store;
pub mod template;
pub mod tracker;

pub use channels::ChannelRegistry;
pub use dispatch::{DispatchRequest, DispatchSummary, Dispatcher};
