//! HearthLink Notify - Targeted realtime notification fan-out
//!
//! Maps client identity to a live connection handle and pushes admin-side
//! changes (pairing progress, area assignment edits, revocations) to the
//! affected clients. Delivery is best-effort: there is no queue, no retry and
//! no persistence of missed events.

pub mod registry;

pub use registry::{ConnectionHandle, NotificationRegistry, Outbound};
