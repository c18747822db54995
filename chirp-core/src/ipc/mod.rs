//! Types handed to the presentation layer.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them as JSON without re-mapping fields.

pub mod events;
