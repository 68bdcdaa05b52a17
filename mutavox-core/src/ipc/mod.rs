//! Event types serialised for the control-plane transport.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so whichever
//! transport hosts this core (socket layer, IPC bridge) can forward them to
//! an operator UI without re-encoding.

pub mod events;
