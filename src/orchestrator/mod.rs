//! Application-level orchestration.
//!
//! This module owns the supervisor's event loop: it turns UI commands into
//! supervisor calls and routes per-session feedback back into it. UI/CLI
//! layers only talk to it through channels.

mod controller;

pub(crate) use controller::{run_controller, UiCommand};
