//! Application-level orchestration utilities.
//!
//! This module owns the export lifecycle as seen from a UI (start, cancel,
//! quit) and post-export processing such as history save and refresh. UI/CLI
//! layers call into this module to keep responsibilities separated.

#[cfg(feature = "tui")]
mod controller;
mod post_process;

#[cfg(feature = "tui")]
pub(crate) use controller::{run_controller, UiCommand};
pub(crate) use post_process::process_export_completion;
