//! Presentation layer: the command-line front end.

mod app;

pub use app::{App, RunSummary, SlotReport};
