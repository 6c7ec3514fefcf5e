//! Batch renderer that turns live-rendered notes, canvases and drawings into
//! self-contained static HTML.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub(crate) mod util;
