//! Posture viewer: runs one backend analysis, holds a minimum "thinking"
//! sequence while it works, then reveals the result stage by stage.

pub mod classify;
pub mod client;
pub mod config;
pub mod error_view;
pub mod fragment;
pub mod logging;
pub mod normalize;
pub mod render;
pub mod sequencer;
pub mod sink;
pub mod thinking;
pub mod view;
