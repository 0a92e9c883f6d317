//! Home Assistant Components
//!
//! Integrations built on the host slice in `ha-helpers`.

pub mod imgw_pib;
