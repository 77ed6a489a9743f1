//! Transport module - TCP sockets for the link.
//!
//! Both roles speak plain TCP; see [`tcp`] for the helpers.

pub mod tcp;

pub use tcp::{accept, connect, listen};
