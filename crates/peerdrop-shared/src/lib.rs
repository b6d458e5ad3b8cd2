//! # peerdrop-shared
//!
//! Types and wire protocol shared between the relay server and its clients.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;
