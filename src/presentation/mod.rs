//! Stateless rendering of menus and messages.

pub mod menus;
pub mod render;

pub use menus::{Choice, Nav};
