//! Keeps the README on the crate documentation page.
#![doc = include_str!("../README.md")]
