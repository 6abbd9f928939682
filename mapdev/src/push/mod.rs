//! The asynchronous interrupt-delivery pipeline.
//!
//! A hardware event enters at the per-interrupt [`domain`] gate, fans out
//! through the [`trigger`] distributor of its line, optionally descends
//! through nested interrupt [`controller`] handlers, and ends at the
//! [`poll`]/[`variable`] distributors which push version-stamped values into
//! the queues of subscribed [`manager::AsyncAccessor`]s. Runtime faults are
//! broadcast once per fault episode by the [`container`] thread.
//!
//! Ownership is strictly leaf-to-root: subscribers keep their distributor
//! alive, distributors keep their parents and ultimately the domain alive,
//! while every downward reference is weak. Dropping the last subscriber of a
//! line therefore tears down the whole branch.

pub mod container;
pub mod controller;
pub mod domain;
pub mod manager;
pub mod poll;
pub mod trigger;
pub mod variable;

#[cfg(test)]
mod tests;
