//! # Kernel Boot Information and Memory Layout
//!
//! Everything the memory-management stack consumes from the outside world
//! lives here: the `#[repr(C)]` handoff structures the boot loader fills in
//! ([`boot`]) and the compile-time memory-layout constants ([`memory`]).
//!
//! The crate is deliberately leaf-level — no dependencies, no logic beyond
//! accessors — so that every other kernel crate can agree on the same
//! contract without pulling anything else in.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod boot;
pub mod memory;
