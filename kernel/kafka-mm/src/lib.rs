//! # Kernel Memory Management
//!
//! The memory stack, bottom to top:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        Two-phase byte allocator (heap)              │
//! │   static arena before the cache exists, SLUB after  │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              SLUB object cache (slub)               │
//! │   size-classed slabs carved from mapped page runs   │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │         Virtual memory mapper (virt)                │
//! │   4-level walk, kernel-heap virtual extents, TLB    │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │        Physical page manager (phys)                 │
//! │   usable RAM at 4 KiB granularity, best-fit         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! All four lean on the same [`region`] bookkeeper for extent accounting,
//! and every subsystem reaches physical memory exclusively through the
//! [`PhysMapper`](kafka_vmem::PhysMapper) seam — the higher-half direct
//! map in the kernel, simulated frames in the unit tests.
//!
//! [`MemoryManager`] owns one instance of everything and is the only type
//! the rest of the kernel talks to.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod heap;
pub mod manager;
pub mod mapper;
pub mod phys;
pub mod region;
pub mod slub;
pub mod virt;

pub use manager::{MemoryManager, MmArenas};
pub use mapper::HhdmMapper;

#[cfg(test)]
mod testutil;
