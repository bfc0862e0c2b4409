//! # Architecture Abstraction Layer
//!
//! Hardware boundary for the kernel. Only the Cortex-M4 port exists; on
//! hosted targets the caller drives `Scheduler::tick` directly.

#[cfg(target_os = "none")]
pub mod cortex_m4;
