//! # taskcg-core
//!
//! Cgroup primitives for isolating orchestrator tasks on a Linux node.
//!
//! This crate provides:
//! - **Version detection**: legacy (v1/hybrid) versus unified (v2) hierarchy.
//! - **Naming**: cgroup parents and per-task scope identifiers.
//! - **Cpuset management**: exclusive core reservations and a shared pool,
//!   behind one [`cgroup::CpusetManager`] trait with a variant per hierarchy.
//! - **Basic setup**: the freezer cgroup legacy hosts hand to the runtime.
//!
//! All filesystem access goes through [`cgroup::CgroupFs`] so every
//! component can be driven against a temporary tree.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
