//! Frame scheduler and resource arbitration for the Quartermaster engine.
//!
//! This crate owns the per-tick decision loop: which subsystems run, in
//! what order, under which spending mode, and what happens when they fail
//! or when the economy congests.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `quartermaster.yaml` into
//!   strongly-typed structs.
//! - [`subsystem`] -- The [`Subsystem`] trait and the [`TickContext`] handed
//!   to each invocation.
//! - [`registry`] -- [`SubsystemRegistry`]: ordered descriptors with
//!   cadences computed once at registration.
//! - [`scheduler`] -- [`FrameScheduler::step`] and the caller-owned
//!   [`SchedulerContext`].
//! - [`arbiter`] -- [`ValueArbiter`]: infrastructure vs throughput scores.
//! - [`retry`] -- [`RetryManager`]: exponential backoff and alternate-site
//!   fallback for failed constructions.
//! - [`overflow`] -- [`OverflowController`]: congestion levels and forced
//!   drain spending.
//! - [`activity`] -- [`ActivityTracker`]: per-subsystem timing and error
//!   counts for periodic reports.
//! - [`perception`] / [`actuation`] -- Interfaces to the external engine.
//! - [`runner`] -- Async tick driver with run bounds.
//!
//! [`Subsystem`]: subsystem::Subsystem
//! [`TickContext`]: subsystem::TickContext
//! [`SubsystemRegistry`]: registry::SubsystemRegistry
//! [`FrameScheduler::step`]: scheduler::FrameScheduler::step
//! [`SchedulerContext`]: scheduler::SchedulerContext
//! [`ValueArbiter`]: arbiter::ValueArbiter
//! [`RetryManager`]: retry::RetryManager
//! [`OverflowController`]: overflow::OverflowController
//! [`ActivityTracker`]: activity::ActivityTracker

pub mod activity;
pub mod actuation;
pub mod arbiter;
pub mod config;
pub mod overflow;
pub mod perception;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod subsystem;
