/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A milestone-gated escrow engine for crowdfunding campaigns.
//!
//! Contributions to a campaign are held in escrow and earmarked to its milestones one at a time. When a
//! milestone is fully funded, the campaign's creator submits evidence that it has been delivered, the
//! campaign's backers vote on it, weighted by how much they contributed, and the milestone's funds are
//! released to the creator only if the vote meets both an approval and a quorum threshold. A background
//! [release scheduler](release_scheduler) makes sure that no vote stays open past its window.
//!
//! ## Getting started
//!
//! 1. Provide a [`KVStore`](escrow_store::pluggables::KVStore) for the escrow store to persist into.
//! 2. Build a [`PlatformSpec`](platform::PlatformSpec), optionally with custom
//!    [collaborators](collaborators) and [event handlers](events).
//! 3. Call [`start`](platform::PlatformSpec::start), and call operations on the returned
//!    [`Platform`](platform::Platform)'s [engine](platform::Platform::engine).

pub mod collaborators;

pub mod engine;

pub mod error;

pub mod escrow_store;

pub(crate) mod event_bus;

pub mod events;

pub mod logging;

pub mod milestones;

pub mod platform;

pub mod queries;

pub mod release_scheduler;

pub mod types;

pub mod voting;
