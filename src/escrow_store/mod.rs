/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The persistent state of the escrow core.
//!
//! # Pluggable persistence
//!
//! - The escrow store is kept in persistent storage chosen by the library user.
//! - The engine merely requires that the persistence mechanism implements the abstract functionality of
//!   a key-value store with atomic, batched writes. This functionality is made concrete by the traits
//!   defined in [`pluggables`].
//! - The key-value store has no range scans, so collections are kept as explicit list values and as
//!   counters inside the [`Campaign`](crate::types::campaign::Campaign) record. The [`variables`]
//!   submodule lists everything that is stored.
//!
//! # Accessing the escrow store
//!
//! Implementations of the pluggable traits get wrapped inside [`accessors`], which put the escrow
//! variables in the right places and provide typed methods for reading and writing them. The rules that
//! every write must respect are in [`invariants`].

pub mod accessors;

pub mod invariants;

pub mod pluggables;

pub mod variables;
