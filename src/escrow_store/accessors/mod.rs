/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that wrap a [`KVStore`](super::pluggables::KVStore) and put the escrow variables in the right
//! places in it.
//!
//! - [`internal::EscrowStore`] is the read-and-write handle the engine uses.
//! - [`public::EscrowStoreCamera`] hands out read-only [`public::EscrowStoreSnapshot`]s to user code.

pub mod internal;

pub mod public;
