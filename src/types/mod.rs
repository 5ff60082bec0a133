/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that are common across the components of the escrow core.

pub mod basic;

pub mod campaign;

pub mod lease;

pub mod ledger;

pub mod milestone;
