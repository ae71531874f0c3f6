// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Layer (`icms-casework-core`)
//!
//! Aggregates, value objects and persistence contracts for the licensing
//! workflow. Nothing in this layer performs I/O; repositories, the document
//! store and the CHIEF gateway are traits implemented in
//! `crate::infrastructure`.

pub mod access;
pub mod case;
pub mod chief;
pub mod config;
pub mod document_pack;
pub mod events;
pub mod process;
pub mod reference;
pub mod repository;
pub mod requests;
pub mod template;
pub mod user;
pub mod workbasket;
