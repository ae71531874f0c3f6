// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod repositories;
pub mod db;
pub mod event_bus;
pub mod hawk;
pub mod chief_client;
pub mod mailer;
pub mod document_store;

pub use chief_client::{ChiefClient, DisabledChiefGateway};
pub use document_store::{JsonDocumentGenerator, LocalDocumentStore};
pub use mailer::{InMemoryMailer, LogMailer, NotifyMailer};
