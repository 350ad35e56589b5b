// HF Download Suite - Model Repository Download Orchestrator
// Copyright (C) 2025 HF Suite Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Durable storage: database connection, schema, entities, and the store

pub mod database;
pub mod migrations;
pub mod models;
pub mod store;

pub use database::Database;
pub use models::{
    DownloadTask, FileEntry, HistoryEntry, LocalModelRecord, NamedLocation, NewHistoryEntry,
    NewLocalModel, NewTask, Platform, Profile, RepoType, TaskPatch, TaskStatus, TokenRecord,
};
pub use store::{FileEntryUpsert, Store};
