// /////////////////////////////////////////////////////////////////////////////
// Notelock Sync Engine
// Copyright (c) 2025 Notelock Project Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Domain events of the notelock engine.

pub mod application_event;

pub use application_event::{ApplicationEvent, MAJOR_DATA_CHANGE_THRESHOLD};
