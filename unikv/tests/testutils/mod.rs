// Copyright (c) 2024-2025 unikv Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Test utilities for UniKV integration tests

pub mod store_fixture;
