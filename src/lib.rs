// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod maas;
pub mod proxy;
pub mod safety;
pub mod stream;
pub mod token_cache;
pub mod upstream;
