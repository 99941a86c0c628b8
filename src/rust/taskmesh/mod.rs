// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod cluster;
pub mod config;
pub mod delegate;
