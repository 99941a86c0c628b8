// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::taskmesh::{
    Cluster,
    Config,
};

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Builds a configuration for `num_cores` cores, with `extra` appended as further YAML sections.
pub fn config(num_cores: usize, extra: &str) -> Result<Config> {
    let yaml: String = format!("taskmesh:\n  num_cores: {}\n{}", num_cores, extra);
    Ok(yaml.parse()?)
}

/// Initializes a cluster of `num_cores` cores with default tunables.
pub fn cluster(num_cores: usize) -> Result<Cluster> {
    Ok(Cluster::init(config(num_cores, "")?)?)
}
