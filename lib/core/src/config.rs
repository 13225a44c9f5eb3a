// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Stagecast Project Contributors
// SPDX-License-Identifier: Apache-2.0

//! Engine configuration.

use std::time::Duration;

use derive_builder::Builder;

/// Per-handle engine configuration.
///
/// `max_buffered_steps` is the buffering-depth policy: how many sealed but
/// not yet fully retired steps may coexist on a stream before the oldest is
/// evicted. The default keeps every step until all readers retire it; a
/// bounded depth trades the reader's no-gap guarantee for bounded memory.
#[derive(Builder, Clone, Debug)]
pub struct EngineConfig {
    /// Sealed steps retained before the oldest is evicted.
    #[builder(default = "usize::MAX")]
    pub max_buffered_steps: usize,

    /// How long a reader `open` waits for a writer to open the same stream
    /// before failing `StreamUnavailable`.
    #[builder(default = "Duration::from_secs(60)")]
    pub open_timeout: Duration,
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_buffered_steps: usize::MAX,
            open_timeout: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_default() {
        let built = EngineConfig::builder().build().unwrap();
        let default = EngineConfig::default();
        assert_eq!(built.max_buffered_steps, default.max_buffered_steps);
        assert_eq!(built.open_timeout, default.open_timeout);
    }

    #[test]
    fn builder_overrides() {
        let config = EngineConfig::builder()
            .max_buffered_steps(2)
            .open_timeout(Duration::from_millis(250))
            .build()
            .unwrap();
        assert_eq!(config.max_buffered_steps, 2);
        assert_eq!(config.open_timeout, Duration::from_millis(250));
    }
}
