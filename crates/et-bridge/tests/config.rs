// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Loading bridge service configuration from files.

use et_bridge::{ConfigError, ServiceConfig, SwapKind, Wait};
use std::io::Write;
use tempfile::NamedTempFile;

fn file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_config() {
    let f = file(
        r#"
        name = "hall-b"
        batch = 200
        stats_interval_secs = 0

        [from]
        address = "127.0.0.1:11111"
        station = "to-hall-b"

        [to]
        address = "127.0.0.1:22222"
        station = "from-hall-a"

        [transfer]
        mode_from = "async"
        mode_to = "timed"
        timeout_to_ms = 250
        chunk_from = 20
        chunk_to = 5
        swap = "words32"
        "#,
    );

    let config = ServiceConfig::from_file(f.path()).unwrap();
    assert_eq!(config.name, "hall-b");
    assert_eq!(config.batch, 200);
    assert_eq!(config.stats_interval_secs, 0);
    assert_eq!(config.from.station.as_deref(), Some("to-hall-b"));
    assert_eq!(config.to.station.as_deref(), Some("from-hall-a"));
    assert_eq!(config.transfer.mode_from, Wait::Async);
    assert_eq!(config.transfer.timeout_to_ms, 250);
    assert_eq!(config.transfer.chunk_to, 5);
    assert_eq!(config.transfer.swap, Some(SwapKind::Words32));
    assert!(config.transfer.swapper().is_some());
}

#[test]
fn test_generated_config_round_trips() {
    let mut config = ServiceConfig::new("daq1:11111", "daq2:11111");
    config.from.station = Some("bridge".into());
    config.transfer.chunk_to = 7;
    let f = file(&toml::to_string_pretty(&config).unwrap());

    let loaded = ServiceConfig::from_file(f.path()).unwrap();
    assert_eq!(loaded.from.address, "daq1:11111");
    assert_eq!(loaded.transfer.chunk_to, 7);
    assert!(loaded.transfer.swap.is_none());
}

#[test]
fn test_zero_chunk_in_file_is_invalid() {
    let f = file(
        r#"
        [from]
        address = "a:1"
        station = "bridge"

        [to]
        address = "b:1"

        [transfer]
        chunk_from = 0
        "#,
    );
    assert!(matches!(
        ServiceConfig::from_file(f.path()),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_missing_source_station_is_invalid() {
    let f = file(
        r#"
        [from]
        address = "a:1"

        [to]
        address = "b:1"
        "#,
    );
    assert!(matches!(
        ServiceConfig::from_file(f.path()),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_unknown_swap_is_parse_error() {
    let f = file(
        r#"
        [from]
        address = "a:1"
        station = "bridge"

        [to]
        address = "b:1"

        [transfer]
        swap = "words16"
        "#,
    );
    assert!(matches!(
        ServiceConfig::from_file(f.path()),
        Err(ConfigError::Toml(_))
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    assert!(matches!(
        ServiceConfig::from_file("/nonexistent/bridge.toml"),
        Err(ConfigError::Io(_))
    ));
}
