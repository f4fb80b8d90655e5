// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::NodeConfig;

#[test]
fn defaults_validate() {
    assert!(NodeConfig::for_tests().validate().is_ok());
}

#[yare::parameterized(
    zero_queue = { |c: &mut NodeConfig| c.subscriber_queue = 0 },
    zero_window = { |c: &mut NodeConfig| c.window_len = 0 },
    zero_sensors = { |c: &mut NodeConfig| c.max_sensors = 0 },
)]
fn rejects_zero_limits(mutate: fn(&mut NodeConfig)) {
    let mut config = NodeConfig::for_tests();
    mutate(&mut config);
    assert!(config.validate().is_err());
}

#[test]
fn interval_helpers() {
    let config = NodeConfig::for_tests();
    assert_eq!(config.load_sample_interval().as_millis(), 2_000);
    assert_eq!(config.offline_grace().as_secs(), 60);
    assert_eq!(config.room_idle().as_secs(), 300);
}
