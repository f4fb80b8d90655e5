// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sensor pipeline: per-sensor worker actors owning bounded attribute
//! windows, fanning measurements out on the bus, and pushing back-pressure
//! hints to their connectors.

pub mod window;
pub mod worker;

pub use window::AttributeWindow;
pub use worker::{
    spawn_sensor, BackpressureConfig, BatchItem, BatchOutcome, ConnectorPush, PipelineCounters,
    SensorCmd, SensorDeps, SensorHandle,
};
