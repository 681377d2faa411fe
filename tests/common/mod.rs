//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use simbuf_rs::{SharedBuffer, Variable};
use std::sync::Arc;
use std::time::Duration;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(100)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Record `frames` frames, setting `variable` to the frame number before each
/// write. The first frame goes to the current index.
pub fn record_frames(buffer: &mut SharedBuffer, variable: &Arc<Variable>, frames: usize) {
    for i in 0..frames {
        if i > 0 {
            buffer.increment_buffer_index(true);
        }
        variable.set_f64(i as f64);
        buffer.write_buffer();
    }
}

/// Recorded values of a double variable, in buffer order
pub fn buffered_values(buffer: &SharedBuffer, variable: &Variable) -> Vec<f64> {
    let Some(shared) = buffer.registry_buffer().find_buffer(variable) else {
        return Vec::new();
    };
    let shared = shared.read();
    (0..shared.len())
        .filter_map(|i| shared.value_at(i))
        .map(|v| v.as_f64())
        .collect()
}
