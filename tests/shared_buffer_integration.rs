//! Integration tests for the shared buffer lifecycle
//!
//! These tests validate the manager side and its use across threads:
//! - Manager and consumers on separate threads
//! - Trees growing on both sides while consumers link
//! - Resizing and cropping a wrapped buffer
//! - Configuration driven construction

mod common;

use common::builders::{robot_tree, RegistryBuilder};
use common::mock_helpers::{create_test_channels, spawn_manager};
use common::{assert_float_eq, buffered_values, record_frames};
use simbuf_rs::{
    BufferConfig, CropBufferRequest, FillBufferRequest, LinkedBuffer, Registry, SharedBuffer,
    SimBufError, Value, VariableKind,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn test_manager_and_consumers_on_separate_threads() {
    let root = robot_tree();
    let time = root.find_variable("time").unwrap();
    let q = root.find_variable("robot.q").unwrap();
    let buffer = SharedBuffer::new(root, 256);
    let factory = buffer.factory();

    let (stop_tx, stop_rx, report_tx, report_rx) = create_test_channels::<(), f64>();
    let manager = spawn_manager(buffer, stop_rx, move |buffer| {
        buffer.process_linked_push_requests(true);
        time.set_f64(time.as_f64() + 1.0);
        buffer.increment_buffer_index(true);
        buffer.write_buffer();
        buffer.prepare_linked_buffers_for_pull();
    });

    let consumers: Vec<_> = (0..3)
        .map(|i| {
            let factory = factory.clone();
            let report_tx = report_tx.clone();
            thread::spawn(move || {
                let consumer = Registry::new("root");
                let linked = factory.new_linked_registry(consumer.clone()).unwrap();
                let properties = factory.new_linked_buffer_properties().unwrap();
                let time = consumer.find_variable("time").unwrap();

                assert!(wait_until(|| {
                    linked.pull();
                    properties.pull();
                    time.as_f64() > 20.0
                }));
                assert!(properties.properties().is_some());

                if i == 0 {
                    let q = consumer.find_variable("robot.q").unwrap();
                    q.set_f64(3.0);
                    linked.push();
                }
                report_tx.send(time.as_f64()).unwrap();
                // Handed back so the pending push outlives the thread.
                linked
            })
        })
        .collect();

    for _ in 0..3 {
        let seen = report_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(seen > 20.0);
    }
    let links: Vec<_> = consumers.into_iter().map(|c| c.join().unwrap()).collect();

    assert!(wait_until(|| q.as_f64() == 3.0));
    drop(links);
    stop_tx.send(()).unwrap();
    let buffer = manager.join().unwrap();

    assert!(buffer.properties().active_buffer_length() > 20);
    assert!(buffered_values(&buffer, &q).contains(&3.0));
}

fn variable_paths(root: &Arc<Registry>) -> Vec<String> {
    let mut paths: Vec<String> = root
        .collect_subtree_variables()
        .iter()
        .map(|v| v.full_name())
        .collect();
    paths.sort();
    paths
}

#[test]
fn test_trees_converge_while_both_sides_grow() {
    let root = RegistryBuilder::new("root")
        .variable("time", VariableKind::Double)
        .child(RegistryBuilder::new("manager"))
        .build();
    let manager_side = root.child("manager").unwrap();
    let buffer = SharedBuffer::new(root.clone(), 64);
    let factory = buffer.factory();

    let (stop_tx, stop_rx, _, _) = create_test_channels::<(), ()>();
    let mut tick = 0usize;
    let added = manager_side.clone();
    let manager = spawn_manager(buffer, stop_rx, move |buffer| {
        tick += 1;
        if tick % 7 == 0 {
            added
                .add_variable(&format!("m{}", tick), VariableKind::Double)
                .unwrap();
        }
        buffer.process_linked_push_requests(true);
        buffer.increment_buffer_index(true);
        buffer.write_buffer();
        buffer.prepare_linked_buffers_for_pull();
    });

    let consumers: Vec<_> = (0..4)
        .map(|i| {
            let factory = factory.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(3 * i as u64));
                let consumer = Registry::new("root");
                let linked = factory.new_linked_registry(consumer.clone()).unwrap();

                // Half as one subtree, half one at a time.
                let mut own = RegistryBuilder::new(&format!("consumer{}", i));
                for n in 0..50 {
                    own = own.variable(&format!("c{}", n), VariableKind::Integer);
                }
                let own = own.build();
                consumer.add_child(own.clone()).unwrap();
                for n in 50..100 {
                    own.add_variable(&format!("c{}", n), VariableKind::Integer)
                        .unwrap();
                    if n % 10 == 0 {
                        thread::sleep(Duration::from_millis(1));
                    }
                }
                (consumer, linked)
            })
        })
        .collect();
    let consumers: Vec<_> = consumers.into_iter().map(|c| c.join().unwrap()).collect();

    assert!(wait_until(|| manager_side.number_of_variables() >= 20));
    stop_tx.send(()).unwrap();
    let buffer = manager.join().unwrap();

    let expected = variable_paths(&root);
    assert_eq!(expected.len(), 1 + 400 + manager_side.number_of_variables());
    for variable in root.collect_subtree_variables() {
        assert!(
            buffer.registry_buffer().find_buffer(&variable).is_some(),
            "no buffer for {}",
            variable.full_name()
        );
    }
    for (consumer, linked) in &consumers {
        assert_eq!(variable_paths(consumer), expected);
        assert_eq!(linked.number_of_linked_variables(), expected.len());
    }
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = BufferConfig {
        initial_size: 0,
        ..BufferConfig::default()
    };
    assert!(matches!(
        SharedBuffer::with_config(robot_tree(), &config),
        Err(SimBufError::Config(_))
    ));
}

#[test]
fn test_dropped_consumer_stops_costing_the_manager() {
    let root = robot_tree();
    let q = root.find_variable("robot.q").unwrap();
    let mut buffer = SharedBuffer::new(root, 16);
    let factory = buffer.factory();

    let dropped = {
        let consumer = Registry::new("root");
        let linked = factory.new_linked_registry(consumer.clone()).unwrap();
        consumer.find_variable("robot.q").unwrap().set_f64(2.0);
        linked.push();
        Arc::downgrade(&linked)
    };
    assert!(dropped.upgrade().is_none());

    // The push went away with its consumer.
    assert!(!buffer.process_linked_push_requests(true));
    assert_eq!(q.as_f64(), 0.0);

    let kept = Registry::new("root");
    let linked = factory.new_linked_registry(kept.clone()).unwrap();
    buffer.prepare_linked_buffers_for_pull();
    assert!(linked.pull());
    assert!(!buffer.has_request_pending());
}

#[test]
fn test_consumer_sees_properties_snapshot() {
    let root = robot_tree();
    let mut buffer = SharedBuffer::new(root, 32);
    let properties = buffer.factory().new_linked_buffer_properties().unwrap();

    for _ in 0..5 {
        buffer.increment_buffer_index(true);
    }
    assert!(properties.properties().is_none());
    buffer.prepare_linked_buffers_for_pull();

    let handle = thread::spawn(move || {
        assert!(properties.pull());
        properties.properties().unwrap()
    });
    let seen = handle.join().unwrap();
    assert_eq!(seen, *buffer.properties());
    assert_eq!(seen.current_index(), 5);
}

#[test]
fn test_shrink_wrapped_buffer_keeps_latest_frames() {
    let root = RegistryBuilder::new("root")
        .variable("q", VariableKind::Double)
        .build();
    let q = root.variable("q").unwrap();
    let mut buffer = SharedBuffer::new(root, 8);
    record_frames(&mut buffer, &q, 12);

    let props = *buffer.properties();
    assert_eq!((props.in_point(), props.out_point(), props.current_index()), (4, 3, 3));

    assert!(buffer.resize_buffer(4));
    let props = *buffer.properties();
    assert_eq!(props.size(), 4);
    assert_eq!((props.in_point(), props.out_point(), props.current_index()), (0, 3, 3));
    assert_eq!(buffered_values(&buffer, &q), vec![8.0, 9.0, 10.0, 11.0]);
    assert_float_eq(q.as_f64(), 11.0, 1e-12);
}

#[test]
fn test_grow_wrapped_buffer_unrolls_window() {
    let root = RegistryBuilder::new("root")
        .variable("q", VariableKind::Double)
        .build();
    let q = root.variable("q").unwrap();
    let mut buffer = SharedBuffer::new(root, 8);
    record_frames(&mut buffer, &q, 12);

    assert!(buffer.resize_buffer(12));
    let props = *buffer.properties();
    assert_eq!((props.in_point(), props.out_point(), props.current_index()), (0, 7, 7));
    assert_eq!(
        buffered_values(&buffer, &q),
        vec![4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 0.0, 0.0, 0.0, 0.0]
    );

    // Recording continues after the old frames.
    buffer.increment_buffer_index(true);
    q.set_f64(12.0);
    buffer.write_buffer();
    assert_eq!(buffered_values(&buffer, &q)[8], 12.0);
}

#[test]
fn test_crop_then_record() {
    let root = RegistryBuilder::new("root")
        .variable("q", VariableKind::Double)
        .build();
    let q = root.variable("q").unwrap();
    let mut buffer = SharedBuffer::new(root, 10);
    record_frames(&mut buffer, &q, 10);

    assert!(buffer.crop_buffer(CropBufferRequest::new(6, 8)));
    assert_eq!(buffered_values(&buffer, &q), vec![6.0, 7.0, 8.0]);
    assert_eq!(q.value(), Value::Double(6.0));

    buffer.increment_buffer_index(true);
    assert_eq!(buffer.properties().current_index(), 1);
    assert!(!buffer.crop_buffer(CropBufferRequest::new(0, 3)));
}

#[test]
fn test_fill_with_current_value() {
    let root = RegistryBuilder::new("root")
        .variable("q", VariableKind::Double)
        .build();
    let q = root.variable("q").unwrap();
    let mut buffer = SharedBuffer::new(root, 6);
    record_frames(&mut buffer, &q, 6);

    q.set_f64(-1.0);
    buffer.fill_buffer(FillBufferRequest::new(false, 1, 3));
    assert_eq!(
        buffered_values(&buffer, &q),
        vec![0.0, -1.0, -1.0, -1.0, 4.0, 5.0]
    );

    // Out of range fills are ignored.
    buffer.fill_buffer(FillBufferRequest::new(true, 2, 6));
    assert_eq!(buffered_values(&buffer, &q)[2], -1.0);
}

#[test]
fn test_config_drives_construction() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("simbuf.toml");
    std::fs::write(
        &path,
        "initial_size = 64\nparallel_threshold = 0\ntrack_dirty_pushes = false\n",
    )
    .unwrap();

    let config = BufferConfig::load(&path).unwrap();
    let root = robot_tree();
    let q = root.find_variable("robot.q").unwrap();
    let mut buffer = SharedBuffer::with_config(root, &config).unwrap();
    assert_eq!(buffer.properties().size(), 64);

    let consumer = Registry::new("root");
    let linked = buffer.factory().new_linked_registry(consumer.clone()).unwrap();
    consumer.find_variable("robot.q").unwrap().set_f64(7.0);
    linked.push();

    // Without dirty tracking every element is visited.
    assert!(buffer.process_linked_push_requests(true));
    assert_eq!(q.as_f64(), 7.0);
    assert_eq!(buffered_values(&buffer, &q)[0], 7.0);
}
