//! Thread and channel helpers for cross-thread tests

use crossbeam_channel::{bounded, Receiver, Sender};
use simbuf_rs::SharedBuffer;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Create test channels with default size
pub fn create_test_channels<T, U>() -> (Sender<T>, Receiver<T>, Sender<U>, Receiver<U>) {
    let (tx1, rx1) = bounded(16);
    let (tx2, rx2) = bounded(16);
    (tx1, rx1, tx2, rx2)
}

/// Run `tick` on a manager thread until `stop` receives a message or is
/// dropped. The buffer is handed back when the thread ends.
pub fn spawn_manager<F>(
    mut buffer: SharedBuffer,
    stop: Receiver<()>,
    mut tick: F,
) -> JoinHandle<SharedBuffer>
where
    F: FnMut(&mut SharedBuffer) + Send + 'static,
{
    thread::spawn(move || {
        loop {
            tick(&mut buffer);
            match stop.recv_timeout(Duration::from_micros(200)) {
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                _ => break,
            }
        }
        buffer
    })
}
