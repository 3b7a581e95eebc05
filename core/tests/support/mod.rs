#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use consulta_core::{EngineListener, EngineUpdate};

pub fn wait_until(what: &str, f: impl FnMut() -> bool) {
    wait_until_with_poll(what, Duration::from_secs(5), Duration::from_millis(25), f);
}

pub fn wait_until_with_poll(
    what: &str,
    timeout: Duration,
    poll: Duration,
    mut f: impl FnMut() -> bool,
) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(poll);
    }
    panic!("{what}: condition not met within {timeout:?}");
}

/// Let in-flight async legs (reconcile scans, subscription attach) drain
/// before the next step of a test.
pub fn settle() {
    std::thread::sleep(Duration::from_millis(200));
}

pub fn block_on<F: Future>(f: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(f)
}

#[derive(Clone)]
pub struct Collector(pub Arc<Mutex<Vec<EngineUpdate>>>);

impl Collector {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn arrived_bodies(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|u| match u {
                EngineUpdate::MessageArrived(m) => Some(m.body.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn arrivals_of(&self, body: &str) -> usize {
        self.arrived_bodies().iter().filter(|b| *b == body).count()
    }

    pub fn send_failures(&self) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|u| matches!(u, EngineUpdate::SendFailed { .. }))
            .count()
    }
}

impl EngineListener for Collector {
    fn on_update(&self, update: EngineUpdate) {
        self.0.lock().unwrap().push(update);
    }
}
