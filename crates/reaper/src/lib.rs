//! Background TTL cleanup: a thread that periodically submits a
//! `cleanup_expired` command through the dispatcher, running only while
//! this node holds leadership.

#![warn(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use concord_consensus::Consensus;
use concord_core::TtlConfig;
use concord_dispatch::{DispatchOptions, Dispatcher};
use concord_engine::StateMachine;
use crossbeam::channel::{bounded, Sender};
use parking_lot::Mutex;

/// Drives periodic expiration cleanup for one node.
///
/// Constructed once per node and kept alive for the node's lifetime;
/// subscribes to leadership changes and starts/stops its worker thread
/// accordingly, so only the current leader ever runs cleanup.
pub struct Reaper<C> {
    dispatcher: Arc<Dispatcher<C>>,
    interval: Duration,
    enabled: bool,
    stop_tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<C> Reaper<C>
where
    C: Consensus<State = StateMachine> + 'static,
{
    /// Build a reaper over `dispatcher` and register it with `consensus`
    /// for leadership notifications. Returns the reaper wrapped in an
    /// `Arc` since its leader-change callback must outlive the caller's
    /// local scope.
    pub fn new(dispatcher: Arc<Dispatcher<C>>, consensus: &C, ttl: &TtlConfig) -> Arc<Self> {
        let reaper = Arc::new(Reaper {
            dispatcher,
            interval: Duration::from_secs(ttl.cleanup_interval_seconds.max(1)),
            enabled: ttl.enabled,
            stop_tx: Mutex::new(None),
            handle: Mutex::new(None),
        });

        if reaper.enabled {
            let weak: Weak<Reaper<C>> = Arc::downgrade(&reaper);
            consensus.on_leader_change(Box::new(move |is_leader| {
                if let Some(reaper) = weak.upgrade() {
                    if is_leader {
                        reaper.spawn_loop();
                    } else {
                        reaper.stop_loop();
                    }
                }
            }));
        }

        reaper
    }

    /// Whether the worker thread is currently running.
    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    fn spawn_loop(self: &Arc<Self>) {
        self.stop_loop();

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let dispatcher = self.dispatcher.clone();
        let interval = self.interval;
        let handle = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Ok(()) => break,
                Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
                Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                    let now = chrono::Utc::now().timestamp();
                    let opts = DispatchOptions::default();
                    match dispatcher.cleanup_expired(now, &opts) {
                        Ok(deleted) if deleted > 0 => {
                            tracing::debug!(deleted, "ttl reaper removed expired records");
                        }
                        Ok(_) => {}
                        Err(err) => {
                            tracing::warn!(error = %err, "ttl reaper cleanup failed, retrying next interval");
                        }
                    }
                }
            }
        });

        *self.stop_tx.lock() = Some(stop_tx);
        *self.handle.lock() = Some(handle);
    }

    fn stop_loop(&self) {
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl<C> Drop for Reaper<C> {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_consensus::{ApplyMeta, LocalConsensus};
    use concord_core::{CompressionConfig, Key, Value};
    use concord_engine::PredicateRegistry;
    use concord_index::ExtractorRegistry;
    use std::sync::atomic::{AtomicI64, Ordering as AtomOrdering};

    fn build(now: Arc<AtomicI64>) -> (Arc<Dispatcher<LocalConsensus<StateMachine>>>, Arc<LocalConsensus<StateMachine>>) {
        let now_for_clock = now.clone();
        let consensus = Arc::new(LocalConsensus::new(
            "n1",
            StateMachine::new(
                "n1",
                CompressionConfig::default(),
                ExtractorRegistry::new(),
                PredicateRegistry::new(),
                false,
                10,
            ),
            |state: &mut StateMachine, payload: &[u8], meta: ApplyMeta| {
                let result = concord_engine::decode_command(payload).and_then(|cmd| state.apply(&cmd, meta));
                concord_engine::encode_reply(&result)
            },
            |_state: &StateMachine| Vec::new(),
            |_state: &mut StateMachine, _bytes: &[u8]| {},
            move || now_for_clock.load(AtomOrdering::SeqCst),
        ));
        let dispatcher = Arc::new(Dispatcher::new(consensus.clone(), 64));
        (dispatcher, consensus)
    }

    #[test]
    fn starts_running_immediately_since_local_consensus_is_always_leader() {
        let now = Arc::new(AtomicI64::new(1_000));
        let (dispatcher, consensus) = build(now);
        let ttl = TtlConfig {
            enabled: true,
            default_seconds: None,
            cleanup_interval_seconds: 1,
        };
        let reaper = Reaper::new(dispatcher, &*consensus, &ttl);
        assert!(reaper.is_running());
    }

    #[test]
    fn disabled_reaper_never_starts() {
        let now = Arc::new(AtomicI64::new(1_000));
        let (dispatcher, consensus) = build(now);
        let ttl = TtlConfig {
            enabled: false,
            default_seconds: None,
            cleanup_interval_seconds: 1,
        };
        let reaper = Reaper::new(dispatcher, &*consensus, &ttl);
        assert!(!reaper.is_running());
    }

    #[test]
    fn cleanup_interval_eventually_removes_expired_records() {
        let now = Arc::new(AtomicI64::new(1_000));
        let (dispatcher, consensus) = build(now.clone());

        dispatcher
            .put(
                b"a".to_vec(),
                Value::from("1"),
                &DispatchOptions {
                    ttl_seconds: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();

        let ttl = TtlConfig {
            enabled: true,
            default_seconds: None,
            cleanup_interval_seconds: 1,
        };
        let reaper = Reaper::new(dispatcher, &*consensus, &ttl);

        now.store(10_000, AtomOrdering::SeqCst);
        thread::sleep(Duration::from_millis(1_500));

        let still_present = consensus.local_query(|sm: &StateMachine| {
            sm.get(&Key::new(b"a".to_vec()).unwrap(), now.load(AtomOrdering::SeqCst)).unwrap()
        });
        assert!(still_present.is_none());
        drop(reaper);
    }

    #[test]
    fn leadership_loss_stops_the_worker_thread() {
        let now = Arc::new(AtomicI64::new(1_000));
        let (dispatcher, consensus) = build(now);
        let ttl = TtlConfig {
            enabled: true,
            default_seconds: None,
            cleanup_interval_seconds: 1,
        };
        let reaper = Reaper::new(dispatcher, &*consensus, &ttl);
        assert!(reaper.is_running());

        reaper.stop_loop();
        assert!(!reaper.is_running());
    }
}
