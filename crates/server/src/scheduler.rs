//! Background reconcile cadence.
//!
//! The core reconciler performs a single sweep per call; this task decides
//! when sweeps happen.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use registrar_core::PendingReconciler;

/// Runs a reconcile sweep every `interval` until stopped.
pub struct ReconcileScheduler {
    reconciler: Arc<PendingReconciler>,
    interval: Duration,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReconcileScheduler {
    pub fn new(reconciler: Arc<PendingReconciler>, interval: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            reconciler,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the sweep loop.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Reconcile scheduler already running");
            return;
        }

        let reconciler = Arc::clone(&self.reconciler);
        let running = Arc::clone(&self.running);
        let interval = self.interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs_f64(), "Reconcile loop started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Reconcile loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        match reconciler.reconcile().await {
                            Ok(report) => debug!(
                                examined = report.examined,
                                advanced = report.advanced,
                                "Scheduled reconcile finished"
                            ),
                            Err(e) => warn!("Scheduled reconcile failed: {}", e),
                        }
                    }
                }
            }
            info!("Reconcile loop stopped");
        });

        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Signal the loop to stop and wait for an in-progress sweep to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Reconcile scheduler not running");
            return;
        }

        let _ = self.shutdown_tx.send(());

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Reconcile loop ended abnormally: {}", e);
            }
        }
    }
}
