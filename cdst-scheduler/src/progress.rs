use cdst_structs::core::ProgressFrame;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;

/// Per-scenario single-slot broadcast. Publishing overwrites the slot, so
/// slow subscribers coalesce to the latest frame and never backpressure
/// the solver; new subscribers immediately observe the cached frame.
pub struct ProgressRegistry {
    channels: Mutex<HashMap<String, watch::Sender<ProgressFrame>>>,
}

impl Default for ProgressRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Creates (or replaces) the channel for a scenario and returns the
    /// first subscription.
    pub fn open(&self, scenario_id: &str, initial: ProgressFrame) -> watch::Receiver<ProgressFrame> {
        let (tx, rx) = watch::channel(initial);
        self.channels
            .lock()
            .expect("progress registry poisoned")
            .insert(scenario_id.to_string(), tx);
        rx
    }

    pub fn publish(&self, scenario_id: &str, frame: ProgressFrame) {
        let channels = self.channels.lock().expect("progress registry poisoned");
        if let Some(tx) = channels.get(scenario_id) {
            // Terminal frames are sticky: a late heartbeat must not
            // overwrite the frame subscribers terminate on.
            if tx.borrow().status.is_terminal() && !frame.status.is_terminal() {
                return;
            }
            // send only fails with no receivers; the slot still updates
            // for future subscribers, so the error is irrelevant.
            let _ = tx.send(frame);
        }
    }

    pub fn subscribe(&self, scenario_id: &str) -> Option<watch::Receiver<ProgressFrame>> {
        self.channels
            .lock()
            .expect("progress registry poisoned")
            .get(scenario_id)
            .map(|tx| tx.subscribe())
    }

    pub fn latest(&self, scenario_id: &str) -> Option<ProgressFrame> {
        self.channels
            .lock()
            .expect("progress registry poisoned")
            .get(scenario_id)
            .map(|tx| tx.borrow().clone())
    }
}
