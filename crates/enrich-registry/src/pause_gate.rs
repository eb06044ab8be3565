use tokio::sync::watch;

/// A two-state latch coordinating asset swap against active enrichment
/// work (§4.5). At most one writer (the [`crate::AssetManager`] plus the
/// startup sequence); many readers await [`PauseGate::closed`] at pipeline
/// entry before capturing a registry snapshot.
///
/// Backed by a `tokio::sync::watch` channel rather than a polled flag so
/// readers suspend until notified instead of spinning (§9 "signalling
/// reference for pause" redesign note).
pub struct PauseGate {
    tx: watch::Sender<bool>,
}

/// Cheaply clonable handle readers use to await the gate opening.
#[derive(Clone)]
pub struct PauseGateReader {
    rx: watch::Receiver<bool>,
}

impl PauseGate {
    /// Starts closed — opened once startup assets are downloaded (§4.5).
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn reader(&self) -> PauseGateReader {
        PauseGateReader {
            rx: self.tx.subscribe(),
        }
    }

    pub fn open(&self) {
        let _ = self.tx.send(true);
    }

    pub fn close(&self) {
        let _ = self.tx.send(false);
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGateReader {
    /// Suspends until the gate is open. Returns immediately if it already is.
    pub async fn closed(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Sender dropped: treat as permanently open so readers
                // don't hang forever on a sunset registry.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reader_suspends_until_opened() {
        let gate = PauseGate::new();
        let mut reader = gate.reader();
        assert!(!gate.is_open());

        let waited = tokio::spawn(async move {
            reader.closed().await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waited.is_finished());

        gate.open();
        waited.await.unwrap();
    }

    #[tokio::test]
    async fn already_open_gate_does_not_suspend() {
        let gate = PauseGate::new();
        gate.open();
        let mut reader = gate.reader();
        tokio::time::timeout(std::time::Duration::from_millis(50), reader.closed())
            .await
            .expect("should not block");
    }
}
