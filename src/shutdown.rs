use tokio::sync::{mpsc, watch};

/// Stop signal shared by the seeding server and download workers. The server
/// stops accepting peers when it fires; workers finish the piece they hold
/// and take no more. `Sender::send` hands back a `Drained` that resolves once
/// all of them have let go of their `Receiver`.
pub fn channel() -> (Sender, Receiver) {
    let (signal, stopped) = watch::channel(false);
    let (alive, alive_rx) = mpsc::channel(1);

    let sender = Sender {
        signal,
        drained: Drained(alive_rx),
    };
    let receiver = Receiver {
        stopped,
        _alive: alive,
    };

    (sender, receiver)
}

/// Resolves after the server loop and every worker have returned.
pub struct Drained(mpsc::Receiver<()>);

impl Drained {
    pub async fn wait(mut self) {
        // nothing is ever sent, this returns once all holders dropped theirs
        let _ = self.0.recv().await;
    }
}

pub struct Sender {
    signal: watch::Sender<bool>,
    drained: Drained,
}

impl Sender {
    pub fn send(self) -> Drained {
        self.signal.send_replace(true);
        self.drained
    }
}

/// Held by the server loop, each worker and the interactive app. A clone
/// made after the signal was sent sees it too.
#[derive(Debug, Clone)]
pub struct Receiver {
    stopped: watch::Receiver<bool>,
    _alive: mpsc::Sender<()>,
}

impl Receiver {
    /// Resolves once shutdown is requested. A dropped `Sender` counts as a
    /// request.
    pub async fn recv(&mut self) {
        loop {
            let stopped = *self.stopped.borrow_and_update();

            if stopped || self.stopped.changed().await.is_err() {
                return;
            }
        }
    }
}
