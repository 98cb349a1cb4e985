use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

/// What a view depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    Item(Ulid),
    Resource(Ulid),
    LoanRequest(Ulid),
}

/// "Views depending on `subject` should refresh." Sent after commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refresh {
    pub subject: Subject,
    pub op: &'static str,
}

/// Fire-and-forget broadcast hub, one channel per subject plus a firehose.
pub struct NotifyHub {
    channels: DashMap<Subject, broadcast::Sender<Refresh>>,
    all: broadcast::Sender<Refresh>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one subject. Creates the channel if needed.
    pub fn subscribe(&self, subject: Subject) -> broadcast::Receiver<Refresh> {
        let sender = self
            .channels
            .entry(subject)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to every signal.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Refresh> {
        self.all.subscribe()
    }

    /// Send a signal. No-op if nobody is listening. A subject channel whose
    /// receivers have all gone is dropped here.
    pub fn send(&self, subject: Subject, op: &'static str) {
        let signal = Refresh { subject, op };
        let orphaned = match self.channels.get(&subject) {
            Some(sender) => sender.send(signal).is_err(),
            None => false,
        };
        if orphaned {
            self.channels.remove_if(&subject, |_, sender| sender.receiver_count() == 0);
        }
        let _ = self.all.send(signal);
    }

    #[cfg(test)]
    fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
