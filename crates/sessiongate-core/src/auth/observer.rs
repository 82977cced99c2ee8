//! Process-wide logout notification.

use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the logout channel. Logouts are rare, a lagging receiver
/// only needs to learn that at least one happened.
const LOGOUT_CHANNEL_CAPACITY: usize = 16;

/// Payload-free signal that the session has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogoutNotice;

/// Fan-out point for logout notifications.
/// Clone is cheap - all clones share one broadcast channel.
#[derive(Debug, Clone)]
pub struct SessionObserver {
    tx: broadcast::Sender<LogoutNotice>,
}

impl Default for SessionObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionObserver {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(LOGOUT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to future logout notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LogoutNotice> {
        self.tx.subscribe()
    }

    /// Broadcast one logout. Returns how many subscribers received it.
    pub(crate) fn notify_logout(&self) -> usize {
        match self.tx.send(LogoutNotice) {
            Ok(receivers) => {
                debug!(receivers, "Logout notification sent");
                receivers
            }
            Err(_) => {
                debug!("Logout notification sent with no subscribers");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_notify_reaches_every_subscriber() {
        let observer = SessionObserver::new();
        let mut a = observer.subscribe();
        let mut b = observer.clone().subscribe();

        assert_eq!(observer.notify_logout(), 2);
        assert_eq!(a.try_recv(), Ok(LogoutNotice));
        assert_eq!(b.try_recv(), Ok(LogoutNotice));
        assert_eq!(a.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_notify_without_subscribers_is_fine() {
        let observer = SessionObserver::new();
        assert_eq!(observer.notify_logout(), 0);
    }

    #[test]
    fn test_late_subscriber_sees_only_future_notices() {
        let observer = SessionObserver::new();
        observer.notify_logout();
        let mut late = observer.subscribe();
        assert_eq!(late.try_recv(), Err(TryRecvError::Empty));
    }
}
