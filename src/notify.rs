/// Fire-and-forget local user notification.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Writes notifications to the log; used when no OS sink is wired in.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        log::warn!("[notification] {title}: {message}");
    }
}
