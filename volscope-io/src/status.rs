//! Status reporting sink.

use std::fmt;
use std::sync::Arc;

type Callback = dyn Fn(&str) + Send + Sync;

/// Forwards human-readable progress and error lines to the caller.
///
/// Every message is also logged at info level. Cloning is cheap and all
/// clones share the same callback.
#[derive(Clone)]
pub struct StatusReporter {
    callback: Option<Arc<Callback>>,
}

impl StatusReporter {
    /// Creates a reporter that invokes `callback` for every message.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    /// Creates a reporter that only logs.
    #[must_use]
    pub fn silent() -> Self {
        Self { callback: None }
    }

    /// Publishes one message.
    pub fn report(&self, message: &str) {
        log::info!("{message}");
        if let Some(callback) = &self.callback {
            callback(message);
        }
    }
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::silent()
    }
}

impl fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusReporter")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_report_reaches_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let status = StatusReporter::new(move |msg| sink.lock().unwrap().push(msg.to_string()));

        status.report("first");
        status.clone().report("second");

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_silent_reporter() {
        let status = StatusReporter::default();
        status.report("nobody listens");
        assert_eq!(format!("{status:?}"), "StatusReporter { callback: false }");
    }
}
