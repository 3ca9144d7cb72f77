use std::sync::atomic::{AtomicBool, Ordering};

use helflinq_core::Speaker;

/// A [`Speaker`] without audio output. Speech requests are only logged.
#[derive(Debug, Default)]
pub struct LoggingSpeaker {
    speaking: AtomicBool,
}

impl LoggingSpeaker {
    /// Creates a speaker that is silent.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` between a `speak` and the next `stop_speaking`.
    #[inline]
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Relaxed)
    }
}

impl Speaker for LoggingSpeaker {
    fn speak(&self, text: &str) {
        self.speaking.store(true, Ordering::Relaxed);
        info!(chars = text.chars().count(), "speaking response");
    }

    fn stop_speaking(&self) {
        if self.speaking.swap(false, Ordering::Relaxed) {
            debug!("speech stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaking_state() {
        let speaker = LoggingSpeaker::new();
        assert!(!speaker.is_speaking());
        speaker.speak("Hello");
        assert!(speaker.is_speaking());
        speaker.stop_speaking();
        assert!(!speaker.is_speaking());
    }
}
