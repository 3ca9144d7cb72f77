//! Hooks for reading responses aloud.

/// Receives speech requests from the coordinator.
///
/// Both calls are notifications: they must return quickly and must not
/// fail. Playback itself is up to the implementor.
pub trait Speaker: Send + Sync {
    /// Starts speaking `text`.
    fn speak(&self, text: &str);

    /// Stops any ongoing speech immediately.
    fn stop_speaking(&self);
}
