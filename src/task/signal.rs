/*!
 * Per-task control channel.
 *
 * The controller holds the sending half and the scheduler the receiving half
 * of a `watch` channel, so a pause or stop wakes a sleeping scheduler
 * immediately instead of being polled.
 */

use tokio::sync::watch;

use super::models::StopOutcome;

/// Request from the controller to a running scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlSignal {
    /// Keep dispatching batches
    #[default]
    Continue,
    /// Suspend before the next batch
    Pause,
    /// Finalize with the given outcome before the next batch
    Stop(StopOutcome),
}

impl ControlSignal {
    /// Whether a stop has been requested
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop(_))
    }
}

/// Sending half, owned by the controller
pub type SignalSender = watch::Sender<ControlSignal>;

/// Receiving half, owned by the scheduler
pub type SignalReceiver = watch::Receiver<ControlSignal>;

/// Create a channel starting at `Continue`
pub fn channel() -> (SignalSender, SignalReceiver) {
    watch::channel(ControlSignal::Continue)
}

/// Replace the signal unless a stop is already pending
///
/// Returns whether the value changed.
pub fn request(sender: &SignalSender, signal: ControlSignal) -> bool {
    sender.send_if_modified(|current| {
        if current.is_stop() || *current == signal {
            return false;
        }
        *current = signal;
        true
    })
}
