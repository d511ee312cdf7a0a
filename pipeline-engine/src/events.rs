// Change Events
// Per-step boundary notifications emitted by the scheduler

use crate::data::OutputBag;

use tokio::sync::mpsc;

/// Sender half for change events.
pub type ChangeSender = mpsc::UnboundedSender<ChangeEvent>;

/// Receiver half for change events.
pub type ChangeReceiver = mpsc::UnboundedReceiver<ChangeEvent>;

/// Create a new change-event channel.
pub fn change_channel() -> (ChangeSender, ChangeReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Start,
    End,
}

/// Emitted at each step boundary: `Start` before the step body runs,
/// `End` with the published bag after a successful publication.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub step_name: String,
    pub data: Option<OutputBag>,
}

impl ChangeEvent {
    pub fn start(step_name: &str) -> Self {
        Self {
            kind: ChangeKind::Start,
            step_name: step_name.to_string(),
            data: None,
        }
    }

    pub fn end(step_name: &str, data: OutputBag) -> Self {
        Self {
            kind: ChangeKind::End,
            step_name: step_name.to_string(),
            data: Some(data),
        }
    }
}

/// Fire-and-forget sending: a disconnected or absent listener never
/// disturbs the scheduler.
pub trait ChangeNotifier {
    fn notify(&self, event: ChangeEvent);
}

impl ChangeNotifier for ChangeSender {
    fn notify(&self, event: ChangeEvent) {
        let _ = self.send(event);
    }
}

impl ChangeNotifier for Option<ChangeSender> {
    fn notify(&self, event: ChangeEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
