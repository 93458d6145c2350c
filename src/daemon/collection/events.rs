use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type TabId = i64;
pub type WindowId = i64;

/// Snapshot of a tab as queried by the extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub tab_id: TabId,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdleState {
    Active,
    Idle,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TabStatus {
    Loading,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestAction {
    GetTimeData,
    SaveTimeData,
    ClearTimeDataCache,
    UpdateTimeDataCache,
    ImportTimeData,
}

/// A message received from the browser extension. The extension forwards its event listeners
/// and the requests of its pages through the native messaging port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    TabActivated {
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
    },
    TabUpdated {
        tab_id: TabId,
        status: TabStatus,
        #[serde(default)]
        url: Option<String>,
    },
    /// `window_id` is `None` when no browser window has focus.
    WindowFocusChanged {
        #[serde(default)]
        window_id: Option<WindowId>,
        #[serde(default)]
        active_tab: Option<TabInfo>,
    },
    IdleStateChanged {
        state: IdleState,
    },
    Startup {
        #[serde(default)]
        active_tab: Option<TabInfo>,
    },
    Suspend,
    AllWindowsClosed,
    Request {
        id: u64,
        action: RequestAction,
        #[serde(default)]
        data: Option<Value>,
    },
}

/// Input of the [Reconciler](crate::daemon::accounting::reconciler::Reconciler). This is the
/// closed set of transitions the accounting state machine understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    TabActivated { tab_id: TabId, url: Option<String> },
    NavigationCompleted { tab_id: TabId, url: Option<String> },
    FocusLost,
    FocusGained { active_tab: Option<TabInfo> },
    /// The extension started and reports the tab that is already active.
    Startup { active_tab: Option<TabInfo> },
    IdleChanged(IdleState),
    /// Periodic flush point. Settles pending time without changing state.
    Tick,
    /// Suspension, shutdown or the last window closing.
    Suspend,
}

/// Result of routing an [InboundMessage].
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Event(EngineEvent),
    Request {
        id: u64,
        action: RequestAction,
        data: Option<Value>,
    },
    /// Messages that carry nothing for the engine, like a page starting to load.
    Ignored,
}

impl From<InboundMessage> for Routed {
    fn from(value: InboundMessage) -> Self {
        match value {
            InboundMessage::TabActivated { tab_id, url } => {
                Routed::Event(EngineEvent::TabActivated { tab_id, url })
            }
            InboundMessage::TabUpdated {
                tab_id,
                status: TabStatus::Complete,
                url,
            } => Routed::Event(EngineEvent::NavigationCompleted { tab_id, url }),
            InboundMessage::TabUpdated { .. } => Routed::Ignored,
            InboundMessage::WindowFocusChanged {
                window_id: None, ..
            } => Routed::Event(EngineEvent::FocusLost),
            InboundMessage::WindowFocusChanged {
                window_id: Some(_),
                active_tab,
            } => Routed::Event(EngineEvent::FocusGained { active_tab }),
            InboundMessage::IdleStateChanged { state } => {
                Routed::Event(EngineEvent::IdleChanged(state))
            }
            InboundMessage::Startup { active_tab } => {
                Routed::Event(EngineEvent::Startup { active_tab })
            }
            InboundMessage::Suspend | InboundMessage::AllWindowsClosed => {
                Routed::Event(EngineEvent::Suspend)
            }
            InboundMessage::Request { id, action, data } => Routed::Request { id, action, data },
        }
    }
}
