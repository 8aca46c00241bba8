//! Inbound host events and the mirror of host state they maintain.
//!
//! The host feed is opaque to the engine except through [`HostEvent`]. Every
//! event updates [`HostState`] even while tracking is suspended, so that
//! leaving idle or resuming from pause can re-derive tracking from the
//! signals as they are now rather than as they were when tracking stopped.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::types::{Settings, TabId, WindowId};

/// Which surface holds OS focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowFocus {
    /// A regular browser window.
    Window(WindowId),
    /// The tracker's own popup or options surface. Not a real focus loss.
    ExtensionSurface,
    /// The browser lost OS focus.
    None,
}

/// System idle state as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleState {
    Active,
    Idle,
    Locked,
}

impl IdleState {
    #[must_use]
    pub const fn is_idle(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// One tab as reported by a full host snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    pub tab_id: TabId,
    pub window_id: WindowId,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub audible: bool,
    #[serde(default)]
    pub video_playing: bool,
}

/// Complete host state, sent when the host (re)connects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSnapshot {
    pub focused_window: Option<WindowId>,
    #[serde(default)]
    pub tabs: Vec<TabSnapshot>,
}

/// Events consumed from the host feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum HostEvent {
    TabActivated {
        tab_id: TabId,
        window_id: WindowId,
    },
    WindowFocusChanged {
        focus: WindowFocus,
    },
    TabUrlChanged {
        tab_id: TabId,
        url: String,
    },
    TabAudibleChanged {
        tab_id: TabId,
        audible: bool,
    },
    TabRemoved {
        tab_id: TabId,
    },
    IdleStateChanged {
        state: IdleState,
    },
    VisibilityChanged {
        tab_id: TabId,
        visible: bool,
    },
    VideoPlayingChanged {
        tab_id: TabId,
        playing: bool,
    },
    SettingsChanged {
        settings: Settings,
    },
    /// The user paused tracking.
    Paused,
    /// The user resumed tracking.
    Resumed,
    /// Replace the mirrored host state wholesale.
    Snapshot {
        snapshot: HostSnapshot,
    },
}

impl HostEvent {
    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TabActivated { .. } => "tab_activated",
            Self::WindowFocusChanged { .. } => "window_focus_changed",
            Self::TabUrlChanged { .. } => "tab_url_changed",
            Self::TabAudibleChanged { .. } => "tab_audible_changed",
            Self::TabRemoved { .. } => "tab_removed",
            Self::IdleStateChanged { .. } => "idle_state_changed",
            Self::VisibilityChanged { .. } => "visibility_changed",
            Self::VideoPlayingChanged { .. } => "video_playing_changed",
            Self::SettingsChanged { .. } => "settings_changed",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Snapshot { .. } => "snapshot",
        }
    }
}

/// A signal that makes a non-focused tab eligible for background tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Visible,
    Audible,
    VideoPlaying,
}

/// Tabs currently carrying each background signal.
///
/// Membership is independent of whether the tab is tracked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalSets {
    visible: BTreeSet<TabId>,
    audible: BTreeSet<TabId>,
    video_playing: BTreeSet<TabId>,
}

impl SignalSets {
    fn set_for(&mut self, signal: Signal) -> &mut BTreeSet<TabId> {
        match signal {
            Signal::Visible => &mut self.visible,
            Signal::Audible => &mut self.audible,
            Signal::VideoPlaying => &mut self.video_playing,
        }
    }

    pub fn set(&mut self, signal: Signal, tab_id: TabId, on: bool) {
        let set = self.set_for(signal);
        if on {
            set.insert(tab_id);
        } else {
            set.remove(&tab_id);
        }
    }

    #[must_use]
    pub fn contains(&self, signal: Signal, tab_id: TabId) -> bool {
        match signal {
            Signal::Visible => self.visible.contains(&tab_id),
            Signal::Audible => self.audible.contains(&tab_id),
            Signal::VideoPlaying => self.video_playing.contains(&tab_id),
        }
    }

    /// Whether the tab carries at least one signal.
    #[must_use]
    pub fn any(&self, tab_id: TabId) -> bool {
        self.visible.contains(&tab_id)
            || self.audible.contains(&tab_id)
            || self.video_playing.contains(&tab_id)
    }

    /// Every tab carrying at least one signal.
    #[must_use]
    pub fn eligible_tabs(&self) -> BTreeSet<TabId> {
        self.visible
            .iter()
            .chain(&self.audible)
            .chain(&self.video_playing)
            .copied()
            .collect()
    }

    pub fn remove_tab(&mut self, tab_id: TabId) {
        self.visible.remove(&tab_id);
        self.audible.remove(&tab_id);
        self.video_playing.remove(&tab_id);
    }
}

/// Mirror of host state, fed by every inbound event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostState {
    focused_window: Option<WindowId>,
    active_tabs: HashMap<WindowId, TabId>,
    urls: HashMap<TabId, String>,
    signals: SignalSets,
}

impl HostState {
    /// The active tab of the focused window, if the browser has focus.
    #[must_use]
    pub fn focused_tab(&self) -> Option<TabId> {
        self.focused_window
            .and_then(|window| self.active_tabs.get(&window).copied())
    }

    #[must_use]
    pub const fn focused_window(&self) -> Option<WindowId> {
        self.focused_window
    }

    pub fn set_focused_window(&mut self, window: Option<WindowId>) {
        self.focused_window = window;
    }

    /// Records `tab_id` as the active tab of `window_id`.
    pub fn set_active_tab(&mut self, window_id: WindowId, tab_id: TabId) {
        // A tab lives in one window; drop a stale claim from another window.
        self.active_tabs
            .retain(|window, tab| *tab != tab_id || *window == window_id);
        self.active_tabs.insert(window_id, tab_id);
    }

    pub fn set_url(&mut self, tab_id: TabId, url: String) {
        self.urls.insert(tab_id, url);
    }

    #[must_use]
    pub fn url(&self, tab_id: TabId) -> Option<&str> {
        self.urls.get(&tab_id).map(String::as_str)
    }

    #[must_use]
    pub const fn signals(&self) -> &SignalSets {
        &self.signals
    }

    pub fn set_signal(&mut self, signal: Signal, tab_id: TabId, on: bool) {
        self.signals.set(signal, tab_id, on);
    }

    /// Forgets everything known about a closed tab.
    pub fn remove_tab(&mut self, tab_id: TabId) {
        self.urls.remove(&tab_id);
        self.active_tabs.retain(|_, tab| *tab != tab_id);
        self.signals.remove_tab(tab_id);
    }
}

impl From<HostSnapshot> for HostState {
    fn from(snapshot: HostSnapshot) -> Self {
        let mut state = Self {
            focused_window: snapshot.focused_window,
            ..Self::default()
        };
        for tab in snapshot.tabs {
            if tab.active {
                state.active_tabs.insert(tab.window_id, tab.tab_id);
            }
            if let Some(url) = tab.url {
                state.urls.insert(tab.tab_id, url);
            }
            state.signals.set(Signal::Visible, tab.tab_id, tab.visible);
            state.signals.set(Signal::Audible, tab.tab_id, tab.audible);
            state
                .signals
                .set(Signal::VideoPlaying, tab.tab_id, tab.video_playing);
        }
        state
    }
}
