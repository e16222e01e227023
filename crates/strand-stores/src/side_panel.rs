//! Side panel UI state

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Which screen the panel shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidePanelView {
    #[default]
    SourceList,
    SourceConfig,
    AuthProvider,
    Success,
}

/// What the panel is working on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelContext {
    pub collection_id: Option<String>,
    pub source_short_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidePanelState {
    pub is_open: bool,
    pub view: SidePanelView,
    pub context: PanelContext,
}

/// Observable side panel state; every change notifies subscribers
#[derive(Debug)]
pub struct SidePanelStore {
    state: watch::Sender<SidePanelState>,
}

impl SidePanelStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SidePanelState::default());
        Self { state }
    }

    pub fn state(&self) -> SidePanelState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SidePanelState> {
        self.state.subscribe()
    }

    /// Open on `view`, merging any context given
    pub fn open(&self, view: SidePanelView, context: PanelContext) {
        self.state.send_modify(|state| {
            state.is_open = true;
            state.view = view;
            if context.collection_id.is_some() {
                state.context.collection_id = context.collection_id;
            }
            if context.source_short_name.is_some() {
                state.context.source_short_name = context.source_short_name;
            }
        });
    }

    pub fn close(&self) {
        self.state.send_modify(|state| state.is_open = false);
    }

    pub fn set_view(&self, view: SidePanelView) {
        self.state.send_modify(|state| state.view = view);
    }

    pub fn reset(&self) {
        self.state.send_replace(SidePanelState::default());
    }
}

impl Default for SidePanelStore {
    fn default() -> Self {
        Self::new()
    }
}
