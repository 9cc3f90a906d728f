use crate::catalog::Catalog;
use crate::model::{CancelReason, SessionId, Severity, SupervisorEvent};
use std::time::{Duration, Instant};

/// How long a notification stays on screen.
pub const NOTIFICATION_TTL: Duration = Duration::from_secs(3);

pub struct TileView {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub loading: bool,
}

pub struct NowPlaying {
    pub session: SessionId,
    pub target_id: String,
    pub display_name: String,
    pub pid: Option<u32>,
    /// Seen in the process table at least once.
    pub running: bool,
    /// False once the ceiling stopped supervision; the app may still be up.
    pub watched: bool,
    pub since: Instant,
}

pub struct Notification {
    pub message: String,
    pub severity: Severity,
    pub shown_at: Instant,
}

pub struct UiState {
    pub tiles: Vec<TileView>,
    pub selected: usize,
    pub show_help: bool,
    pub dev: bool,
    /// Status line; last informational message.
    pub info: String,
    pub now_playing: Option<NowPlaying>,
    pub notification: Option<Notification>,
}

impl UiState {
    pub fn from_catalog(catalog: &Catalog) -> Self {
        Self {
            tiles: catalog
                .tiles
                .iter()
                .map(|t| TileView {
                    id: t.id.clone(),
                    name: t.name.clone(),
                    icon: t.icon.clone(),
                    loading: false,
                })
                .collect(),
            selected: 0,
            show_help: false,
            dev: false,
            info: String::new(),
            now_playing: None,
            notification: None,
        }
    }

    pub fn selected_tile(&self) -> Option<&TileView> {
        self.tiles.get(self.selected)
    }

    /// Tile id for a 1-based number key.
    pub fn tile_at_number(&self, n: usize) -> Option<&str> {
        n.checked_sub(1)
            .and_then(|i| self.tiles.get(i))
            .map(|t| t.id.as_str())
    }

    /// Move the grid cursor, clamping at the edges.
    pub fn move_selection(&mut self, dx: isize, dy: isize, columns: usize) {
        if self.tiles.is_empty() {
            return;
        }
        let columns = columns.max(1) as isize;
        let last = self.tiles.len() as isize - 1;
        let cur = self.selected as isize;
        let col = cur % columns;
        let next = if dx != 0 {
            let target = col + dx;
            if target < 0 || target >= columns {
                cur
            } else {
                cur + dx
            }
        } else {
            cur + dy * columns
        };
        if (0..=last).contains(&next) {
            self.selected = next as usize;
        }
    }

    pub fn notify(&mut self, message: impl Into<String>, severity: Severity, now: Instant) {
        self.notification = Some(Notification {
            message: message.into(),
            severity,
            shown_at: now,
        });
    }

    pub fn expire_notification(&mut self, now: Instant) {
        if self
            .notification
            .as_ref()
            .is_some_and(|n| now.duration_since(n.shown_at) >= NOTIFICATION_TTL)
        {
            self.notification = None;
        }
    }

    fn set_loading(&mut self, tile_id: &str, loading: bool) {
        if let Some(t) = self.tiles.iter_mut().find(|t| t.id == tile_id) {
            t.loading = loading;
        }
    }

    fn for_session(&mut self, id: SessionId) -> Option<&mut NowPlaying> {
        self.now_playing.as_mut().filter(|np| np.session == id)
    }

    pub fn apply_event(&mut self, ev: SupervisorEvent, now: Instant) {
        match ev {
            SupervisorEvent::ShowPrimary => {
                self.now_playing = None;
            }
            SupervisorEvent::TileLoading { tile_id, loading } => {
                self.set_loading(&tile_id, loading);
            }
            SupervisorEvent::Notify { message, severity } => {
                self.notify(message, severity, now);
            }
            SupervisorEvent::SessionStarted {
                id,
                target_id,
                display_name,
                pid,
            } => {
                self.info = format!("Launching {display_name}…");
                self.now_playing = Some(NowPlaying {
                    session: id,
                    target_id,
                    display_name,
                    pid,
                    running: false,
                    watched: true,
                    since: now,
                });
            }
            SupervisorEvent::SessionRunning { id, .. } => {
                let name = self.for_session(id).map(|np| {
                    np.running = true;
                    np.display_name.clone()
                });
                if let Some(name) = name {
                    self.info = format!("{name} is running");
                }
            }
            SupervisorEvent::SessionConcluded { id, outcome, .. } => {
                let name = self.for_session(id).map(|np| np.display_name.clone());
                if let Some(name) = name {
                    self.info = format!("{name} finished ({outcome:?})");
                    self.now_playing = None;
                }
            }
            SupervisorEvent::SessionCancelled { id, reason, .. } => match reason {
                CancelReason::Ceiling => {
                    let name = self.for_session(id).map(|np| {
                        np.watched = false;
                        np.display_name.clone()
                    });
                    if let Some(name) = name {
                        self.info = format!("Stopped watching {name}");
                    }
                }
                CancelReason::User | CancelReason::Shutdown => {
                    if self.for_session(id).is_some() {
                        self.now_playing = None;
                    }
                }
                // The replacing session's SessionStarted takes over.
                CancelReason::Superseded => {}
            },
            SupervisorEvent::Info(msg) => {
                self.info = msg;
            }
        }
    }
}
