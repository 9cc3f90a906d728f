//! Restoring the launcher once a session is over.

use crate::model::{LaunchRequest, Outcome, SessionId, Severity, SupervisorEvent};
use tokio::sync::mpsc::UnboundedSender;

/// Presentation-side operations the supervisor needs.
pub trait UiSurface: Send {
    fn show_primary(&mut self);
    fn set_tile_loading(&mut self, tile_id: &str, loading: bool);
    fn notify(&mut self, message: &str, severity: Severity);
}

/// Forwards surface calls as events to whichever layer renders them.
#[derive(Clone)]
pub struct ChannelSurface {
    tx: UnboundedSender<SupervisorEvent>,
}

impl ChannelSurface {
    pub fn new(tx: UnboundedSender<SupervisorEvent>) -> Self {
        Self { tx }
    }
}

impl UiSurface for ChannelSurface {
    fn show_primary(&mut self) {
        let _ = self.tx.send(SupervisorEvent::ShowPrimary);
    }

    fn set_tile_loading(&mut self, tile_id: &str, loading: bool) {
        let _ = self.tx.send(SupervisorEvent::TileLoading {
            tile_id: tile_id.to_string(),
            loading,
        });
    }

    fn notify(&mut self, message: &str, severity: Severity) {
        let _ = self.tx.send(SupervisorEvent::Notify {
            message: message.to_string(),
            severity,
        });
    }
}

/// Applies outcomes to the surface, at most once per session.
///
/// Session ids only grow, so remembering the newest reconciled id is enough
/// to refuse that session and every older one.
pub struct Reconciler<U> {
    surface: U,
    last_concluded: Option<SessionId>,
}

impl<U: UiSurface> Reconciler<U> {
    pub fn new(surface: U) -> Self {
        Self {
            surface,
            last_concluded: None,
        }
    }

    pub fn surface_mut(&mut self) -> &mut U {
        &mut self.surface
    }

    /// Start observed: the tile no longer needs its loading indicator.
    pub fn started(&mut self, request: &LaunchRequest) {
        self.surface.set_tile_loading(&request.target_id, false);
    }

    /// Returns false if this session was already reconciled.
    pub fn conclude(&mut self, id: SessionId, request: &LaunchRequest, outcome: Outcome) -> bool {
        if !outcome.is_terminal() || self.last_concluded.is_some_and(|last| id <= last) {
            return false;
        }
        self.last_concluded = Some(id);
        self.surface.show_primary();
        self.surface.set_tile_loading(&request.target_id, false);
        match outcome {
            Outcome::StartupTimeout => self.surface.notify(
                &format!("{} did not start", request.display_name),
                Severity::Error,
            ),
            Outcome::SpawnError => self.surface.notify(
                &format!("Failed to launch {}", request.display_name),
                Severity::Error,
            ),
            Outcome::Ended | Outcome::Started => {}
        }
        true
    }
}
