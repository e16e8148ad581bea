//! Page drivers
//!
//! Each page runs one `select!` loop. That loop is the only place that feeds
//! the chant session and carries out its effects; background work reports
//! back through [`PageContext`] channels.

pub(crate) mod chanting;
pub(crate) mod chanting_complete;
pub(crate) mod chanting_result;
pub(crate) mod error;
pub(crate) mod menu;
pub(crate) mod order_confirm;
pub(crate) mod order_loading;
pub(crate) mod pickup;
pub(crate) mod waiting_room;

use crate::api::{ApiClient, MenuItem};
use crate::channel::{ChannelEvent, ChannelSettings, ConnectionState, Connector};
use crate::config::Config;
use crate::error::ApiError;
use crate::input::UserCommand;
use crate::navigation::Route;
use crate::sampler::{self, MicrophoneBackend, SamplerError};
use crate::session::{ChantSession, SessionEffect, SessionInput, SessionSettings};
use crate::speech::EngineFactory;
use crate::store::{AppStore, ConnectionBanner, MicStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How a page ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PageOutcome {
    Navigate(Route),
    Quit,
}

/// Result of work started on behalf of the chant session
#[derive(Debug)]
pub(crate) enum Background {
    Permission(Result<(), SamplerError>),
    Prompt(Result<String, ApiError>),
}

/// Background result stamped with the session it belongs to
#[derive(Debug)]
pub(crate) struct Tagged {
    generation: u64,
    background: Background,
}

/// Everything a page needs, shared across the route loop
pub(crate) struct PageContext {
    pub(crate) config: Arc<Config>,
    pub(crate) api: Arc<ApiClient>,
    pub(crate) store: AppStore,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) microphone: Arc<dyn MicrophoneBackend>,
    pub(crate) speech: EngineFactory,
    pub(crate) input: mpsc::UnboundedReceiver<UserCommand>,
    pub(crate) background: mpsc::UnboundedReceiver<Tagged>,
    background_tx: mpsc::UnboundedSender<Tagged>,
    session: ChantSession,
    generation: u64,
}

impl PageContext {
    pub(crate) fn new(
        config: Arc<Config>,
        api: Arc<ApiClient>,
        store: AppStore,
        connector: Arc<dyn Connector>,
        microphone: Arc<dyn MicrophoneBackend>,
        speech: EngineFactory,
        input: mpsc::UnboundedReceiver<UserCommand>,
    ) -> Self {
        let (background_tx, background) = mpsc::unbounded_channel();
        let session = ChantSession::new(SessionSettings::from_config(&config.chant));
        Self {
            config,
            api,
            store,
            connector,
            microphone,
            speech,
            input,
            background,
            background_tx,
            session,
            generation: 0,
        }
    }

    pub(crate) fn session(&self) -> &ChantSession {
        &self.session
    }

    /// Select a menu item and start a fresh chant session
    pub(crate) fn begin_session(&mut self, menu_item: MenuItem) {
        self.store.begin_session(menu_item);
        self.session = ChantSession::new(SessionSettings::from_config(&self.config.chant));
        self.generation += 1;
    }

    /// Feed the session and mirror its metrics into the store
    pub(crate) fn feed(&mut self, input: SessionInput) -> Vec<SessionEffect> {
        let effects = self.session.handle(input);
        self.store.mirror_chant(self.session.metrics());
        effects
    }

    /// Turn a background result into session input
    pub(crate) fn absorb(&mut self, tagged: Tagged) -> Vec<SessionEffect> {
        if tagged.generation != self.generation {
            debug!(
                generation = tagged.generation,
                current = self.generation,
                "Dropping result from a previous session"
            );
            return Vec::new();
        }

        match tagged.background {
            Background::Permission(result) => {
                let mic = match &result {
                    Ok(()) => MicStatus::Granted,
                    Err(SamplerError::Unsupported(_)) => MicStatus::Unsupported,
                    Err(SamplerError::PermissionDenied(_)) => MicStatus::Denied,
                };
                self.store.update_mic(|_| mic);
                self.feed(SessionInput::PermissionResolved {
                    granted: result.is_ok(),
                })
            }
            Background::Prompt(Ok(prompt)) => self.feed(SessionInput::PromptArrived(prompt)),
            Background::Prompt(Err(e)) => {
                warn!(error = %e, "Failed to fetch chant prompt");
                Vec::new()
            }
        }
    }

    /// Probe the microphone off the page loop
    pub(crate) fn request_permission(&self) {
        let backend = self.microphone.clone();
        let tx = self.background_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = sampler::request_permission(backend).await;
            let _ = tx.send(Tagged {
                generation,
                background: Background::Permission(result),
            });
        });
    }

    /// Ask the server for the chant text of the selected item
    pub(crate) fn fetch_prompt(&self) {
        let Some(menu_item) = self.store.snapshot().selected_menu else {
            warn!("No menu item selected, skipping prompt fetch");
            return;
        };
        let api = self.api.clone();
        let tx = self.background_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = api.fetch_chant(&menu_item.id).await;
            let _ = tx.send(Tagged {
                generation,
                background: Background::Prompt(result),
            });
        });
    }

    pub(crate) fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings::from_config(&self.config.channel)
    }

    /// Reflect a channel event in the connection banner
    pub(crate) fn note_channel_event(&self, event: &ChannelEvent) {
        let max_attempts = self.config.channel.max_attempts;
        self.store
            .update_banner(|current| next_banner(current, event, max_attempts));
    }
}

/// Banner shown after `event`, given the one currently shown
pub(crate) fn next_banner(
    current: &ConnectionBanner,
    event: &ChannelEvent,
    max_attempts: u32,
) -> ConnectionBanner {
    match event {
        ChannelEvent::StateChanged(ConnectionState::Connecting) => match current {
            ConnectionBanner::Reconnecting { .. } => current.clone(),
            _ => ConnectionBanner::Connecting,
        },
        ChannelEvent::StateChanged(ConnectionState::Open) => ConnectionBanner::Hidden,
        ChannelEvent::StateChanged(_) => current.clone(),
        ChannelEvent::Message(_) if *current == ConnectionBanner::Stale => ConnectionBanner::Hidden,
        ChannelEvent::Message(_) => current.clone(),
        ChannelEvent::Reconnecting { attempt, .. } => ConnectionBanner::Reconnecting {
            attempt: *attempt,
            max_attempts,
        },
        ChannelEvent::Stale => ConnectionBanner::Stale,
        ChannelEvent::TerminalDisconnect { .. } => ConnectionBanner::Lost,
    }
}
