//! # Agent wiring.
//!
//! Builds one [`Session`] per configured broker plus the [`Dispatcher`], and
//! exposes the two entry points the binary needs.
//!
//! Start order: worker pool, session registration, sessions, monitors.
//! Stop order: sessions first (each closes its inbound channel only after its
//! connection has quiesced), then the dispatcher's own ordered shutdown.

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::session::{Publisher, Session, SessionConfig};
use crate::utils::error::DispatchError;

pub struct Agent {
    sessions: Vec<Session>,
    dispatcher: Dispatcher,
    message_prefix: String,
}

impl Agent {
    /// Builds the agent from loaded settings.
    ///
    /// A broker with an invalid configuration is logged and skipped; the
    /// remaining brokers are unaffected.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut sessions = Vec::with_capacity(settings.mqtt.len());
        for (alias, broker) in &settings.mqtt {
            let config = SessionConfig::from_settings(alias, broker, &settings.agent);
            match Session::initialize(config) {
                Ok(session) => sessions.push(session),
                Err(err) => {
                    error!(session = %alias, label = err.as_label(), "{err}; session skipped")
                }
            }
        }
        if sessions.is_empty() {
            warn!("no usable broker sessions configured");
        }

        let dispatcher = Dispatcher::new(DispatcherConfig::from(&settings.dispatcher));
        Self::new(sessions, dispatcher, settings.agent.message_prefix.clone())
    }

    pub fn new(sessions: Vec<Session>, dispatcher: Dispatcher, message_prefix: String) -> Self {
        Self {
            sessions,
            dispatcher,
            message_prefix,
        }
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session(&self, name: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.name() == name)
    }

    /// Publish handle for the named session.
    pub fn publisher(&self, name: &str) -> Option<Publisher> {
        self.session(name).map(Session::publisher)
    }

    /// Prefix of the application topic, for [`Publisher::publish_application`].
    pub fn message_prefix(&self) -> &str {
        &self.message_prefix
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn start(&mut self) -> Result<(), DispatchError> {
        self.dispatcher.run()?;
        for session in &mut self.sessions {
            if let Some(inbound) = session.take_inbound() {
                self.dispatcher.register(session.name(), inbound)?;
            }
            session.start();
        }
        self.dispatcher.start()?;
        info!(sessions = self.sessions.len(), "agent started");
        Ok(())
    }

    pub async fn stop(&mut self) {
        join_all(self.sessions.iter_mut().map(|session| session.stop())).await;
        self.dispatcher.stop().await;
        info!("agent stopped");
    }
}
