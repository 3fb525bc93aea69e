//! Session lifecycle: bounded-retry connect, health probe and
//! expunge-on-close.
//!
//! A [`ConnectionManager`] owns at most one open [`MailStream`]. Connecting
//! is idempotent, and the session is closed (with expunge) exactly once,
//! either explicitly through [`ConnectionManager::close`] or on drop.

use std::sync::Arc;

use crate::config::{ConnectionTarget, MailboxConfig};
use crate::error::{MailError, MailResult};
use crate::report::{self, Arg};
use crate::transport::{MailStream, MailTransport};

/// An open, probed session.
struct Session {
    stream: Box<dyn MailStream>,
    target: ConnectionTarget,
}

/// Owns the transport, the resolved configuration and the live session.
pub struct ConnectionManager<T: MailTransport> {
    transport: T,
    config: Arc<MailboxConfig>,
    session: Option<Session>,
}

impl<T: MailTransport> ConnectionManager<T> {
    pub fn new(config: impl Into<Arc<MailboxConfig>>, transport: T) -> Self {
        Self {
            transport,
            config: config.into(),
            session: None,
        }
    }

    pub fn config(&self) -> &MailboxConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Target of the live session, if any.
    pub fn target(&self) -> Option<&ConnectionTarget> {
        self.session.as_ref().map(|s| &s.target)
    }

    /// Open and probe a session, retrying up to `retry` times (at least once).
    ///
    /// A no-op when already connected. Every failed attempt, whether the
    /// open itself failed or the probe found the session unusable, is
    /// folded into the final [`MailError::Connect`].
    pub fn connect(&mut self) -> MailResult<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let target = self.config.target();
        let attempts = self.config.attempts();
        let mut diagnostic = String::new();

        for attempt in 1..=attempts {
            match self.try_open(&target) {
                Ok(stream) => {
                    tracing::info!(mailbox = %target, attempt, "connected to mailbox");
                    self.session = Some(Session { stream, target });
                    return Ok(());
                }
                Err(reason) => {
                    tracing::debug!(mailbox = %target, attempt, attempts, reason = %reason, "connection attempt failed");
                    diagnostic = reason;
                }
            }
        }

        let message = report::format(
            "Unable to get imap_thread after %s retries. %s",
            &[Arg::from(attempts), Arg::from(diagnostic)],
        );
        let err = MailError::Connect { message, attempts };
        tracing::error!(mailbox = %target, error = %err, "giving up on mailbox connection");
        Err(err)
    }

    /// One attempt: open, then probe. Returns the diagnostic on failure.
    fn try_open(&mut self, target: &ConnectionTarget) -> Result<Box<dyn MailStream>, String> {
        let mut stream = self
            .transport
            .open(target, &self.config.username, &self.config.password)
            .map_err(|e| self.diagnostic(&e.message))?;

        match stream.probe() {
            Ok(Some(_)) => Ok(stream),
            Ok(None) => {
                let reason = self.diagnostic("thread probe returned nothing");
                discard(stream.as_mut());
                Err(reason)
            }
            Err(e) => {
                let reason = self.diagnostic(&e.message);
                discard(stream.as_mut());
                Err(reason)
            }
        }
    }

    /// Combine a failure with the transport's own last error, when it adds
    /// something.
    fn diagnostic(&self, failure: &str) -> String {
        match self.transport.last_error() {
            Some(last) if !last.is_empty() && last != failure => format!("{failure} {last}"),
            _ => failure.to_string(),
        }
    }

    /// The live stream, or [`MailError::NotConnected`].
    pub fn stream(&mut self) -> MailResult<&mut dyn MailStream> {
        match self.session.as_mut() {
            Some(session) => Ok(session.stream.as_mut()),
            None => Err(MailError::NotConnected),
        }
    }

    /// Expunge deleted messages and close the session. Safe to call twice.
    pub fn close(&mut self) -> MailResult<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        tracing::info!(mailbox = %session.target, "closing mailbox session");
        session.stream.close(true)?;
        Ok(())
    }
}

/// Close a stream that failed its probe, without expunging.
fn discard(stream: &mut dyn MailStream) {
    if let Err(e) = stream.close(false) {
        tracing::debug!(error = %e, "closing unusable session failed");
    }
}

impl<T: MailTransport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "mailbox close on drop failed");
        }
    }
}

impl<T: MailTransport> std::fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("target", &self.config.target().to_string())
            .field("connected", &self.is_connected())
            .finish()
    }
}
