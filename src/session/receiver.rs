//! Background receive loop.
//!
//! Owns the receive half of the current connection and feeds every frame to
//! the [`Dispatcher`]. New connections arrive over a channel; the loop exits
//! on the shutdown signal or when the session is dropped.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use super::dispatcher::Dispatcher;
use super::manager::{SessionInner, SessionManager};
use super::transport::{MessageStream, TransportError};

pub(crate) struct ReceiverLoop {
    pub session: Weak<SessionInner>,
    pub dispatcher: Dispatcher,
    pub streams: mpsc::UnboundedReceiver<Box<dyn MessageStream>>,
    pub shutdown: watch::Receiver<bool>,
    pub retry_interval: Duration,
}

impl ReceiverLoop {
    pub async fn run(mut self) {
        let mut current: Option<Box<dyn MessageStream>> = None;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                next = self.streams.recv() => match next {
                    Some(stream) => {
                        debug!("Receiver attached to new connection");
                        current = Some(stream);
                    }
                    None => break,
                },
                received = receive_next(&mut current) => match received {
                    Ok(text) => {
                        self.dispatcher.dispatch_text(&text);
                    }
                    Err(e) => {
                        current = None;
                        on_receive_error(self.session.clone(), e).await;
                        tokio::time::sleep(self.retry_interval).await;
                    }
                },
            }
        }

        info!("Receiver loop stopped");
    }
}

async fn on_receive_error(session: Weak<SessionInner>, error: TransportError) {
    let Some(inner) = session.upgrade() else {
        return;
    };
    let session = SessionManager::from_inner(inner);
    if session.is_connected() {
        session.disable_completely(Some(&error)).await;
    } else {
        debug!(session_id = %session.session_id(), error = %error, "Receive error while not connected");
    }
}

async fn receive_next(
    current: &mut Option<Box<dyn MessageStream>>,
) -> Result<String, TransportError> {
    match current {
        Some(stream) => stream.receive().await,
        None => std::future::pending().await,
    }
}
