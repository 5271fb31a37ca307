use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{FormAction, SyncController, SyncError};
use crate::connection::ConnectionEvent;
use crate::model::TagKey;
use crate::presenter::Presenter;

pub struct SyncSession<P> {
    pub controller: SyncController,
    pub presenter: P,
}

/// One lock guards the store, the pending actions and the rendered view.
pub type SharedSession<P> = Arc<Mutex<SyncSession<P>>>;

impl<P: Presenter> SyncSession<P> {
    pub fn new(controller: SyncController, presenter: P) -> Self {
        Self {
            controller,
            presenter,
        }
    }

    pub fn shared(self) -> SharedSession<P> {
        Arc::new(Mutex::new(self))
    }

    pub fn handle(&mut self, event: ConnectionEvent) {
        self.controller.handle(event, &mut self.presenter);
    }

    pub fn submit_form(&mut self, action: FormAction) -> Result<Uuid, SyncError> {
        self.controller.submit_form(action, &self.presenter)
    }

    pub fn edit_tile(&mut self, key: &TagKey) -> bool {
        self.controller.edit_tile(key, &mut self.presenter)
    }

    pub fn expire_stale(&mut self, now: Instant) -> usize {
        self.controller.expire_stale(now, &mut self.presenter)
    }
}

pub fn spawn_event_pump<P>(
    session: SharedSession<P>,
    events: Receiver<ConnectionEvent>,
) -> Result<JoinHandle<()>>
where
    P: Presenter + Send + 'static,
{
    thread::Builder::new()
        .name("tagdash-events".into())
        .spawn(move || {
            for event in events.iter() {
                session.lock().handle(event);
            }
            tracing::debug!("event pump finished");
        })
        .context("spawning event pump")
}
