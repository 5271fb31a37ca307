use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::codec::{self, CodecError, ServerEvent, UpdateType};
use crate::connection::{ConnectionEvent, Outbox, SendTicket};
use crate::model::{Tag, TagFields, TagKey};
use crate::presenter::{Notification, Presenter};
use crate::store::{InsertOutcome, TagStore};

pub mod pending;
pub mod session;

pub use pending::{Origin, PendingAction, PendingKind, PendingRegistry, UpdatePhase};
pub use session::{spawn_event_pump, SharedSession, SyncSession};

const GENERIC_ERROR: &str = "Something went wrong";

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("no tile for {0}")]
    UnknownTile(TagKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Interrupted { reason: String },
    Offline { attempts: u32 },
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => f.write_str("connecting"),
            ConnectionStatus::Open => f.write_str("connected"),
            ConnectionStatus::Interrupted { reason } => write!(f, "reconnecting ({reason})"),
            ConnectionStatus::Offline { attempts } => {
                write!(f, "offline after {attempts} retries")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormAction {
    Add,
    Delete,
    Update { original: TagKey },
}

impl PendingKind {
    fn update_type(self) -> UpdateType {
        match self {
            PendingKind::Add => UpdateType::Add,
            PendingKind::Delete => UpdateType::Delete,
        }
    }
}

pub struct SyncController {
    store: TagStore,
    pending: PendingRegistry,
    tickets: HashMap<Uuid, SendTicket>,
    outbox: Box<dyn Outbox>,
    pending_timeout: Duration,
    status: ConnectionStatus,
    synced: bool,
    carried: Vec<Uuid>,
}

impl SyncController {
    pub fn new(outbox: Box<dyn Outbox>, pending_timeout: Duration) -> Self {
        Self {
            store: TagStore::new(),
            pending: PendingRegistry::new(),
            tickets: HashMap::new(),
            outbox,
            pending_timeout,
            status: ConnectionStatus::Connecting,
            synced: false,
            carried: Vec::new(),
        }
    }

    pub fn store(&self) -> &TagStore {
        &self.store
    }

    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// True once a retrieval has been applied since the channel last opened.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn handle<P: Presenter + ?Sized>(&mut self, event: ConnectionEvent, presenter: &mut P) {
        match event {
            ConnectionEvent::Opened => self.on_open(presenter),
            ConnectionEvent::Received(raw) => self.on_frame(&raw, presenter),
            ConnectionEvent::Errored(reason) => {
                tracing::warn!(%reason, "connection error");
                presenter.show_notification(Notification::connection(format!(
                    "Connection error: {reason}"
                )));
                self.status = ConnectionStatus::Interrupted { reason };
            }
            ConnectionEvent::Closed => {
                tracing::warn!("connection closed");
                presenter.show_notification(Notification::connection("Disconnected"));
                self.status = ConnectionStatus::Interrupted {
                    reason: "closed".into(),
                };
            }
            ConnectionEvent::GaveUp { attempts } => {
                tracing::error!(attempts, "connection abandoned");
                presenter.show_notification(Notification::connection(format!(
                    "Offline after {attempts} reconnect attempt(s)"
                )));
                self.status = ConnectionStatus::Offline { attempts };
            }
        }
    }

    pub fn request_retrieval(&mut self) -> Result<(), SyncError> {
        let frame = codec::encode_retrieve()?;
        self.outbox.enqueue(frame);
        Ok(())
    }

    pub fn submit_add(&mut self, fields: TagFields) -> Result<Uuid, SyncError> {
        self.send_tracked(PendingKind::Add, fields, Origin::Direct)
    }

    pub fn submit_delete(&mut self, fields: TagFields) -> Result<Uuid, SyncError> {
        self.send_tracked(PendingKind::Delete, fields, Origin::Direct)
    }

    /// Sends delete(original) then add(edited). Returns the update group.
    pub fn submit_update(&mut self, original: Tag, edited: TagFields) -> Result<Uuid, SyncError> {
        let group = self.pending.begin_update(original.clone());
        let delete = Origin::Update {
            group,
            phase: UpdatePhase::Delete,
        };
        if let Err(err) = self.send_tracked(PendingKind::Delete, original, delete) {
            self.pending.forget_update(&group);
            return Err(err);
        }
        let add = Origin::Update {
            group,
            phase: UpdatePhase::Add,
        };
        self.send_tracked(PendingKind::Add, edited, add)?;
        Ok(group)
    }

    pub fn submit_form<P: Presenter + ?Sized>(
        &mut self,
        action: FormAction,
        presenter: &P,
    ) -> Result<Uuid, SyncError> {
        let fields = presenter.read_form_fields();
        match action {
            FormAction::Add => self.submit_add(fields),
            FormAction::Delete => self.submit_delete(fields),
            FormAction::Update { original } => {
                let original = self
                    .store
                    .get(&original)
                    .cloned()
                    .ok_or(SyncError::UnknownTile(original))?;
                self.submit_update(original, fields)
            }
        }
    }

    pub fn edit_tile<P: Presenter + ?Sized>(&self, key: &TagKey, presenter: &mut P) -> bool {
        match self.store.get(key) {
            Some(tag) => {
                presenter.populate_form(tag);
                true
            }
            None => false,
        }
    }

    pub fn expire_stale<P: Presenter + ?Sized>(&mut self, now: Instant, presenter: &mut P) -> usize {
        let stale = self.pending.stale(now, self.pending_timeout);
        for token in &stale {
            let Some(action) = self.pending.take(token) else {
                continue;
            };
            if let Some(ticket) = self.tickets.remove(token) {
                ticket.cancel();
            }
            tracing::warn!(
                kind = ?action.kind,
                tag = %action.key,
                "no confirmation within timeout"
            );
            presenter.show_notification(Notification::error(format!(
                "No confirmation for {} of {}",
                action.kind.update_type(),
                action.tag.epc
            )));
            self.fail(action, presenter);
        }
        stale.len()
    }

    fn send_tracked(
        &mut self,
        kind: PendingKind,
        tag: Tag,
        origin: Origin,
    ) -> Result<Uuid, SyncError> {
        let frame = codec::encode(kind.update_type(), &tag)?;
        tracing::debug!(?kind, tile = %tag.tile_id(), ?origin, "submitting");
        let token = self.pending.register(kind, tag, origin);
        let ticket = self.outbox.enqueue(frame);
        self.tickets.insert(token, ticket);
        Ok(token)
    }

    fn on_open<P: Presenter + ?Sized>(&mut self, presenter: &mut P) {
        tracing::info!(pending = self.pending.len(), "session open, resyncing");
        self.status = ConnectionStatus::Open;
        self.synced = false;
        self.carried = self.pending.iter().map(|action| action.token).collect();
        self.store.clear();
        presenter.clear_tiles();
        presenter.show_notification(Notification::connection("Connected"));
        if let Err(err) = self.request_retrieval() {
            tracing::error!(%err, "failed to request tag list");
        }
    }

    fn on_frame<P: Presenter + ?Sized>(&mut self, raw: &str, presenter: &mut P) {
        match codec::decode(raw) {
            Ok(event) => self.apply(event, presenter),
            Err(err) => {
                tracing::warn!(%err, "discarding malformed frame");
                self.on_server_error(presenter);
            }
        }
    }

    fn apply<P: Presenter + ?Sized>(&mut self, event: ServerEvent, presenter: &mut P) {
        match event {
            ServerEvent::Added(tag) => self.on_added(tag, presenter),
            ServerEvent::Deleted(tag) => self.on_deleted(tag, presenter),
            ServerEvent::Retrieval(tags) => {
                tracing::info!(count = tags.len(), "tag list received");
                for tag in tags {
                    presenter.render_tile(&tag);
                    self.store.insert(tag);
                }
                self.synced = true;
                self.settle_carried(presenter);
            }
            ServerEvent::Error => self.on_server_error(presenter),
        }
    }

    fn on_added<P: Presenter + ?Sized>(&mut self, tag: Tag, presenter: &mut P) {
        let key = tag.key();
        let tile = presenter.render_tile(&tag);
        if self.store.insert(tag) == InsertOutcome::Replaced {
            tracing::debug!(%tile, "re-rendered existing tile");
        }

        let Some(action) = self.settle(PendingKind::Add, &key) else {
            tracing::debug!(%tile, "add from another client");
            return;
        };
        self.report_added(action, presenter);
    }

    fn report_added<P: Presenter + ?Sized>(&mut self, action: PendingAction, presenter: &mut P) {
        let epc = &action.tag.epc;
        let text = match action.origin {
            Origin::Update { group, .. } => {
                self.pending.forget_update(&group);
                format!("Updated a tag: {epc}")
            }
            Origin::Restore => format!("Restored a tag: {epc}"),
            Origin::Direct => format!("Added a tag: {epc}"),
        };
        presenter.show_notification(Notification::success(text));
    }

    fn on_deleted<P: Presenter + ?Sized>(&mut self, tag: Tag, presenter: &mut P) {
        let key = tag.key();
        if self.store.remove(&key).is_none() {
            tracing::debug!(tile = %key.tile_id(), "delete for unknown tile");
        }
        presenter.remove_tile(&key);

        let Some(action) = self.settle(PendingKind::Delete, &key) else {
            return;
        };
        self.report_deleted(action, presenter);
    }

    fn report_deleted<P: Presenter + ?Sized>(&mut self, action: PendingAction, presenter: &mut P) {
        match action.origin {
            Origin::Update { group, .. } => {
                tracing::debug!(%group, "edit delete half confirmed");
                self.pending.confirm_update_delete(&group);
            }
            Origin::Direct | Origin::Restore => {
                presenter.show_notification(Notification::success(format!(
                    "Deleted a tag: {}",
                    action.tag.epc
                )));
            }
        }
    }

    fn on_server_error<P: Presenter + ?Sized>(&mut self, presenter: &mut P) {
        presenter.show_notification(Notification::error(GENERIC_ERROR));
        let Some(action) = self.pending.take_oldest() else {
            return;
        };
        self.tickets.remove(&action.token);
        tracing::warn!(kind = ?action.kind, tag = %action.key, "server rejected action");
        self.fail(action, presenter);
    }

    fn fail<P: Presenter + ?Sized>(&mut self, action: PendingAction, presenter: &mut P) {
        match action.origin {
            Origin::Direct => {}
            Origin::Update {
                group,
                phase: UpdatePhase::Delete,
            } => {
                tracing::debug!(%group, "edit delete half failed, original kept");
            }
            Origin::Update {
                group,
                phase: UpdatePhase::Add,
            } => {
                let Some(original) = self.pending.finish_update(&group) else {
                    return;
                };
                presenter.show_notification(Notification::warning(format!(
                    "Edit failed, restoring tag: {}",
                    original.epc
                )));
                if let Err(err) = self.send_tracked(PendingKind::Add, original, Origin::Restore) {
                    tracing::error!(%err, "failed to restore original tag");
                }
            }
            Origin::Restore => {
                presenter.show_notification(Notification::error(format!(
                    "Could not restore tag: {}",
                    action.tag.epc
                )));
            }
        }
    }

    // Frames sent on a lost channel are never echoed. The first retrieval
    // after reopening settles them: an add is done if listed, a delete if not.
    fn settle_carried<P: Presenter + ?Sized>(&mut self, presenter: &mut P) {
        for token in std::mem::take(&mut self.carried) {
            let Some(action) = self.pending.take(&token) else {
                continue;
            };
            if let Some(ticket) = self.tickets.remove(&token) {
                ticket.cancel();
            }
            let listed = self.store.contains(&action.key);
            match (action.kind, listed) {
                (PendingKind::Add, true) => self.report_added(action, presenter),
                (PendingKind::Delete, false) => self.report_deleted(action, presenter),
                _ => {
                    tracing::warn!(
                        kind = ?action.kind,
                        tag = %action.key,
                        "action lost with the previous connection"
                    );
                    presenter.show_notification(Notification::error(format!(
                        "Lost {} of {} on reconnect",
                        action.kind.update_type(),
                        action.tag.epc
                    )));
                    self.fail(action, presenter);
                }
            }
        }
    }

    fn settle(&mut self, kind: PendingKind, key: &TagKey) -> Option<PendingAction> {
        let action = self.pending.take_matching(kind, key)?;
        self.tickets.remove(&action.token);
        Some(action)
    }
}


#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::testing::{inbound, RecordingOutbox, RecordingPresenter};
    use super::*;
    use crate::presenter::NotificationKind;

    fn tag(epc: &str, read_data: &str) -> Tag {
        Tag::new(epc, "0000", "16", "80", read_data)
    }

    fn controller() -> (SyncController, RecordingOutbox, RecordingPresenter) {
        let outbox = RecordingOutbox::default();
        let controller = SyncController::new(Box::new(outbox.clone()), Duration::from_secs(5));
        (controller, outbox, RecordingPresenter::default())
    }

    fn receive(controller: &mut SyncController, presenter: &mut RecordingPresenter, raw: String) {
        controller.handle(ConnectionEvent::Received(raw), presenter);
    }

    #[test]
    fn open_clears_view_and_requests_full_state() {
        let (mut controller, outbox, mut presenter) = controller();
        receive(&mut controller, &mut presenter, inbound("add", &tag("AA", "1")));
        controller.handle(ConnectionEvent::Opened, &mut presenter);

        assert!(controller.store().is_empty());
        assert_eq!(presenter.cleared, 1);
        assert_eq!(controller.status(), &ConnectionStatus::Open);
        let frames = outbox.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["updateType"], "retrieve");
        assert!(!controller.is_pending());
        assert!(!controller.is_synced());
    }

    #[test]
    fn retrieval_with_null_tags_changes_nothing() {
        let (mut controller, _outbox, mut presenter) = controller();
        receive(
            &mut controller,
            &mut presenter,
            r#"{"UpdateType":"retrieval","Tags":null}"#.into(),
        );
        assert!(controller.store().is_empty());
        assert!(presenter.rendered.is_empty());
        assert!(presenter.notifications.is_empty());
        assert!(controller.is_synced());
    }

    #[test]
    fn retrieval_renders_each_listed_tag_once() {
        let (mut controller, _outbox, mut presenter) = controller();
        let raw = r#"{"UpdateType":"retrieval","Tags":[
            {"EPC":"AA","Length":"16","EPCLengthBits":"80","PCBits":"0000","ReadData":"1111"},
            {"EPC":"BB","Length":"16","EPCLengthBits":"80","PCBits":"0000","ReadData":"2222"}
        ]}"#;
        receive(&mut controller, &mut presenter, raw.into());

        let store = controller.store();
        assert_eq!(store.len(), 2);
        assert!(store.contains(&tag("AA", "1111").key()));
        assert!(store.contains(&tag("BB", "2222").key()));
        assert_eq!(
            presenter.rendered,
            vec![tag("AA", "1111").key(), tag("BB", "2222").key()]
        );
        assert!(!controller.is_pending());
        assert!(presenter.notifications.is_empty());
    }

    #[test]
    fn add_confirmation_resolves_pending_and_inserts_once() -> anyhow::Result<()> {
        let (mut controller, outbox, mut presenter) = controller();
        let cc = tag("CC", "3333");
        controller.submit_add(cc.clone())?;
        assert!(controller.is_pending());
        assert!(controller.store().is_empty());
        assert_eq!(outbox.frames()[0]["updateType"], "add");

        receive(&mut controller, &mut presenter, inbound("add", &cc));

        assert!(!controller.is_pending());
        assert_eq!(controller.store().len(), 1);
        assert_eq!(
            presenter.texts(NotificationKind::Success),
            ["Added a tag: CC"]
        );
        Ok(())
    }

    #[test]
    fn error_while_pending_leaves_store_untouched() -> anyhow::Result<()> {
        let (mut controller, _outbox, mut presenter) = controller();
        controller.submit_add(tag("CC", "3333"))?;
        receive(
            &mut controller,
            &mut presenter,
            r#"{"UpdateType":"error","Tags":null}"#.into(),
        );

        assert!(!controller.is_pending());
        assert!(controller.store().is_empty());
        assert!(presenter.rendered.is_empty());
        assert_eq!(
            presenter.texts(NotificationKind::Error),
            ["Something went wrong"]
        );
        Ok(())
    }

    #[test]
    fn malformed_frame_counts_as_error_and_session_continues() -> anyhow::Result<()> {
        let (mut controller, _outbox, mut presenter) = controller();
        controller.submit_add(tag("CC", "3333"))?;
        receive(&mut controller, &mut presenter, "{not json".into());
        assert!(!controller.is_pending());
        assert_eq!(
            presenter.texts(NotificationKind::Error),
            ["Something went wrong"]
        );

        receive(&mut controller, &mut presenter, inbound("add", &tag("DD", "4")));
        assert_eq!(controller.store().len(), 1);
        Ok(())
    }

    #[test]
    fn delete_confirmation_removes_exactly_that_tile() -> anyhow::Result<()> {
        let (mut controller, _outbox, mut presenter) = controller();
        receive(&mut controller, &mut presenter, inbound("add", &tag("AA", "1")));
        receive(&mut controller, &mut presenter, inbound("add", &tag("AA", "2")));

        controller.submit_delete(tag("AA", "1"))?;
        receive(&mut controller, &mut presenter, inbound("delete", &tag("AA", "1")));

        assert_eq!(controller.store().len(), 1);
        assert!(controller.store().contains(&tag("AA", "2").key()));
        assert_eq!(presenter.removed, vec![tag("AA", "1").key()]);
        assert_eq!(
            presenter.texts(NotificationKind::Success),
            ["Deleted a tag: AA"]
        );
        Ok(())
    }

    #[test]
    fn delete_of_unknown_tile_is_a_noop() {
        let (mut controller, _outbox, mut presenter) = controller();
        receive(&mut controller, &mut presenter, inbound("add", &tag("AA", "1")));
        receive(&mut controller, &mut presenter, inbound("delete", &tag("ZZ", "9")));
        assert_eq!(controller.store().len(), 1);
        assert!(presenter.notifications.is_empty());
    }

    #[test]
    fn events_from_other_clients_update_without_notifying() {
        let (mut controller, _outbox, mut presenter) = controller();
        receive(&mut controller, &mut presenter, inbound("add", &tag("AA", "1")));
        assert_eq!(controller.store().len(), 1);
        assert!(presenter.notifications.is_empty());
    }

    #[test]
    fn duplicate_add_rerenders_without_growing() {
        let (mut controller, _outbox, mut presenter) = controller();
        receive(&mut controller, &mut presenter, inbound("add", &tag("AA", "1")));
        receive(&mut controller, &mut presenter, inbound("add", &tag("AA", "1")));
        assert_eq!(controller.store().len(), 1);
        assert_eq!(presenter.rendered.len(), 2);
    }

    #[test]
    fn overlapping_adds_resolve_independently() -> anyhow::Result<()> {
        let (mut controller, _outbox, mut presenter) = controller();
        let cc = tag("CC", "3333");
        let dd = tag("DD", "4444");
        controller.submit_add(cc.clone())?;
        controller.submit_add(dd.clone())?;
        assert_eq!(controller.pending_count(), 2);

        receive(&mut controller, &mut presenter, inbound("add", &dd));
        assert_eq!(controller.pending_count(), 1);
        receive(&mut controller, &mut presenter, inbound("add", &cc));

        assert!(!controller.is_pending());
        assert_eq!(
            presenter.texts(NotificationKind::Success),
            ["Added a tag: DD", "Added a tag: CC"]
        );
        Ok(())
    }

    #[test]
    fn update_sends_delete_then_add_and_reports_once() -> anyhow::Result<()> {
        let (mut controller, outbox, mut presenter) = controller();
        let original = tag("EE", "1");
        let edited = tag("EE", "2");
        receive(&mut controller, &mut presenter, inbound("add", &original));

        controller.submit_update(original.clone(), edited.clone())?;
        let frames = outbox.frames();
        assert_eq!(frames[0]["updateType"], "delete");
        assert_eq!(frames[0]["tag"]["readData"], "1");
        assert_eq!(frames[1]["updateType"], "add");
        assert_eq!(frames[1]["tag"]["readData"], "2");

        receive(&mut controller, &mut presenter, inbound("delete", &original));
        assert!(controller.store().is_empty());
        receive(&mut controller, &mut presenter, inbound("add", &edited));

        assert!(!controller.is_pending());
        assert_eq!(controller.store().len(), 1);
        assert!(controller.store().contains(&edited.key()));
        assert_eq!(
            presenter.texts(NotificationKind::Success),
            ["Updated a tag: EE"]
        );
        Ok(())
    }

    #[test]
    fn failed_update_add_restores_original() -> anyhow::Result<()> {
        let (mut controller, outbox, mut presenter) = controller();
        let original = tag("EE", "1");
        receive(&mut controller, &mut presenter, inbound("add", &original));

        controller.submit_update(original.clone(), tag("EE", "2"))?;
        receive(&mut controller, &mut presenter, inbound("delete", &original));
        receive(&mut controller, &mut presenter, r#"{"UpdateType":"error"}"#.into());

        let frames = outbox.frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2]["updateType"], "add");
        assert_eq!(frames[2]["tag"]["readData"], "1");
        assert_eq!(
            presenter.texts(NotificationKind::Warning),
            ["Edit failed, restoring tag: EE"]
        );
        assert!(controller.is_pending());

        receive(&mut controller, &mut presenter, inbound("add", &original));
        assert!(!controller.is_pending());
        assert!(controller.store().contains(&original.key()));
        assert_eq!(
            presenter.texts(NotificationKind::Success),
            ["Restored a tag: EE"]
        );
        Ok(())
    }

    #[test]
    fn update_with_rejected_delete_does_not_restore() -> anyhow::Result<()> {
        let (mut controller, outbox, mut presenter) = controller();
        let original = tag("EE", "1");
        receive(&mut controller, &mut presenter, inbound("add", &original));

        controller.submit_update(original.clone(), tag("EE", "2"))?;
        receive(&mut controller, &mut presenter, r#"{"UpdateType":"error"}"#.into());
        receive(&mut controller, &mut presenter, r#"{"UpdateType":"error"}"#.into());

        assert_eq!(outbox.frames().len(), 2);
        assert!(!controller.is_pending());
        assert!(controller.store().contains(&original.key()));
        assert!(presenter.texts(NotificationKind::Warning).is_empty());
        Ok(())
    }

    #[test]
    fn stale_actions_expire_and_cancel_their_frames() -> anyhow::Result<()> {
        let (mut controller, outbox, mut presenter) = controller();
        controller.submit_add(tag("CC", "3333"))?;

        assert_eq!(controller.expire_stale(Instant::now(), &mut presenter), 0);
        let later = Instant::now() + Duration::from_secs(6);
        assert_eq!(controller.expire_stale(later, &mut presenter), 1);

        assert!(!controller.is_pending());
        assert!(outbox.tickets.lock()[0].is_cancelled());
        assert_eq!(
            presenter.texts(NotificationKind::Error),
            ["No confirmation for add of CC"]
        );
        Ok(())
    }

    #[test]
    fn form_submission_reads_presenter_fields() -> anyhow::Result<()> {
        let (mut controller, outbox, mut presenter) = controller();
        presenter.form = tag("FF", "5");
        controller.submit_form(FormAction::Add, &presenter)?;
        assert_eq!(outbox.frames()[0]["tag"]["epc"], "FF");
        Ok(())
    }

    #[test]
    fn editing_a_missing_tile_fails() {
        let (mut controller, _outbox, mut presenter) = controller();
        let missing = tag("ZZ", "0").key();
        assert!(!controller.edit_tile(&missing, &mut presenter));
        assert_matches!(
            controller.submit_form(FormAction::Update { original: missing }, &presenter),
            Err(SyncError::UnknownTile(_))
        );
        assert!(!controller.is_pending());
    }

    #[test]
    fn editing_a_tile_populates_the_form() {
        let (mut controller, _outbox, mut presenter) = controller();
        let aa = tag("AA", "1");
        receive(&mut controller, &mut presenter, inbound("add", &aa));
        assert!(controller.edit_tile(&aa.key(), &mut presenter));
        assert_eq!(presenter.form, aa);
    }

    fn retrieval(tags: &[&Tag]) -> String {
        let tags: Vec<serde_json::Value> = tags
            .iter()
            .map(|tag| {
                serde_json::json!({
                    "PCBits": tag.pc_bits,
                    "Length": tag.length,
                    "EPCLengthBits": tag.epc_length_bits,
                    "EPC": tag.epc,
                    "ReadData": tag.read_data,
                })
            })
            .collect();
        serde_json::json!({"UpdateType": "retrieval", "Tags": tags}).to_string()
    }

    #[test]
    fn resync_settles_actions_sent_before_the_link_dropped() -> anyhow::Result<()> {
        let (mut controller, _outbox, mut presenter) = controller();
        let aa = tag("AA", "1");
        let bb = tag("BB", "2");
        controller.handle(ConnectionEvent::Opened, &mut presenter);
        receive(&mut controller, &mut presenter, retrieval(&[&bb]));

        controller.submit_add(aa.clone())?;
        controller.handle(ConnectionEvent::Closed, &mut presenter);
        controller.handle(ConnectionEvent::Opened, &mut presenter);
        assert_eq!(controller.pending_count(), 1);
        receive(&mut controller, &mut presenter, retrieval(&[&aa, &bb]));

        assert!(!controller.is_pending());
        assert_eq!(presenter.texts(NotificationKind::Success), ["Added a tag: AA"]);

        controller.submit_delete(bb.clone())?;
        receive(&mut controller, &mut presenter, r#"{"UpdateType":"error"}"#.into());

        assert!(!controller.is_pending());
        assert!(controller.store().contains(&aa.key()));
        assert!(controller.store().contains(&bb.key()));
        assert_eq!(presenter.texts(NotificationKind::Error), [GENERIC_ERROR]);
        Ok(())
    }

    #[test]
    fn resync_fails_actions_the_server_never_applied() -> anyhow::Result<()> {
        let (mut controller, outbox, mut presenter) = controller();
        let original = tag("EE", "1");
        controller.handle(ConnectionEvent::Opened, &mut presenter);
        receive(&mut controller, &mut presenter, retrieval(&[&original]));

        controller.submit_delete(tag("CC", "3"))?;
        controller.submit_update(original.clone(), tag("EE", "2"))?;
        controller.handle(ConnectionEvent::Closed, &mut presenter);
        controller.handle(ConnectionEvent::Opened, &mut presenter);
        receive(&mut controller, &mut presenter, retrieval(&[]));

        // delete of CC counts as done, EE's delete half went through but
        // its add did not, so the original is re-added.
        assert_eq!(
            presenter.texts(NotificationKind::Success),
            ["Deleted a tag: CC"]
        );
        assert_eq!(
            presenter.texts(NotificationKind::Error),
            ["Lost add of EE on reconnect"]
        );
        assert_eq!(
            presenter.texts(NotificationKind::Warning),
            ["Edit failed, restoring tag: EE"]
        );
        let frames = outbox.frames();
        let last = frames.last().expect("restore frame");
        assert_eq!(last["updateType"], "add");
        assert_eq!(last["tag"]["readData"], "1");
        assert_eq!(controller.pending_count(), 1);
        Ok(())
    }

    #[test]
    fn connection_loss_is_reported_without_touching_the_store() {
        let (mut controller, _outbox, mut presenter) = controller();
        receive(&mut controller, &mut presenter, inbound("add", &tag("AA", "1")));
        controller.handle(ConnectionEvent::Closed, &mut presenter);
        controller.handle(ConnectionEvent::GaveUp { attempts: 3 }, &mut presenter);

        assert_eq!(controller.store().len(), 1);
        assert_eq!(controller.status(), &ConnectionStatus::Offline { attempts: 3 });
        assert_eq!(
            presenter.texts(NotificationKind::Connection),
            ["Disconnected", "Offline after 3 reconnect attempt(s)"]
        );
    }
}
