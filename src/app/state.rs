use std::collections::VecDeque;

use indexmap::IndexMap;
use rand::Rng;
use time::{Duration, OffsetDateTime};

use crate::codec::CodecError;
use crate::filter::TileFilter;
use crate::fixtures::{self, FixtureKind};
use crate::model::{Tag, TagFields, TagKey, TileId};
use crate::presenter::{Notification, Presenter};

const MAX_TOASTS: usize = 5;
const MAX_FIELD_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Epc,
    PcBits,
    Length,
    EpcLengthBits,
    ReadData,
}

impl FormField {
    pub const ALL: [FormField; 5] = [
        FormField::Epc,
        FormField::PcBits,
        FormField::Length,
        FormField::EpcLengthBits,
        FormField::ReadData,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FormField::Epc => "EPC",
            FormField::PcBits => "PC bits",
            FormField::Length => "Length",
            FormField::EpcLengthBits => "EPC length bits",
            FormField::ReadData => "Read data",
        }
    }

    pub fn value(self, fields: &TagFields) -> &str {
        match self {
            FormField::Epc => &fields.epc,
            FormField::PcBits => &fields.pc_bits,
            FormField::Length => &fields.length,
            FormField::EpcLengthBits => &fields.epc_length_bits,
            FormField::ReadData => &fields.read_data,
        }
    }

    fn value_mut(self, fields: &mut TagFields) -> &mut String {
        match self {
            FormField::Epc => &mut fields.epc,
            FormField::PcBits => &mut fields.pc_bits,
            FormField::Length => &mut fields.length,
            FormField::EpcLengthBits => &mut fields.epc_length_bits,
            FormField::ReadData => &mut fields.read_data,
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|f| *f == self).unwrap_or(0)
    }

    fn step(self, delta: isize) -> Self {
        let len = Self::ALL.len() as isize;
        let next = (self.index() as isize + delta).rem_euclid(len);
        Self::ALL[next as usize]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormMode {
    Add,
    /// Editing the stored tag `original`; submit sends an update.
    Edit { original: TagKey },
}

#[derive(Debug, Clone)]
pub struct FormOverlay {
    pub mode: FormMode,
    pub focus: FormField,
}

#[derive(Debug, Clone)]
pub struct DeleteOverlay {
    pub key: TagKey,
    pub epc: String,
}

#[derive(Debug, Clone)]
pub enum OverlayState {
    Form(FormOverlay),
    ConfirmDelete(DeleteOverlay),
    Help,
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub notification: Notification,
    pub shown_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct FilterInput {
    pub active: bool,
    pub query: String,
}

#[derive(Debug, Clone)]
pub struct TilePresenter {
    tiles: IndexMap<TagKey, Tag>,
    pub selected: usize,
    filter: TileFilter,
    pub filter_input: FilterInput,
    form: TagFields,
    overlay: Option<OverlayState>,
    toasts: VecDeque<Toast>,
    toast_ttl: Duration,
    status_message: Option<String>,
}

impl TilePresenter {
    pub fn new(toast_ttl: Duration) -> Self {
        Self {
            tiles: IndexMap::new(),
            selected: 0,
            filter: TileFilter::default(),
            filter_input: FilterInput::default(),
            form: TagFields::default(),
            overlay: None,
            toasts: VecDeque::new(),
            toast_ttl,
            status_message: None,
        }
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn visible_tiles(&self) -> Vec<&Tag> {
        self.tiles
            .values()
            .filter(|tag| self.filter.matches(tag))
            .collect()
    }

    pub fn selected_tile(&self) -> Option<&Tag> {
        self.visible_tiles().get(self.selected).copied()
    }

    pub fn move_selection(&mut self, delta: isize) {
        let len = self.visible_tiles().len();
        if len == 0 {
            self.selected = 0;
            return;
        }
        let next = (self.selected as isize + delta).clamp(0, len as isize - 1);
        self.selected = next as usize;
    }

    fn normalize_selection(&mut self) {
        let len = self.visible_tiles().len();
        if self.selected >= len {
            self.selected = len.saturating_sub(1);
        }
    }

    pub fn filter(&self) -> &TileFilter {
        &self.filter
    }

    pub fn is_filter_active(&self) -> bool {
        self.filter_input.active
    }

    pub fn begin_filter(&mut self) {
        self.filter_input.active = true;
        self.filter_input.query = self.filter.query().to_string();
    }

    pub fn push_filter_char(&mut self, ch: char) {
        self.filter_input.query.push(ch);
        self.apply_filter();
    }

    pub fn pop_filter_char(&mut self) {
        self.filter_input.query.pop();
        self.apply_filter();
    }

    pub fn finish_filter(&mut self) {
        self.filter_input.active = false;
    }

    pub fn cancel_filter(&mut self) {
        self.filter_input = FilterInput::default();
        self.apply_filter();
    }

    fn apply_filter(&mut self) {
        self.filter = TileFilter::new(&self.filter_input.query);
        self.selected = 0;
    }

    pub fn form(&self) -> &TagFields {
        &self.form
    }

    pub fn overlay(&self) -> Option<&OverlayState> {
        self.overlay.as_ref()
    }

    pub fn form_overlay(&self) -> Option<&FormOverlay> {
        match self.overlay.as_ref() {
            Some(OverlayState::Form(form)) => Some(form),
            _ => None,
        }
    }

    fn form_overlay_mut(&mut self) -> Option<&mut FormOverlay> {
        match self.overlay.as_mut() {
            Some(OverlayState::Form(form)) => Some(form),
            _ => None,
        }
    }

    pub fn open_add_form(&mut self) {
        self.form = TagFields::default();
        self.overlay = Some(OverlayState::Form(FormOverlay {
            mode: FormMode::Add,
            focus: FormField::Epc,
        }));
    }

    /// Opens the form over fields already loaded through `populate_form`.
    pub fn open_edit_form(&mut self, original: TagKey) {
        self.overlay = Some(OverlayState::Form(FormOverlay {
            mode: FormMode::Edit { original },
            focus: FormField::Epc,
        }));
    }

    pub fn open_delete_confirm(&mut self) -> bool {
        let Some(tag) = self.selected_tile() else {
            return false;
        };
        let overlay = DeleteOverlay {
            key: tag.key(),
            epc: tag.epc.clone(),
        };
        self.overlay = Some(OverlayState::ConfirmDelete(overlay));
        true
    }

    pub fn toggle_help(&mut self) {
        self.overlay = match self.overlay {
            Some(OverlayState::Help) => None,
            _ => Some(OverlayState::Help),
        };
    }

    pub fn close_overlay(&mut self) {
        self.overlay = None;
    }

    pub fn form_focus_step(&mut self, delta: isize) {
        if let Some(form) = self.form_overlay_mut() {
            form.focus = form.focus.step(delta);
        }
    }

    pub fn form_push_char(&mut self, ch: char) {
        let Some(focus) = self.form_overlay().map(|form| form.focus) else {
            return;
        };
        let value = focus.value_mut(&mut self.form);
        if value.chars().count() < MAX_FIELD_LEN {
            value.push(ch);
        }
    }

    pub fn form_pop_char(&mut self) {
        if let Some(focus) = self.form_overlay().map(|form| form.focus) {
            focus.value_mut(&mut self.form).pop();
        }
    }

    pub fn fill_random<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        kind: FixtureKind,
    ) -> Result<(), CodecError> {
        self.form = fixtures::random_tag(rng, kind)?;
        Ok(())
    }

    pub fn toasts(&self) -> impl Iterator<Item = &Toast> {
        self.toasts.iter()
    }

    pub fn prune_toasts(&mut self, now: OffsetDateTime) {
        let ttl = self.toast_ttl;
        self.toasts.retain(|toast| now - toast.shown_at < ttl);
    }

    pub fn clear_toasts(&mut self) {
        self.toasts.clear();
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status_message = message.map(Into::into);
    }
}

impl Presenter for TilePresenter {
    fn render_tile(&mut self, tag: &Tag) -> TileId {
        self.tiles.insert(tag.key(), tag.clone());
        tag.tile_id()
    }

    fn remove_tile(&mut self, key: &TagKey) {
        self.tiles.shift_remove(key);
        if let Some(OverlayState::ConfirmDelete(overlay)) = &self.overlay {
            if &overlay.key == key {
                self.overlay = None;
            }
        }
        self.normalize_selection();
    }

    fn clear_tiles(&mut self) {
        self.tiles.clear();
        self.selected = 0;
    }

    fn read_form_fields(&self) -> TagFields {
        self.form.clone()
    }

    fn populate_form(&mut self, tag: &Tag) {
        self.form = tag.clone();
    }

    fn show_notification(&mut self, notification: Notification) {
        self.toasts.push_back(Toast {
            notification,
            shown_at: OffsetDateTime::now_utc(),
        });
        while self.toasts.len() > MAX_TOASTS {
            self.toasts.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::model::EpcCategory;

    fn presenter() -> TilePresenter {
        TilePresenter::new(Duration::seconds(4))
    }

    fn tag(epc: &str) -> Tag {
        Tag::new(epc, "3000", "18", "96", "beef")
    }

    #[test]
    fn rerendering_a_tile_keeps_its_position() {
        let mut view = presenter();
        view.render_tile(&tag("AA"));
        view.render_tile(&tag("BB"));
        view.render_tile(&tag("AA"));
        let epcs: Vec<_> = view.visible_tiles().iter().map(|t| t.epc.as_str()).collect();
        assert_eq!(epcs, ["AA", "BB"]);
    }

    #[test]
    fn removing_the_last_tile_pulls_selection_back() {
        let mut view = presenter();
        view.render_tile(&tag("AA"));
        view.render_tile(&tag("BB"));
        view.move_selection(5);
        assert_eq!(view.selected, 1);

        view.remove_tile(&tag("BB").key());
        assert_eq!(view.selected, 0);
        assert_eq!(view.selected_tile().map(|t| t.epc.as_str()), Some("AA"));
    }

    #[test]
    fn filter_narrows_visible_tiles() {
        let mut view = presenter();
        view.render_tile(&tag("E280AA"));
        view.render_tile(&tag("DC20BB"));
        view.begin_filter();
        for ch in "^dc".chars() {
            view.push_filter_char(ch);
        }
        view.finish_filter();

        assert!(!view.is_filter_active());
        assert_eq!(view.visible_tiles().len(), 1);
        assert_eq!(view.tile_count(), 2);

        view.cancel_filter();
        assert_eq!(view.visible_tiles().len(), 2);
    }

    #[test]
    fn form_typing_targets_the_focused_field() {
        let mut view = presenter();
        view.open_add_form();
        for ch in "E2".chars() {
            view.form_push_char(ch);
        }
        view.form_focus_step(1);
        view.form_push_char('3');
        view.form_focus_step(-2);
        assert_matches!(view.form_overlay(), Some(FormOverlay { focus: FormField::ReadData, .. }));
        view.form_push_char('x');
        view.form_pop_char();

        let fields = view.read_form_fields();
        assert_eq!(fields.epc, "E2");
        assert_eq!(fields.pc_bits, "3");
        assert_eq!(fields.read_data, "");
    }

    #[test]
    fn edit_form_keeps_populated_fields() {
        let mut view = presenter();
        let original = tag("AA");
        view.populate_form(&original);
        view.open_edit_form(original.key());
        assert_eq!(view.read_form_fields(), original);
        assert_matches!(
            view.form_overlay(),
            Some(FormOverlay { mode: FormMode::Edit { .. }, .. })
        );
    }

    #[test]
    fn random_fill_replaces_the_form() -> anyhow::Result<()> {
        let mut view = presenter();
        view.open_add_form();
        view.fill_random(&mut StdRng::seed_from_u64(7), FixtureKind::Epc)?;
        assert_eq!(view.form().category(), EpcCategory::Bits96);
        assert_eq!(view.form().pc_bits, "3000");
        Ok(())
    }

    #[test]
    fn toasts_expire_and_are_capped() {
        let mut view = presenter();
        for n in 0..7 {
            view.show_notification(Notification::success(format!("Added a tag: {n}")));
        }
        assert_eq!(view.toasts().count(), MAX_TOASTS);
        assert_eq!(
            view.toasts().next().map(|t| t.notification.text.as_str()),
            Some("Added a tag: 2")
        );

        view.prune_toasts(OffsetDateTime::now_utc() + Duration::seconds(5));
        assert_eq!(view.toasts().count(), 0);
    }

    #[test]
    fn delete_confirmation_closes_when_tile_disappears() {
        let mut view = presenter();
        view.render_tile(&tag("AA"));
        assert!(view.open_delete_confirm());
        view.remove_tile(&tag("AA").key());
        assert!(view.overlay().is_none());
        assert!(!view.open_delete_confirm());
    }
}
