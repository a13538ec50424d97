//! The studio workspace: two asset slots, the attribute selection, and the
//! generation lifecycle that turns them into a composite.
//!
//! Generation is split into [`Workspace::begin_generation`] and
//! [`Workspace::complete_generation`] so a caller can run the backend call on
//! another thread. Every begin hands out a fresh [`GenerationTicket`]; a
//! completion carrying anything but the current ticket is discarded, which is
//! how a reset (or a slot change) while generating drops the late response.

pub mod persistence;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use platemorph_contracts::assets::{AspectRatio, ImageAsset};
use platemorph_contracts::attributes::{AttributeKind, AttributeSelection};
use platemorph_contracts::events::{EventWriter, WorkspaceEvent};
use platemorph_contracts::store::KeyValueStore;
use tracing::{debug, info, warn};

use crate::directives::{compose, DirectivePayload};
use crate::error::{GenerationError, IngestError};
use crate::generation::GenerationBackend;

pub use persistence::{clear_persistence, load_snapshot, sync_persistence, WorkspaceSnapshot};

pub const PROGRESS_MESSAGES: [&str; 6] = [
    "Mapping facial geometry...",
    "Extracting muscle micro-expressions...",
    "Synthesizing lighting environment...",
    "Injecting reference characteristics...",
    "Balancing identity preservation...",
    "Rendering final composition...",
];
const PROGRESS_ROTATION: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    /// Supplies the attributes (PLATE B).
    Reference,
    /// Supplies the identity (PLATE A) and the output aspect ratio.
    Target,
}

impl Slot {
    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Reference => "reference",
            Slot::Target => "target",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Slot {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "reference" | "attribute" | "ref" => Ok(Slot::Reference),
            "target" | "identity" => Ok(Slot::Target),
            other => Err(format!("unknown slot '{other}' (expected identity or reference)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    Idle,
    SlotsPartial,
    /// Both slots filled but nothing selected.
    AwaitingSelection,
    ReadyToGenerate,
    Generating,
    Succeeded,
    Failed,
}

impl WorkspaceState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkspaceState::Idle => "idle",
            WorkspaceState::SlotsPartial => "slots_partial",
            WorkspaceState::AwaitingSelection => "awaiting_selection",
            WorkspaceState::ReadyToGenerate => "ready_to_generate",
            WorkspaceState::Generating => "generating",
            WorkspaceState::Succeeded => "succeeded",
            WorkspaceState::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkspaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the workspace taken when generation starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub identity: ImageAsset,
    pub attribute: ImageAsset,
    pub selection: AttributeSelection,
    pub target_aspect_ratio: Option<AspectRatio>,
}

impl GenerationRequest {
    pub fn payload(&self) -> DirectivePayload {
        compose(
            &self.identity,
            &self.attribute,
            &self.selection,
            self.target_aspect_ratio,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub image_url: String,
    /// Unix millis, strictly increasing within a workspace.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenerationTicket(u64);

impl GenerationTicket {
    pub fn id(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct PendingGeneration {
    pub ticket: GenerationTicket,
    pub request: GenerationRequest,
}

pub struct Workspace {
    reference: Option<ImageAsset>,
    target: Option<ImageAsset>,
    selection: AttributeSelection,
    result: Option<GenerationResult>,
    error: Option<String>,
    generating: bool,
    generation_started: Option<Instant>,
    comparison: bool,
    fullscreen: bool,
    slot_errors: BTreeMap<Slot, String>,
    ticket: u64,
    last_result_at: i64,
    restored: Vec<&'static str>,
    store: Option<Box<dyn KeyValueStore>>,
    events: Option<EventWriter>,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            reference: None,
            target: None,
            selection: AttributeSelection::default(),
            result: None,
            error: None,
            generating: false,
            generation_started: None,
            comparison: false,
            fullscreen: false,
            slot_errors: BTreeMap::new(),
            ticket: 0,
            last_result_at: 0,
            restored: Vec::new(),
            store: None,
            events: None,
        }
    }

    /// Builds a workspace from whatever well-formed entries the store holds
    /// and keeps the store for later syncs.
    pub fn hydrate(mut store: Box<dyn KeyValueStore>) -> Self {
        let snapshot = load_snapshot(store.as_mut());
        debug!(restored = ?snapshot.restored, "workspace hydrated");
        Self {
            reference: snapshot.reference,
            target: snapshot.target,
            selection: snapshot.selection,
            restored: snapshot.restored,
            store: Some(store),
            ..Self::new()
        }
    }

    /// Attaches an event log. A hydrated workspace reports what it restored.
    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        if self.store.is_some() {
            self.emit(WorkspaceEvent::WorkspaceHydrated {
                restored: self.restored.iter().map(|key| key.to_string()).collect(),
                state: self.state().as_str().to_string(),
            });
        }
        self
    }

    pub fn reference(&self) -> Option<&ImageAsset> {
        self.reference.as_ref()
    }

    pub fn target(&self) -> Option<&ImageAsset> {
        self.target.as_ref()
    }

    pub fn slot(&self, slot: Slot) -> Option<&ImageAsset> {
        match slot {
            Slot::Reference => self.reference.as_ref(),
            Slot::Target => self.target.as_ref(),
        }
    }

    pub fn selection(&self) -> &AttributeSelection {
        &self.selection
    }

    pub fn result(&self) -> Option<&GenerationResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Last ingestion failure for a slot; cleared when the slot changes.
    pub fn slot_error(&self, slot: Slot) -> Option<&str> {
        self.slot_errors.get(&slot).map(String::as_str)
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn comparison(&self) -> bool {
        self.comparison
    }

    pub fn fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn state(&self) -> WorkspaceState {
        if self.generating {
            return WorkspaceState::Generating;
        }
        if self.result.is_some() {
            return WorkspaceState::Succeeded;
        }
        if self.error.is_some() {
            return WorkspaceState::Failed;
        }
        match (self.reference.is_some(), self.target.is_some()) {
            (true, true) if self.selection.is_empty() => WorkspaceState::AwaitingSelection,
            (true, true) => WorkspaceState::ReadyToGenerate,
            (false, false) => WorkspaceState::Idle,
            _ => WorkspaceState::SlotsPartial,
        }
    }

    pub fn can_generate(&self) -> bool {
        !self.generating
            && self.reference.is_some()
            && self.target.is_some()
            && !self.selection.is_empty()
    }

    /// Rotating status line while a request is in flight.
    pub fn progress_message(&self) -> Option<&'static str> {
        let started = self.generation_started?;
        let step = (started.elapsed().as_millis() / PROGRESS_ROTATION.as_millis()) as usize;
        Some(PROGRESS_MESSAGES[step % PROGRESS_MESSAGES.len()])
    }

    pub fn fill_slot(&mut self, slot: Slot, asset: ImageAsset) {
        let name = asset.name.clone();
        let aspect_ratio = asset.aspect_ratio.unwrap_or_default();
        match slot {
            Slot::Reference => self.reference = Some(asset),
            Slot::Target => self.target = Some(asset),
        }
        self.slot_errors.remove(&slot);
        self.abandon_generation("slot_filled");
        self.clear_outcome();
        self.sync();
        self.emit(WorkspaceEvent::SlotFilled {
            slot: slot.to_string(),
            name,
            aspect_ratio,
        });
    }

    /// Applies an ingestion outcome. A failure is recorded against the slot
    /// and leaves its current asset in place.
    pub fn ingest(&mut self, slot: Slot, outcome: Result<ImageAsset, IngestError>) -> bool {
        match outcome {
            Ok(asset) => {
                self.fill_slot(slot, asset);
                true
            }
            Err(err) => {
                warn!(slot = slot.as_str(), error = %err, "image ingestion failed");
                self.slot_errors.insert(slot, err.to_string());
                false
            }
        }
    }

    pub fn clear_slot(&mut self, slot: Slot) {
        let previous = match slot {
            Slot::Reference => self.reference.take(),
            Slot::Target => self.target.take(),
        };
        self.slot_errors.remove(&slot);
        if previous.is_none() {
            return;
        }
        self.abandon_generation("slot_cleared");
        self.clear_outcome();
        self.sync();
        self.emit(WorkspaceEvent::SlotCleared {
            slot: slot.to_string(),
        });
    }

    /// Returns the new membership, or `None` while generating.
    pub fn toggle_attribute(&mut self, kind: AttributeKind) -> Option<bool> {
        if self.generating {
            return None;
        }
        let selected = self.selection.toggle(kind);
        self.sync();
        self.emit_selection();
        Some(selected)
    }

    pub fn set_selection(&mut self, selection: AttributeSelection) -> bool {
        if self.generating {
            return false;
        }
        if self.selection != selection {
            self.selection = selection;
            self.sync();
            self.emit_selection();
        }
        true
    }

    pub fn swap_slots(&mut self) -> bool {
        if self.generating {
            return false;
        }
        std::mem::swap(&mut self.reference, &mut self.target);
        self.slot_errors.clear();
        self.clear_outcome();
        self.sync();
        self.emit(WorkspaceEvent::SlotsSwapped {
            reference: self.reference.as_ref().map(|asset| asset.name.clone()),
            target: self.target.as_ref().map(|asset| asset.name.clone()),
        });
        true
    }

    /// Moves to `Generating` and snapshots the request. Returns `None` (and
    /// changes nothing) unless the workspace is ready.
    pub fn begin_generation(&mut self) -> Option<PendingGeneration> {
        if !self.can_generate() {
            return None;
        }
        let request = GenerationRequest {
            identity: self.target.clone()?,
            attribute: self.reference.clone()?,
            selection: self.selection.clone(),
            target_aspect_ratio: self.target.as_ref().and_then(|asset| asset.aspect_ratio),
        };
        self.ticket += 1;
        self.generating = true;
        self.generation_started = Some(Instant::now());
        self.clear_outcome();

        let ticket = GenerationTicket(self.ticket);
        self.emit(WorkspaceEvent::GenerationStarted {
            ticket: ticket.id(),
            attributes: request.selection.clone(),
            aspect_ratio: request.target_aspect_ratio.unwrap_or_default(),
        });
        info!(ticket = ticket.id(), "generation started");
        Some(PendingGeneration { ticket, request })
    }

    /// Applies a backend outcome. Returns `false` when the ticket is stale
    /// and the outcome was dropped.
    pub fn complete_generation(
        &mut self,
        ticket: GenerationTicket,
        outcome: Result<String, GenerationError>,
    ) -> bool {
        if !self.generating || ticket.0 != self.ticket {
            debug!(ticket = ticket.id(), current = self.ticket, "dropping stale generation outcome");
            self.emit(WorkspaceEvent::GenerationDiscarded {
                ticket: ticket.id(),
                reason: "stale".to_string(),
            });
            return false;
        }
        self.generating = false;
        self.generation_started = None;
        match outcome {
            Ok(image_url) => {
                let timestamp = self.next_result_timestamp();
                self.result = Some(GenerationResult {
                    image_url,
                    timestamp,
                });
                self.error = None;
                self.emit(WorkspaceEvent::GenerationSucceeded {
                    ticket: ticket.id(),
                    timestamp,
                });
            }
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "generation failed");
                self.clear_outcome();
                self.error = Some(err.to_string());
                self.emit(WorkspaceEvent::GenerationFailed {
                    ticket: ticket.id(),
                    error_kind: err.kind().to_string(),
                    message: err.to_string(),
                    retryable: err.is_retryable(),
                });
            }
        }
        true
    }

    /// Runs one generation inline. Returns `false` when the workspace was not
    /// ready.
    pub fn generate(&mut self, backend: &dyn GenerationBackend) -> bool {
        let Some(pending) = self.begin_generation() else {
            return false;
        };
        let outcome = backend.generate(&pending.request.payload());
        self.complete_generation(pending.ticket, outcome)
    }

    pub fn reset(&mut self) {
        let was_generating = self.generating;
        self.ticket += 1;
        self.generating = false;
        self.generation_started = None;
        self.reference = None;
        self.target = None;
        self.selection = AttributeSelection::default();
        self.slot_errors.clear();
        self.clear_outcome();
        if let Some(store) = self.store.as_mut() {
            clear_persistence(store.as_mut());
        }
        self.emit(WorkspaceEvent::WorkspaceReset {
            discarded_generation: was_generating,
        });
    }

    /// Flips the split comparison view. Only meaningful with a result.
    pub fn toggle_comparison(&mut self) -> bool {
        if self.result.is_some() {
            self.comparison = !self.comparison;
        }
        self.comparison
    }

    pub fn toggle_fullscreen(&mut self) -> bool {
        if self.result.is_some() {
            self.fullscreen = !self.fullscreen;
        }
        self.fullscreen
    }

    fn clear_outcome(&mut self) {
        self.result = None;
        self.error = None;
        self.comparison = false;
        self.fullscreen = false;
    }

    /// A slot change while generating supersedes the in-flight request.
    fn abandon_generation(&mut self, reason: &str) {
        if !self.generating {
            return;
        }
        let abandoned = self.ticket;
        self.ticket += 1;
        self.generating = false;
        self.generation_started = None;
        self.emit(WorkspaceEvent::GenerationDiscarded {
            ticket: abandoned,
            reason: reason.to_string(),
        });
    }

    fn next_result_timestamp(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let stamp = now.max(self.last_result_at + 1);
        self.last_result_at = stamp;
        stamp
    }

    fn sync(&mut self) {
        if let Some(store) = self.store.as_mut() {
            sync_persistence(
                store.as_mut(),
                self.reference.as_ref(),
                self.target.as_ref(),
                &self.selection,
            );
        }
    }

    fn emit_selection(&self) {
        self.emit(WorkspaceEvent::SelectionChanged {
            attributes: self.selection.clone(),
        });
    }

    fn emit(&self, event: WorkspaceEvent) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(&event) {
            warn!(
                event_type = event.event_type(),
                error = %format!("{err:#}"),
                "failed to append workspace event"
            );
        }
    }
}
