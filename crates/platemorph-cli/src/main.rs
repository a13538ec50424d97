use std::fs;
use std::io::{self, BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use platemorph_contracts::assets::{decode_data_url, ImageAsset};
use platemorph_contracts::attributes::{list_attributes, AttributeKind, AttributeSelection};
use platemorph_contracts::commands::{parse_command, StudioCommand, STUDIO_HELP_COMMANDS};
use platemorph_contracts::events::EventWriter;
use platemorph_contracts::store::{JsonFileStore, KeyValueStore, MemoryStore};
use platemorph_engine::error::{GenerationError, IngestError};
use platemorph_engine::generation::{default_registry, GeminiConfig, GenerationBackend};
use platemorph_engine::ingest::{CaptureController, FrameFileCamera, ImageSource, Normalizer};
use platemorph_engine::workspace::{
    GenerationTicket, PendingGeneration, Slot, Workspace, WorkspaceState,
};
use tracing::debug;
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
#[command(
    name = "platemorph",
    version,
    about = "Transfer expression, pose, outfit and more between two portraits"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// One-shot transfer from a reference plate onto an identity plate.
    Transfer(TransferArgs),
    /// Interactive workspace with persisted slots.
    Studio(StudioArgs),
    /// Print the attribute catalog.
    Attributes,
}

#[derive(Debug, Args)]
struct BackendArgs {
    #[arg(long, default_value = "gemini")]
    backend: String,
    #[arg(long)]
    model: Option<String>,
    /// Request timeout in seconds (clamped to 15..=300).
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Debug, Parser)]
struct TransferArgs {
    /// Path or URL of the person whose identity is kept.
    #[arg(long)]
    identity: String,
    /// Path or URL of the image supplying the attributes.
    #[arg(long)]
    reference: String,
    #[arg(long, value_delimiter = ',')]
    attributes: Vec<String>,
    #[command(flatten)]
    backend: BackendArgs,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct StudioArgs {
    #[arg(long, default_value = ".platemorph")]
    state: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Keep the workspace in memory only.
    #[arg(long)]
    no_persist: bool,
    /// Still frame refreshed by an external capture tool, used by /capture.
    #[arg(long)]
    camera_frame: Option<PathBuf>,
    #[command(flatten)]
    backend: BackendArgs,
}

enum StudioEvent {
    Line(String),
    Generation {
        ticket: GenerationTicket,
        outcome: Result<String, GenerationError>,
    },
    Eof,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("platemorph error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Transfer(args) => run_transfer(args),
        Command::Studio(args) => {
            run_studio(args)?;
            Ok(0)
        }
        Command::Attributes => {
            print_attributes(&AttributeSelection::empty());
            Ok(0)
        }
    }
}

fn resolve_backend(args: &BackendArgs) -> Result<Box<dyn GenerationBackend>> {
    let mut config = GeminiConfig::from_env();
    if let Some(model) = args.model.as_deref().map(str::trim).filter(|model| !model.is_empty()) {
        config.model = model.to_string();
    }
    if let Some(seconds) = args.timeout {
        config = config.with_timeout_secs(seconds);
    }
    let mut registry = default_registry(config);
    let names = registry.names();
    registry.take(args.backend.trim()).ok_or_else(|| {
        anyhow!(
            "unknown backend '{}' (available: {})",
            args.backend,
            names.join(", ")
        )
    })
}

fn parse_selection(raw: &[String]) -> Result<AttributeSelection> {
    if raw.iter().all(|value| value.trim().is_empty()) {
        return Ok(AttributeSelection::default());
    }
    let kinds = raw
        .iter()
        .filter(|value| !value.trim().is_empty())
        .map(|value| value.parse::<AttributeKind>().map_err(|err| anyhow!(err)))
        .collect::<Result<Vec<_>>>()?;
    Ok(AttributeSelection::from_kinds(kinds))
}

fn session_events(path: &Path) -> EventWriter {
    EventWriter::new(path, uuid::Uuid::new_v4().to_string())
}

fn run_transfer(args: TransferArgs) -> Result<i32> {
    let backend = resolve_backend(&args.backend)?;
    let selection = parse_selection(&args.attributes)?;
    let normalizer = Normalizer::new();
    let identity = normalizer
        .normalize(ImageSource::parse(&args.identity))
        .with_context(|| format!("failed to load identity image {}", args.identity))?;
    let reference = normalizer
        .normalize(ImageSource::parse(&args.reference))
        .with_context(|| format!("failed to load reference image {}", args.reference))?;

    let mut workspace = Workspace::new();
    if let Some(events) = args.events.as_deref() {
        workspace = workspace.with_events(session_events(events));
    }
    workspace.fill_slot(Slot::Target, identity);
    workspace.fill_slot(Slot::Reference, reference);
    workspace.set_selection(selection);
    let Some(pending) = workspace.begin_generation() else {
        bail!("workspace is not ready to generate ({})", workspace.state());
    };
    let outcome = generate_guarded(backend.as_ref(), &pending);
    workspace.complete_generation(pending.ticket, outcome);

    match workspace.result() {
        Some(result) => {
            let saved = save_result(&result.image_url, &args.out)?;
            println!("{}", saved.display());
            Ok(0)
        }
        None => {
            eprintln!(
                "{}",
                workspace.error().unwrap_or("Generation failed without a message.")
            );
            Ok(1)
        }
    }
}

/// Runs the backend call, turning a panic into an upstream failure so every
/// pending generation gets a completion.
fn generate_guarded(
    backend: &dyn GenerationBackend,
    pending: &PendingGeneration,
) -> Result<String, GenerationError> {
    let payload = pending.request.payload();
    panic::catch_unwind(AssertUnwindSafe(|| backend.generate(&payload))).unwrap_or_else(|cause| {
        let detail = cause
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| cause.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(backend = backend.name(), %detail, "generation backend panicked");
        Err(GenerationError::Upstream(format!(
            "{} backend crashed: {detail}",
            backend.name()
        )))
    })
}

/// Writes a result data URL to disk. A path without an extension gets one
/// from the result's MIME type.
fn save_result(image_url: &str, path: &Path) -> Result<PathBuf> {
    let (mime, bytes) = decode_data_url(image_url)?;
    let mut target = path.to_path_buf();
    if target.extension().is_none() {
        target.set_extension(extension_for_mime(&mime));
    }
    if let Some(parent) = target.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&target, bytes).with_context(|| format!("failed to write {}", target.display()))?;
    Ok(target)
}

fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

fn run_studio(args: StudioArgs) -> Result<()> {
    let backend: Arc<dyn GenerationBackend> = Arc::from(resolve_backend(&args.backend)?);
    fs::create_dir_all(&args.state)
        .with_context(|| format!("failed to create {}", args.state.display()))?;
    let store: Box<dyn KeyValueStore> = if args.no_persist {
        Box::new(MemoryStore::new())
    } else {
        Box::new(JsonFileStore::new(args.state.join("workspace.json")))
    };
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.state.join("events.jsonl"));
    let mut workspace = Workspace::hydrate(store).with_events(session_events(&events_path));
    let normalizer = Normalizer::new();
    let camera = args.camera_frame.clone().map(FrameFileCamera::new);
    let mut capture = CaptureController::new();
    let mut capture_slot: Option<Slot> = None;

    let (tx, rx) = mpsc::channel::<StudioEvent>();
    spawn_stdin_reader(tx.clone());

    println!(
        "Platemorph studio ({} backend). Type /help for commands.",
        backend.name()
    );
    print_status(&workspace, capture.is_active());
    prompt()?;

    while let Ok(event) = rx.recv() {
        let line = match event {
            StudioEvent::Eof => break,
            StudioEvent::Generation { ticket, outcome } => {
                if workspace.complete_generation(ticket, outcome) {
                    report_generation(&workspace);
                    prompt()?;
                } else {
                    debug!(ticket = ticket.id(), "late generation response dropped");
                }
                continue;
            }
            StudioEvent::Line(line) => line,
        };

        let command = parse_command(&line);
        match command.action.as_str() {
            "noop" => {}
            "quit" => break,
            "help" => println!("Commands: {}", STUDIO_HELP_COMMANDS.join(" ")),
            "load_identity" | "load_reference" => {
                let slot = if command.action == "load_identity" {
                    Slot::Target
                } else {
                    Slot::Reference
                };
                match command.arg_str("source") {
                    Some(source) => {
                        let outcome = normalizer.normalize(ImageSource::parse(source));
                        report_ingest(&mut workspace, slot, outcome);
                    }
                    None => println!("{} requires a path or URL", command_name(&command)),
                }
            }
            "capture" => {
                if let Some(slot) = parse_slot_arg(&command) {
                    capture_into(
                        &mut workspace,
                        &mut capture,
                        &mut capture_slot,
                        camera.as_ref(),
                        slot,
                    );
                }
            }
            "cancel_capture" => {
                if capture.is_active() {
                    capture.cancel();
                    capture_slot = None;
                    println!("Capture cancelled.");
                } else {
                    println!("No capture in progress.");
                }
            }
            "clear_slot" => {
                if let Some(slot) = parse_slot_arg(&command) {
                    workspace.clear_slot(slot);
                    println!("Cleared {}.", slot_label(slot));
                }
            }
            "toggle_attribute" => toggle_attributes(&mut workspace, &command),
            "list_attributes" => print_attributes(workspace.selection()),
            "swap" => {
                if workspace.swap_slots() {
                    println!("Swapped identity and reference.");
                } else {
                    println!("Cannot swap while generating.");
                }
            }
            "generate" => match workspace.begin_generation() {
                Some(pending) => {
                    let backend = Arc::clone(&backend);
                    let tx = tx.clone();
                    thread::spawn(move || {
                        let outcome = generate_guarded(backend.as_ref(), &pending);
                        let _ = tx.send(StudioEvent::Generation {
                            ticket: pending.ticket,
                            outcome,
                        });
                    });
                    println!(
                        "{}",
                        workspace.progress_message().unwrap_or("Generating...")
                    );
                }
                None => println!("{}", not_ready_reason(&workspace)),
            },
            "toggle_comparison" => {
                if workspace.result().is_none() {
                    println!("Comparison needs a result.");
                } else {
                    let on = workspace.toggle_comparison();
                    println!("Comparison view {}.", on_off(on));
                }
            }
            "toggle_fullscreen" => {
                if workspace.result().is_none() {
                    println!("Fullscreen needs a result.");
                } else {
                    let on = workspace.toggle_fullscreen();
                    println!("Fullscreen view {}.", on_off(on));
                }
            }
            "save_result" => match (command.arg_str("path"), workspace.result()) {
                (None, _) => println!("/save requires a path"),
                (Some(_), None) => println!("Nothing to save yet."),
                (Some(path), Some(result)) => match save_result(&result.image_url, Path::new(path)) {
                    Ok(saved) => println!("Saved {}", saved.display()),
                    Err(err) => println!("Save failed: {err:#}"),
                },
            },
            "status" => print_status(&workspace, capture.is_active()),
            "reset" => {
                capture.cancel();
                capture_slot = None;
                workspace.reset();
                println!("Workspace reset.");
            }
            _ => match command.arg_str("command") {
                Some(name) => println!("Unknown command: /{name}. Type /help for commands."),
                None => println!("Type /help for commands."),
            },
        }
        prompt()?;
    }

    capture.cancel();
    println!("Bye.");
    Ok(())
}

fn spawn_stdin_reader(tx: mpsc::Sender<StudioEvent>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(StudioEvent::Line(line)).is_err() {
                        return;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = tx.send(StudioEvent::Eof);
    });
}

fn prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush()?;
    Ok(())
}

/// First `/capture` for a slot opens the camera; a second one for the same
/// slot takes the photo. Naming another slot supersedes the pending capture.
fn capture_into(
    workspace: &mut Workspace,
    capture: &mut CaptureController,
    capture_slot: &mut Option<Slot>,
    camera: Option<&FrameFileCamera>,
    slot: Slot,
) {
    let Some(device) = camera else {
        report_ingest(
            workspace,
            slot,
            Err(IngestError::CameraUnavailable(
                "no capture device configured (start the studio with --camera-frame)".to_string(),
            )),
        );
        return;
    };
    if capture.is_active() && *capture_slot == Some(slot) {
        *capture_slot = None;
        let outcome = capture.take_photo();
        report_ingest(workspace, slot, outcome);
        return;
    }
    match capture.start(device) {
        Ok(()) => {
            *capture_slot = Some(slot);
            println!(
                "Camera live for {label}. Run /capture {label} again to take the photo, or /cancel_capture.",
                label = slot_label(slot)
            );
        }
        Err(err) => {
            *capture_slot = None;
            report_ingest(workspace, slot, Err(err));
        }
    }
}

fn command_name(command: &StudioCommand) -> &str {
    command
        .raw
        .split_whitespace()
        .next()
        .unwrap_or(command.action.as_str())
}

fn parse_slot_arg(command: &StudioCommand) -> Option<Slot> {
    let raw = command.arg_str("slot").unwrap_or_default();
    match raw.parse::<Slot>() {
        Ok(slot) => Some(slot),
        Err(err) => {
            println!("{} needs a slot: {err}", command_name(command));
            None
        }
    }
}

fn slot_label(slot: Slot) -> &'static str {
    match slot {
        Slot::Target => "identity",
        Slot::Reference => "reference",
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

fn report_ingest(
    workspace: &mut Workspace,
    slot: Slot,
    outcome: std::result::Result<ImageAsset, IngestError>,
) {
    if workspace.ingest(slot, outcome) {
        if let Some(asset) = workspace.slot(slot) {
            println!(
                "Loaded {} into {} ({}, {}).",
                asset.name,
                slot_label(slot),
                asset.mime_type,
                asset.aspect_ratio.unwrap_or_default()
            );
        }
    } else if let Some(message) = workspace.slot_error(slot) {
        println!("Could not load {}: {message}", slot_label(slot));
    }
}

fn toggle_attributes(workspace: &mut Workspace, command: &StudioCommand) {
    let names: Vec<String> = command
        .command_args
        .get("attributes")
        .and_then(|value| value.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|value| value.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if names.is_empty() {
        println!("/toggle requires an attribute (see /attributes)");
        return;
    }
    for name in names {
        let kind = match name.parse::<AttributeKind>() {
            Ok(kind) => kind,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        match workspace.toggle_attribute(kind) {
            Some(true) => println!("+ {}", kind.entry().label),
            Some(false) => println!("- {}", kind.entry().label),
            None => {
                println!("Selection is locked while generating.");
                return;
            }
        }
    }
}

fn not_ready_reason(workspace: &Workspace) -> String {
    match workspace.state() {
        WorkspaceState::Generating => "A generation is already running.".to_string(),
        WorkspaceState::AwaitingSelection => "Select at least one attribute first.".to_string(),
        _ if workspace.target().is_none() => "Load an identity image first.".to_string(),
        _ if workspace.reference().is_none() => "Load a reference image first.".to_string(),
        state => format!("Cannot generate from state {state}."),
    }
}

fn report_generation(workspace: &Workspace) {
    match (workspace.result(), workspace.error()) {
        (Some(result), _) => println!(
            "Result ready ({} chars of image data). Use /save <path> to write it.",
            result.image_url.len()
        ),
        (None, Some(error)) => println!("Generation failed: {error}"),
        (None, None) => {}
    }
}

fn print_attributes(selection: &AttributeSelection) {
    for entry in list_attributes() {
        let marker = if selection.contains(entry.kind) { "[x]" } else { "[ ]" };
        println!(
            "{marker} {:<11} {:<20} {}",
            entry.kind.id(),
            entry.label,
            entry.description
        );
    }
}

fn print_status(workspace: &Workspace, capturing: bool) {
    println!("State: {}", workspace.state());
    for slot in [Slot::Target, Slot::Reference] {
        let summary = workspace
            .slot(slot)
            .map(|asset| {
                format!(
                    "{} ({}, {})",
                    asset.name,
                    asset.mime_type,
                    asset.aspect_ratio.unwrap_or_default()
                )
            })
            .unwrap_or_else(|| "empty".to_string());
        println!("  {:<9} {summary}", slot_label(slot));
        if let Some(error) = workspace.slot_error(slot) {
            println!("            last error: {error}");
        }
    }
    let ids: Vec<&str> = workspace
        .selection()
        .ordered()
        .into_iter()
        .map(AttributeKind::id)
        .collect();
    println!(
        "  attributes {}",
        if ids.is_empty() { "(none)".to_string() } else { ids.join(", ") }
    );
    if let Some(message) = workspace.progress_message() {
        println!("  {message}");
    }
    if let Some(result) = workspace.result() {
        println!(
            "  result    ready at {} (comparison {}, fullscreen {})",
            result.timestamp,
            on_off(workspace.comparison()),
            on_off(workspace.fullscreen())
        );
    }
    if let Some(error) = workspace.error() {
        println!("  error     {error}");
    }
    if capturing {
        println!("  camera    live");
    }
}
