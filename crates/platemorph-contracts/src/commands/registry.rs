#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose single argument is an image source (path or URL).
pub(crate) const SOURCE_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "identity",
        action: "load_identity",
    },
    CommandSpec {
        command: "target",
        action: "load_identity",
    },
    CommandSpec {
        command: "reference",
        action: "load_reference",
    },
    CommandSpec {
        command: "save",
        action: "save_result",
    },
];

/// Commands that name a slot.
pub(crate) const SLOT_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "capture",
        action: "capture",
    },
    CommandSpec {
        command: "clear",
        action: "clear_slot",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "cancel_capture",
        action: "cancel_capture",
    },
    CommandSpec {
        command: "attributes",
        action: "list_attributes",
    },
    CommandSpec {
        command: "swap",
        action: "swap",
    },
    CommandSpec {
        command: "generate",
        action: "generate",
    },
    CommandSpec {
        command: "compare",
        action: "toggle_comparison",
    },
    CommandSpec {
        command: "fullscreen",
        action: "toggle_fullscreen",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub(crate) const TOGGLE_COMMAND: CommandSpec = CommandSpec {
    command: "toggle",
    action: "toggle_attribute",
};

pub const STUDIO_HELP_COMMANDS: &[&str] = &[
    "/identity <path|url>",
    "/reference <path|url>",
    "/capture identity|reference",
    "/cancel_capture",
    "/clear identity|reference",
    "/toggle <attribute>",
    "/attributes",
    "/swap",
    "/generate",
    "/compare",
    "/fullscreen",
    "/save <path>",
    "/status",
    "/reset",
    "/quit",
];
