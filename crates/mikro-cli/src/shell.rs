//! Kernel shell: line parsing and command dispatch.
//!
//! The manual is data-driven: every command carries its own usage text,
//! shown by `help` and by `<command> -h`.

use mikro_kernel::{EventArgs, Kernel};
use serde_json::Value;
use std::io::Write;
use std::time::Duration;

/// Shell prompt.
pub const PROMPT: &str = "mikro> ";

/// Advisory timeout for `emit`'s synchronous dispatch.
const EMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-command manual entries.
pub const CMD_MANUAL: &[(&str, &str)] = &[
    (
        "list",
        "usage: list\nLists every registered plugin with version and state.",
    ),
    ("load", "usage: load <name>\nLoads a discovered plugin."),
    (
        "stop",
        "usage: stop <name>\nStops and unloads a running plugin.",
    ),
    (
        "reload",
        "usage: reload <name>\nHot-reloads a plugin and every plugin depending on it.",
    ),
    (
        "emit",
        "usage: emit <event> [key=value ...]\nSynchronously dispatches an event and prints the result list.\nValues parse as JSON (42, true, \"text\"); anything unparseable\nis taken as a plain string, and a bare key means key=true.",
    ),
    ("data", "usage: data\nPrints the global context as JSON."),
    ("help", "usage: help\nLists the available commands."),
    ("cls", "usage: cls\nClears the screen."),
    (
        "exit",
        "usage: exit\nStops every plugin and leaves the shell.",
    ),
];

/// A parsed shell command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `list`
    List,
    /// `load <name>`
    Load(String),
    /// `stop <name>`
    Stop(String),
    /// `reload <name>`
    Reload(String),
    /// `emit <event> [k=v ...]`
    Emit {
        /// Event name.
        event: String,
        /// Keyword arguments.
        args: EventArgs,
    },
    /// `data`
    Data,
    /// `help`
    Help,
    /// `cls`
    Cls,
    /// `exit`
    Exit,
}

/// Result of parsing one input line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// Blank input.
    Empty,
    /// `<command> -h`: show this manual text.
    Manual(&'static str),
    /// A runnable command.
    Run(Command),
    /// Known command, required argument missing.
    MissingArg(&'static str),
    /// Not a command.
    Unknown(String),
}

fn manual_for(cmd: &str) -> Option<&'static str> {
    CMD_MANUAL
        .iter()
        .find(|(name, _)| *name == cmd)
        .map(|(_, text)| *text)
}

/// Parses one line of shell input.
#[must_use]
pub fn parse_line(line: &str) -> ParseOutcome {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return ParseOutcome::Empty;
    };
    let cmd = cmd.to_ascii_lowercase();
    let rest: Vec<&str> = parts.collect();

    // Help interception: `<command> -h` / `--help`.
    if matches!(rest.first(), Some(&"-h") | Some(&"--help")) {
        return match manual_for(&cmd) {
            Some(text) => ParseOutcome::Manual(text),
            None => ParseOutcome::Unknown(cmd),
        };
    }

    match cmd.as_str() {
        "list" => ParseOutcome::Run(Command::List),
        "data" => ParseOutcome::Run(Command::Data),
        "help" | "?" => ParseOutcome::Run(Command::Help),
        "cls" | "clear" => ParseOutcome::Run(Command::Cls),
        "exit" | "quit" => ParseOutcome::Run(Command::Exit),
        "load" => match rest.first() {
            Some(name) => ParseOutcome::Run(Command::Load((*name).to_string())),
            None => ParseOutcome::MissingArg("load"),
        },
        "stop" => match rest.first() {
            Some(name) => ParseOutcome::Run(Command::Stop((*name).to_string())),
            None => ParseOutcome::MissingArg("stop"),
        },
        "reload" => match rest.first() {
            Some(name) => ParseOutcome::Run(Command::Reload((*name).to_string())),
            None => ParseOutcome::MissingArg("reload"),
        },
        "emit" => match rest.split_first() {
            Some((event, kv)) => ParseOutcome::Run(Command::Emit {
                event: (*event).to_string(),
                args: parse_kv_args(kv),
            }),
            None => ParseOutcome::MissingArg("emit"),
        },
        other => ParseOutcome::Unknown(other.to_string()),
    }
}

/// Parses `key=value` tokens into event arguments.
///
/// Values go through the JSON parser first, so numbers, booleans, and
/// quoted strings come out typed; anything else stays a string. A token
/// without `=` becomes a boolean flag.
#[must_use]
pub fn parse_kv_args(tokens: &[&str]) -> EventArgs {
    let mut args = EventArgs::new();
    for token in tokens {
        match token.split_once('=') {
            Some((key, raw)) => {
                let value = serde_json::from_str(raw)
                    .unwrap_or_else(|_| Value::String(raw.to_string()));
                args.insert(key.to_string(), value);
            }
            None => {
                args.insert((*token).to_string(), Value::Bool(true));
            }
        }
    }
    args
}

/// Dispatches shell commands against a kernel.
pub struct Shell<'a> {
    kernel: &'a Kernel,
}

impl<'a> Shell<'a> {
    /// Wraps a kernel.
    #[must_use]
    pub fn new(kernel: &'a Kernel) -> Self {
        Self { kernel }
    }

    /// Parses and runs one line. Returns `false` when the shell should
    /// exit.
    pub fn dispatch(&self, line: &str) -> bool {
        match parse_line(line) {
            ParseOutcome::Empty => true,
            ParseOutcome::Manual(text) => {
                println!("{text}");
                true
            }
            ParseOutcome::MissingArg(cmd) => {
                println!("missing argument; try '{cmd} -h'");
                true
            }
            ParseOutcome::Unknown(cmd) => {
                println!("unknown command {cmd:?}; type 'help' for the list");
                true
            }
            ParseOutcome::Run(command) => self.run(command),
        }
    }

    fn run(&self, command: Command) -> bool {
        match command {
            Command::List => {
                let plugins = self.kernel.plugins();
                if plugins.is_empty() {
                    println!("no plugins registered");
                }
                for plugin in plugins {
                    let state = if plugin.active { "ACTIVE" } else { "STOPPED" };
                    println!("{:<24} {:<12} {state}", plugin.name, plugin.version.to_string());
                }
            }
            Command::Load(name) => match self.kernel.load(&name) {
                Ok(()) => println!("[+] {name} is ready"),
                Err(e) => println!("[!] {e}"),
            },
            Command::Stop(name) => {
                if self.kernel.unload(&name) {
                    println!("[-] {name} stopped and unloaded");
                } else {
                    println!("[!] {name} is not running");
                }
            }
            Command::Reload(name) => match self.kernel.reload(&name) {
                Ok(()) => println!("[+] {name} reloaded"),
                Err(e) => println!("[!] {e}"),
            },
            Command::Emit { event, args } => {
                let results = self.kernel.call(&event, args, Some(EMIT_TIMEOUT));
                if results.is_empty() {
                    println!("no subscribers for {event:?}");
                }
                for (idx, result) in results.iter().enumerate() {
                    match result {
                        Ok(value) => println!("[{idx}] {value}"),
                        Err(e) => println!("[{idx}] error: {e}"),
                    }
                }
            }
            Command::Data => {
                match serde_json::to_string_pretty(&Value::Object(self.kernel.global_data())) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(e) => println!("[!] cannot render context: {e}"),
                }
            }
            Command::Help => {
                let names: Vec<&str> = CMD_MANUAL.iter().map(|(name, _)| *name).collect();
                println!("available commands: {}", names.join(", "));
                println!("try '<command> -h' for details");
            }
            Command::Cls => {
                print!("\x1b[2J\x1b[1;1H");
                let _ = std::io::stdout().flush();
            }
            Command::Exit => return false,
        }
        true
    }
}
