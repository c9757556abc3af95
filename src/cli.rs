//! Command-line handling.
//!
//! Parsing never aborts: every argument clap rejects is reported as a
//! diagnostic and removed, then the remaining arguments are parsed again.

use std::time::Duration;

use clap::builder::NonEmptyStringValueParser;
use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{Arg, ArgAction, CommandFactory, FromArgMatches, Parser};

use crate::source::{Backend, DEFAULT_SEAT};
use crate::tracer::MIN_INTERVAL;

pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (alpha)");

const WARNING: &str = "Warning: This is the backend and is not designed to run by users. \
                       You should run the frontend of TypeTrace which will run this.";

/// The backend of TypeTrace
#[derive(Parser, Debug)]
#[command(name = "typetrace-backend")]
#[command(version = VERSION, disable_version_flag = true)]
#[command(about = "The backend of TypeTrace", long_about = None)]
#[command(after_help = WARNING)]
struct Args {
    /// Seat to read keyboards from
    #[arg(short, long, value_name = "NAME", default_value = DEFAULT_SEAT,
          value_parser = NonEmptyStringValueParser::new())]
    seat: String,

    /// Pause between two polls in milliseconds
    #[arg(short, long, value_name = "MS", default_value_t = MIN_INTERVAL.as_millis() as u64,
          value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Input backend, libinput or evdev
    #[arg(short, long, value_name = "NAME", default_value_t = Backend::default())]
    backend: Backend,

    #[arg(hide = true)]
    unexpected: Vec<String>,
}

/// Runtime settings of the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The seat to read keyboards from.
    pub seat: String,
    /// The pause between two iterations of the run loop.
    pub interval: Duration,
    pub backend: Backend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seat: DEFAULT_SEAT.to_owned(),
            interval: MIN_INTERVAL,
            backend: Backend::default(),
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            seat: args.seat,
            interval: Duration::from_millis(args.interval),
            backend: args.backend,
        }
    }
}

/// What the process was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(Config),
    Help,
    Version,
}

/// The outcome of [`parse_args`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArgs {
    pub command: Command,
    /// One message per problem found, for the diagnostic channel.
    pub diagnostics: Vec<String>,
}

fn command(program: &str) -> clap::Command {
    Args::command().bin_name(program.to_owned()).arg(
        Arg::new("version")
            .short('v')
            .long("version")
            .action(ArgAction::Version)
            .help("Print version"),
    )
}

/// Parse the arguments following the program name.
///
/// The first `-h`/`--help` or `-v`/`--version` wins.
pub fn parse_args<I, S>(program: &str, args: I) -> ParsedArgs
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut args: Vec<String> = args.into_iter().map(Into::into).collect();
    let mut diagnostics = Vec::new();

    let done = |command, diagnostics| ParsedArgs {
        command,
        diagnostics,
    };

    loop {
        let argv = std::iter::once(program).chain(args.iter().map(String::as_str));
        let err = match command(program)
            .try_get_matches_from(argv)
            .and_then(|matches| Args::from_arg_matches(&matches))
        {
            Ok(parsed) => {
                diagnostics.extend(
                    parsed
                        .unexpected
                        .iter()
                        .map(|a| format!("{program}: Unexpected argument `{a}`.")),
                );
                return done(Command::Run(parsed.into()), diagnostics);
            }
            Err(err) => err,
        };

        match err.kind() {
            ErrorKind::DisplayHelp => return done(Command::Help, diagnostics),
            ErrorKind::DisplayVersion => return done(Command::Version, diagnostics),
            _ => {
                diagnostics.push(diagnostic(program, &err));
                if !remove_rejected(&mut args, &err) {
                    return done(Command::Run(Config::default()), diagnostics);
                }
            }
        }
    }
}

/// The first line of a clap error, without clap's `error: ` prefix.
fn diagnostic(program: &str, err: &clap::Error) -> String {
    let rendered = err.render().to_string();
    let line = rendered.lines().next().unwrap_or_default();

    format!("{program}: {}", line.trim_start_matches("error: "))
}

/// Remove the argument `err` blames from `args`, with its value if it has one.
///
/// Returns `false` when the argument cannot be found.
fn remove_rejected(args: &mut Vec<String>, err: &clap::Error) -> bool {
    let Some(ContextValue::String(invalid)) = err.get(ContextKind::InvalidArg) else {
        return false;
    };
    // Value errors name the option with its value name: `--seat <NAME>`.
    let name = invalid.split_whitespace().next().unwrap_or(invalid);
    let unknown = err.kind() == ErrorKind::UnknownArgument;

    let definition = Args::command();
    let (long, short) = match name.strip_prefix("--") {
        Some(long) => {
            let short = definition
                .get_arguments()
                .find(|arg| arg.get_long() == Some(long))
                .and_then(Arg::get_short);
            (Some(long), short)
        }
        None => (None, name.strip_prefix('-').and_then(|s| s.chars().next())),
    };
    let value_shorts: Vec<char> = definition
        .get_arguments()
        .filter(|arg| arg.get_action().takes_values())
        .filter_map(Arg::get_short)
        .collect();

    for i in 0..args.len() {
        let token = args[i].as_str();
        if token == "--" {
            break;
        }

        if let Some(long) = long {
            if token.strip_prefix("--").and_then(|t| t.strip_prefix(long)) == Some("") {
                let end = if !unknown && i + 1 < args.len() { i + 2 } else { i + 1 };
                args.drain(i..end);
                return true;
            }
            if token.starts_with(&format!("--{long}=")) {
                args.remove(i);
                return true;
            }
        }

        let (Some(short), Some(cluster)) = (short, token.strip_prefix('-')) else {
            continue;
        };
        if cluster.starts_with('-') {
            continue;
        }

        // Only the letters up to the first option taking a value are options.
        let mut offset = None;
        for (at, c) in cluster.char_indices() {
            if c == short {
                offset = Some(at);
                break;
            }
            if value_shorts.contains(&c) {
                break;
            }
        }
        let Some(at) = offset else {
            continue;
        };

        let mut rest = cluster.to_owned();
        if unknown {
            rest.remove(at);
        } else {
            let inline_value = at + short.len_utf8() < cluster.len();
            rest.truncate(at);
            if !inline_value && i + 1 < args.len() {
                args.remove(i + 1);
            }
        }

        if rest.is_empty() {
            args.remove(i);
        } else {
            args[i] = format!("-{rest}");
        }
        return true;
    }

    false
}

/// The text printed for `--help`.
pub fn help(program: &str) -> String {
    command(program).render_help().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ParsedArgs {
        parse_args("typetrace-backend", args.iter().copied())
    }

    fn config(parsed: &ParsedArgs) -> &Config {
        match &parsed.command {
            Command::Run(config) => config,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn definition_is_consistent() {
        command("typetrace-backend").debug_assert();
    }

    #[test]
    fn no_arguments_runs_with_defaults() {
        let parsed = parse(&[]);

        assert_eq!(parsed.command, Command::Run(Config::default()));
        assert!(parsed.diagnostics.is_empty());
    }

    #[test]
    fn help_and_version() {
        assert_eq!(parse(&["-h"]).command, Command::Help);
        assert_eq!(parse(&["--help"]).command, Command::Help);
        assert_eq!(parse(&["-v"]).command, Command::Version);
        assert_eq!(parse(&["--version"]).command, Command::Version);
    }

    #[test]
    fn version_carries_the_release_stage() {
        assert_eq!(VERSION, "0.1.0 (alpha)");
    }

    #[test]
    fn first_of_help_or_version_wins() {
        assert_eq!(parse(&["-vh"]).command, Command::Version);
        assert_eq!(parse(&["-h", "-v"]).command, Command::Help);
        assert_eq!(parse(&["--version", "--help"]).command, Command::Version);
    }

    #[test]
    fn invalid_options_do_not_abort_parsing() {
        let parsed = parse(&["-x", "--frobnicate", "-v"]);

        assert_eq!(parsed.command, Command::Version);
        assert_eq!(parsed.diagnostics.len(), 2);
        assert!(parsed.diagnostics[0].starts_with("typetrace-backend: "));
        assert!(parsed.diagnostics[0].contains("'-x'"), "{:?}", parsed.diagnostics);
        assert!(parsed.diagnostics[1].contains("'--frobnicate'"), "{:?}", parsed.diagnostics);
    }

    #[test]
    fn invalid_short_in_a_cluster_is_skipped() {
        let parsed = parse(&["-qs", "seat1"]);

        assert_eq!(parsed.diagnostics.len(), 1);
        assert!(parsed.diagnostics[0].contains("'-q'"));
        assert_eq!(config(&parsed).seat, "seat1");
    }

    #[test]
    fn value_options() {
        let parsed = parse(&["--seat", "seat1", "-i250", "--backend=evdev"]);

        assert!(parsed.diagnostics.is_empty());
        assert_eq!(
            parsed.command,
            Command::Run(Config {
                seat: "seat1".into(),
                interval: Duration::from_millis(250),
                backend: Backend::Evdev,
            })
        );
    }

    #[test]
    fn bad_values_keep_the_defaults() {
        let parsed = parse(&["--interval", "0", "-b", "x11", "--seat="]);

        assert_eq!(parsed.command, Command::Run(Config::default()));
        assert_eq!(parsed.diagnostics.len(), 3, "{:?}", parsed.diagnostics);
        assert!(parsed.diagnostics[0].contains("'0'"));
        assert!(parsed.diagnostics[1].contains("unknown backend `x11`"));
        assert!(parsed.diagnostics[2].contains("--seat"));
    }

    #[test]
    fn bad_value_does_not_hide_later_options() {
        let parsed = parse(&["-i0", "-s", "seat1"]);

        assert_eq!(parsed.diagnostics.len(), 1);
        assert_eq!(config(&parsed).seat, "seat1");
        assert_eq!(config(&parsed).interval, MIN_INTERVAL);
    }

    #[test]
    fn missing_value_is_reported() {
        let parsed = parse(&["--seat"]);

        assert_eq!(parsed.command, Command::Run(Config::default()));
        assert_eq!(parsed.diagnostics.len(), 1);
        assert!(parsed.diagnostics[0].contains("--seat"));
    }

    #[test]
    fn positional_arguments_are_reported() {
        let parsed = parse(&["seat0", "--", "-v"]);

        assert_eq!(parsed.command, Command::Run(Config::default()));
        assert_eq!(
            parsed.diagnostics,
            [
                "typetrace-backend: Unexpected argument `seat0`.",
                "typetrace-backend: Unexpected argument `-v`.",
            ]
        );
    }

    #[test]
    fn help_mentions_every_option() {
        let text = help("typetrace-backend");

        assert!(text.starts_with("The backend of TypeTrace"));
        assert!(text.contains("not designed to run by users"));
        for option in ["--help", "--version", "--seat", "--interval", "--backend"] {
            assert!(text.contains(option), "missing {option}");
        }
    }
}
