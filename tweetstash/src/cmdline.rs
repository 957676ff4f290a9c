use std::time::Duration;

use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use tweetstash_core::config::Settings;

pub(super) const RUN_SUBCOMMAND: &str = "run";
const RUN_DURATION_SECS: &str = "run-duration-secs";
const FLUSH_ON_SHUTDOWN: &str = "flush-on-shutdown";

pub(super) fn root_cli() -> Command {
    Command::new("tweetstash")
        .about("Archives a keyword-filtered stream of posts into object storage")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(add_run_subcommand())
}

fn add_run_subcommand() -> Command {
    Command::new(RUN_SUBCOMMAND)
        .about("Stream and archive until the run duration elapses or the process is signalled")
        .arg(
            Arg::new(RUN_DURATION_SECS)
                .long(RUN_DURATION_SECS)
                .value_name("SECS")
                .value_parser(value_parser!(u64))
                .help("How long to stream before shutting down [env: TWEETSTASH_RUN_DURATION_SECS]"),
        )
        .arg(
            Arg::new(FLUSH_ON_SHUTDOWN)
                .long(FLUSH_ON_SHUTDOWN)
                .action(ArgAction::SetTrue)
                .help("Archive the partial batch left at shutdown instead of dropping it"),
        )
}

/// Flags given on the command line take precedence over the environment.
pub(super) fn apply_run_args(settings: &mut Settings, args: &ArgMatches) {
    if let Some(secs) = args.get_one::<u64>(RUN_DURATION_SECS) {
        settings.run_duration = Duration::from_secs(*secs);
    }
    if args.get_flag(FLUSH_ON_SHUTDOWN) {
        settings.flush_on_shutdown = true;
    }
}
