pub mod shell;

use clap::{Arg, ArgMatches, Command};

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    build_command().get_matches()
}

pub fn build_command() -> Command {
    Command::new("chatter")
        .about("Publish a counter on chat-out and mirror chat-in into a log")
        .arg(
            Arg::new("master")
                .long("master")
                .short('m')
                .help("Master URL, e.g. mqtt://localhost:1883 (requires --host)")
                .value_name("URL")
                .requires("host"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .help("Hostname this node announces (requires --master)")
                .value_name("HOST")
                .requires("master"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Worker configuration file (TOML)")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("loopback")
                .long("loopback")
                .help("Use the in-process broker, routing chat-out back into chat-in")
                .action(clap::ArgAction::SetTrue)
                .conflicts_with_all(["master", "host"]),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Print log rows as JSON lines")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("remap")
                .help("Discovery overrides such as __master:=mqtt://host:1883")
                .value_name("NAME:=VALUE")
                .num_args(0..),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_requires_host() {
        let result = build_command().try_get_matches_from(["chatter", "--master", "mqtt://x"]);
        assert!(result.is_err());

        let matches = build_command()
            .try_get_matches_from(["chatter", "--master", "mqtt://x", "--host", "desk"])
            .unwrap();
        assert_eq!(
            matches.get_one::<String>("master").map(String::as_str),
            Some("mqtt://x")
        );
    }

    #[test]
    fn test_remap_arguments_are_collected() {
        let matches = build_command()
            .try_get_matches_from(["chatter", "--loopback", "__hostname:=desk", "a:=b"])
            .unwrap();
        let remaps: Vec<&String> = matches.get_many::<String>("remap").unwrap().collect();
        assert_eq!(remaps.len(), 2);
        assert!(matches.get_flag("loopback"));
    }
}
