use clap::{Arg, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command, env_name: &'static str) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env(env_name)
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_level(value: &str) -> Result<Option<u8>, clap::Error> {
        temp_env::with_var("T_LOG_LEVEL", Some(value), || {
            let command = with_args(Command::new("t"), "T_LOG_LEVEL");
            let matches = command.try_get_matches_from(vec!["t"])?;
            Ok(matches.get_one::<u8>(ARG_VERBOSITY).copied())
        })
    }

    #[test]
    fn named_levels_map_to_counts() {
        for (name, expected) in [
            ("error", 0u8),
            ("warn", 1),
            ("info", 2),
            ("debug", 3),
            ("trace", 4),
        ] {
            assert_eq!(parse_level(name).expect("parse"), Some(expected), "{name}");
        }
    }

    #[test]
    fn numeric_levels_pass_through() {
        assert_eq!(parse_level("3").expect("parse"), Some(3));
    }

    #[test]
    fn junk_is_rejected() {
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn repeated_flag_counts() {
        let command = with_args(Command::new("t"), "T_LOG_LEVEL_UNSET");
        let matches = command
            .try_get_matches_from(vec!["t", "-vvv"])
            .expect("parse");
        assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(3));
    }
}
