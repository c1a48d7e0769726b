//! Minimal CLI parsing for run mode overrides.

use std::env;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    /// Run the archive workflow once and exit instead of scheduling it
    pub run_once: bool,
    pub schedule_override: Option<String>,
}

impl CliOptions {
    pub fn from_args() -> Self {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut options = CliOptions::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--once" => options.run_once = true,
                "--schedule" => {
                    if let Some(value) = args.next() {
                        options.schedule_override = Some(value);
                    }
                }
                _ if arg.starts_with("--schedule=") => {
                    if let Some(value) = arg.split_once('=').map(|(_, v)| v) {
                        options.schedule_override = Some(value.to_string());
                    }
                }
                _ => {}
            }
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliOptions {
        CliOptions::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_defaults() {
        assert_eq!(parse(&[]), CliOptions::default());
    }

    #[test]
    fn test_flags() {
        let options = parse(&["--once", "--schedule", "0 30 2 * * *"]);
        assert!(options.run_once);
        assert_eq!(options.schedule_override.as_deref(), Some("0 30 2 * * *"));

        let options = parse(&["--schedule=0 0 4 * * Sun", "--verbose"]);
        assert!(!options.run_once);
        assert_eq!(options.schedule_override.as_deref(), Some("0 0 4 * * Sun"));
    }
}
