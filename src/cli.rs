use std::ffi::OsString;

use clap::{ArgAction, Parser};

pub const NAME: &str = "lineage";

#[derive(Parser, Debug, Clone)]
#[clap(name = NAME)]
#[clap(about = "Print the process tree with the ancestry of every process")]
#[clap(version = crate::metadata::VERSION)]
#[clap(disable_help_subcommand = true)]
pub struct LineageOpts {
    #[clap(long)]
    pub config_file: Option<String>,

    /// Only print the ancestry of this process
    #[clap(long)]
    pub pid: Option<i32>,

    /// Pass many times for a more verbose output. Passing `-v` adds debug logs, `-vv` enables trace logging
    #[clap(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl LineageOpts {
    pub fn log_level(&self) -> log::LevelFilter {
        log_level_from_verbosity_flag_count(self.verbose)
    }
}

pub fn parse_from_args() -> LineageOpts {
    parse_from(std::env::args_os())
}

pub fn parse_from<I, T>(args: I) -> LineageOpts
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    try_parse_from(args).unwrap_or_else(|e| e.exit())
}

pub fn try_parse_from<I, T>(args: I) -> Result<LineageOpts, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    LineageOpts::try_parse_from(args)
}

fn log_level_from_verbosity_flag_count(num: u8) -> log::LevelFilter {
    match num {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        2..=u8::MAX => log::LevelFilter::Trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = try_parse_from(["lineage"]).unwrap();
        assert_eq!(options.config_file, None);
        assert_eq!(options.pid, None);
        assert_eq!(options.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn options() {
        let options =
            try_parse_from(["lineage", "--config-file", "/tmp/l.ini", "--pid", "42", "-vv"])
                .unwrap();
        assert_eq!(options.config_file.as_deref(), Some("/tmp/l.ini"));
        assert_eq!(options.pid, Some(42));
        assert_eq!(options.log_level(), log::LevelFilter::Trace);
        assert_eq!(
            try_parse_from(["lineage", "-v"]).unwrap().log_level(),
            log::LevelFilter::Debug
        );
    }

    #[test]
    fn invalid_pid() {
        assert!(try_parse_from(["lineage", "--pid", "init"]).is_err());
    }
}
