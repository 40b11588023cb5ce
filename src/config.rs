use clap::Parser;
use std::path::PathBuf;

/// Sidecar daemon for the schoolbook desktop app. Speaks JSON lines on stdin/stdout.
#[derive(Debug, Parser)]
#[command(name = "schoolbookd", version, about)]
pub struct Config {
    /// Workspace directory to open at start-up, before any `workspace.select`.
    #[arg(long, env = "SCHOOLBOOK_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Log filter directive, e.g. `info` or `schoolbookd=debug`.
    #[arg(long = "log", env = "SCHOOLBOOK_LOG", default_value = "info")]
    pub log_filter: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let cfg = Config::parse_from(["schoolbookd", "--workspace", "/tmp/ws", "--log", "debug"]);
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(cfg.log_filter, "debug");
    }
}
