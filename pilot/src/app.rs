use crate::error::Error;
use backend::config::Config;
use backend::control::Task;
use backend::protocol::Session;
use clap::Parser;
use std::io;
use std::path::PathBuf;
use tracing::info;

/// Steers the turret from frame paths read on stdin, one command per frame.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Args {
    /// Task number (0 identify, 1 track, 2 settle, 3 avoid)
    #[arg(value_parser = parse_task)]
    task: Option<Task>,

    /// Debug flag announced in the handshake (true, 1 or yes)
    debug: Option<String>,

    /// TOML file with session and field settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Leave consumed frames on disk
    #[arg(long)]
    keep_frames: bool,

    /// Answer NOOP when a frame cannot be read
    #[arg(long)]
    noop_on_failure: bool,

    /// Log per-frame decisions
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_task(s: &str) -> Result<Task, String> {
    let n: u8 = s.parse().map_err(|_| format!("{s:?} is not a task number"))?;
    Task::try_from(n).map_err(|err| err.to_string())
}

fn parse_flag(s: &str) -> bool {
    matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

pub(crate) struct App {
    config: Config,
}

impl App {
    pub fn new(args: &Args) -> Result<Self, Error> {
        let mut config = match &args.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(task) = args.task {
            config.task = task;
        }
        if let Some(debug) = &args.debug {
            config.debug = parse_flag(debug);
        }
        if args.keep_frames {
            config.discard_consumed = false;
        }
        if args.noop_on_failure {
            config.noop_on_failure = true;
        }
        config.validate()?;

        Ok(Self { config })
    }

    pub fn run(self) -> Result<(), Error> {
        let stdin = io::stdin().lock();
        let stdout = io::stdout().lock();
        let mut session = Session::new(stdin, stdout, &self.config);

        session.handshake().map_err(Error::Handshake)?;
        let stats = session.serve()?;
        info!(frames = stats.frames, "done");
        Ok(())
    }
}
