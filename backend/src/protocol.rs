//! Line protocol with the driving process.
//!
//! After the handshake every non-blank input line names an image file and is
//! answered by at most one command line: exactly one when the frame loads,
//! none (or `NOOP`, if configured) when it does not. Diagnostics go through
//! `tracing` and never touch the command stream.

use crate::command::Command;
use crate::config::Config;
use crate::control::Task;
use crate::cv::Frame;
use crate::Turret;
use std::io::{self, BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Emitted(Command),
    /// The frame could not be processed; no command was decided.
    Dropped,
}

/// Side effects run after each turn, outside the control path.
pub trait TurnHook {
    fn after_turn(&mut self, path: &Path, outcome: Outcome);
}

/// Deletes consumed `.png` frames so a long stream cannot fill the disk.
pub struct DiscardConsumed;

impl TurnHook for DiscardConsumed {
    fn after_turn(&mut self, path: &Path, _outcome: Outcome) {
        let is_png = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        if !is_png || !path.exists() {
            return;
        }

        if let Err(err) = std::fs::remove_file(path) {
            debug!(path = %path.display(), %err, "could not discard frame");
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Non-blank input lines seen.
    pub frames: u64,
    /// Command lines written.
    pub emitted: u64,
    pub dropped: u64,
}

pub struct Session<R, W> {
    input: R,
    output: W,
    turret: Turret,
    debug: bool,
    identity: Vec<String>,
    noop_on_failure: bool,
    progress_interval: u64,
    hooks: Vec<Box<dyn TurnHook>>,
    stats: Stats,
}

impl<R: BufRead, W: Write> Session<R, W> {
    pub fn new(input: R, output: W, config: &Config) -> Self {
        let mut hooks: Vec<Box<dyn TurnHook>> = Vec::new();
        if config.discard_consumed {
            hooks.push(Box::new(DiscardConsumed));
        }

        Self {
            input,
            output,
            turret: Turret::new(config.task, &config.field),
            debug: config.debug,
            identity: config.identity.clone(),
            noop_on_failure: config.noop_on_failure,
            progress_interval: config.progress_interval,
            hooks,
            stats: Stats::default(),
        }
    }

    pub fn with_hook(mut self, hook: impl TurnHook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn handshake(&mut self) -> crate::Result<()> {
        let task = self.turret.task();
        writeln!(self.output, "debug={}", self.debug)?;
        writeln!(self.output, "task {task}")?;
        if task == Task::Identify {
            for line in &self.identity {
                writeln!(self.output, "{line}")?;
            }
        }
        self.output.flush()?;

        info!(%task, debug = self.debug, "handshake sent");
        Ok(())
    }

    /// Handshake, then serve frames until the input closes.
    pub fn run(&mut self) -> crate::Result<Stats> {
        self.handshake()?;
        self.serve()
    }

    /// Only a failing input stream ends the session early; a reply that
    /// cannot be written costs that turn alone.
    pub fn serve(&mut self) -> crate::Result<Stats> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.input.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                    warn!(%err, "skipping undecodable input line");
                    continue;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }

            let path = line.trim();
            if path.is_empty() {
                continue;
            }
            self.turn(Path::new(path));
        }

        info!(
            frames = self.stats.frames,
            emitted = self.stats.emitted,
            dropped = self.stats.dropped,
            "input closed, exiting"
        );
        Ok(self.stats)
    }

    /// Processes one frame path; never fails, whatever happens to the frame.
    pub fn turn(&mut self, path: &Path) -> Outcome {
        self.stats.frames += 1;
        let frame_no = self.stats.frames;
        if self.progress_interval > 0 && frame_no % self.progress_interval == 0 {
            info!(frames = frame_no, "progress");
        }

        let turret = &self.turret;
        let mut outcome = match panic::catch_unwind(AssertUnwindSafe(|| aim_at(turret, path))) {
            Ok(Ok(command)) => Outcome::Emitted(command),
            Ok(Err(err)) => {
                warn!(frame = frame_no, path = %path.display(), %err, "frame dropped");
                Outcome::Dropped
            }
            Err(_) => {
                warn!(frame = frame_no, path = %path.display(), "frame processing panicked, dropped");
                Outcome::Dropped
            }
        };

        let reply = match outcome {
            Outcome::Emitted(command) => Some(command),
            Outcome::Dropped => {
                self.stats.dropped += 1;
                self.noop_on_failure.then_some(Command::Noop)
            }
        };
        if let Some(command) = reply {
            match self.reply(command) {
                Ok(()) => self.stats.emitted += 1,
                Err(err) => {
                    warn!(frame = frame_no, %command, %err, "reply could not be written");
                    if outcome != Outcome::Dropped {
                        self.stats.dropped += 1;
                        outcome = Outcome::Dropped;
                    }
                }
            }
        }

        for hook in &mut self.hooks {
            hook.after_turn(path, outcome);
        }

        outcome
    }

    fn reply(&mut self, command: Command) -> io::Result<()> {
        writeln!(self.output, "{command}")?;
        self.output.flush()
    }
}

/// The frame lives only inside this call.
fn aim_at(turret: &Turret, path: &Path) -> crate::Result<Command> {
    let frame = Frame::open(path)?;
    let aim = turret.aim(&frame)?;
    debug!(
        path = %path.display(),
        target = ?aim.target.as_ref().and_then(|b| b.position),
        obstacle = ?aim.obstacle.as_ref().and_then(|b| b.position),
        vx = aim.steering.vx,
        vy = aim.steering.vy,
        distance = aim.steering.distance,
        command = %aim.command,
        "frame processed"
    );
    Ok(aim.command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Point, Scalar, Vector, CV_8UC3};
    use opencv::imgcodecs::imwrite;
    use opencv::imgproc::{circle, LINE_8};
    use opencv::prelude::Mat;
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::rc::Rc;

    fn config(task: Task) -> Config {
        Config {
            task,
            discard_consumed: false,
            ..Config::default()
        }
    }

    fn output_lines(out: &[u8]) -> Vec<String> {
        String::from_utf8(out.to_vec())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    fn red_dot(dir: &Path, name: &str, x: i32, y: i32) -> PathBuf {
        let gray = Scalar::new(30., 30., 30., 0.);
        let mut mat = Mat::new_rows_cols_with_default(480, 640, CV_8UC3, gray).unwrap();
        let red = Scalar::new(20., 20., 230., 0.);
        circle(&mut mat, Point::new(x, y), 15, red, -1, LINE_8, 0).unwrap();

        let path = dir.join(name);
        imwrite(path.to_str().unwrap(), &mat, &Vector::new()).unwrap();
        path
    }

    /// Refuses the first write that starts with `token`, then behaves.
    struct FailsOnce<'a> {
        out: &'a mut Vec<u8>,
        token: &'static [u8],
        failed: bool,
    }

    impl Write for FailsOnce<'_> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if !self.failed && buf.starts_with(self.token) {
                self.failed = true;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
            }
            self.out.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Vec<Outcome>>>);

    impl TurnHook for Recorder {
        fn after_turn(&mut self, _path: &Path, outcome: Outcome) {
            self.0.borrow_mut().push(outcome);
        }
    }

    #[test]
    fn handshake_announces_debug_and_task() {
        let mut out = Vec::new();
        let cfg = Config { debug: false, ..config(Task::Settle) };
        Session::new(Cursor::new(""), &mut out, &cfg).run().unwrap();
        assert_eq!(output_lines(&out), vec!["debug=false", "task 2"]);
    }

    #[test]
    fn identify_task_sends_identity_lines() {
        let mut out = Vec::new();
        let cfg = Config {
            identity: vec!["Team Vega".into(), "2025-017".into()],
            ..config(Task::Identify)
        };
        Session::new(Cursor::new(""), &mut out, &cfg).run().unwrap();
        assert_eq!(
            output_lines(&out),
            vec!["debug=true", "task 0", "Team Vega", "2025-017"]
        );
    }

    #[test]
    fn blank_lines_take_no_turn() {
        let mut out = Vec::new();
        let mut session = Session::new(Cursor::new("\n   \n\r\n"), &mut out, &config(Task::Track));
        let stats = session.run().unwrap();
        assert_eq!(stats, Stats::default());
        drop(session);
        assert_eq!(output_lines(&out).len(), 2);
    }

    #[test]
    fn missing_frame_is_silent_and_session_continues() {
        let dir = tempfile::tempdir().unwrap();
        let good = red_dot(dir.path(), "good.png", 500, 150);
        let input = format!("{}\n{}\n", dir.path().join("gone.png").display(), good.display());

        let recorder = Recorder::default();
        let mut out = Vec::new();
        let mut session =
            Session::new(Cursor::new(input), &mut out, &config(Task::Track)).with_hook(recorder.clone());
        let stats = session.run().unwrap();
        drop(session);

        assert_eq!(output_lines(&out)[2..], ["RIGHT"]);
        assert_eq!(
            stats,
            Stats {
                frames: 2,
                emitted: 1,
                dropped: 1
            }
        );
        assert_eq!(
            *recorder.0.borrow(),
            vec![Outcome::Dropped, Outcome::Emitted(Command::Right)]
        );
    }

    #[test]
    fn failed_reply_costs_only_its_turn() {
        let dir = tempfile::tempdir().unwrap();
        let right = red_dot(dir.path(), "right.png", 500, 150);
        let left = red_dot(dir.path(), "left.png", 100, 240);
        let up = red_dot(dir.path(), "up.png", 320, 100);
        let input = format!("{}\n{}\n{}\n", right.display(), left.display(), up.display());

        let recorder = Recorder::default();
        let mut out = Vec::new();
        let writer = FailsOnce {
            out: &mut out,
            token: b"RIGHT",
            failed: false,
        };
        let stats = Session::new(Cursor::new(input), writer, &config(Task::Track))
            .with_hook(recorder.clone())
            .run()
            .unwrap();

        assert_eq!(output_lines(&out), vec!["debug=true", "task 1", "LEFT", "UP"]);
        assert_eq!(
            stats,
            Stats {
                frames: 3,
                emitted: 2,
                dropped: 1
            }
        );
        assert_eq!(recorder.0.borrow()[0], Outcome::Dropped);
    }

    #[test]
    fn noop_on_failure_keeps_lockstep() {
        let cfg = Config {
            noop_on_failure: true,
            ..config(Task::Track)
        };
        let mut out = Vec::new();
        Session::new(Cursor::new("/no/such/frame.png\n"), &mut out, &cfg)
            .run()
            .unwrap();
        assert_eq!(output_lines(&out)[2..], ["NOOP"]);
    }

    #[test]
    fn undecodable_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = red_dot(dir.path(), "good.png", 320, 100);
        let mut input = vec![0xff, 0xfe, b'\n'];
        input.extend_from_slice(format!("{}\n", good.display()).as_bytes());

        let mut out = Vec::new();
        Session::new(Cursor::new(input), &mut out, &config(Task::Track))
            .run()
            .unwrap();
        assert_eq!(output_lines(&out)[2..], ["UP"]);
    }

    #[test]
    fn consumed_png_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let frame = red_dot(dir.path(), "frame.png", 100, 240);
        let cfg = Config {
            discard_consumed: true,
            ..config(Task::Track)
        };

        let mut out = Vec::new();
        Session::new(Cursor::new(format!("{}\n", frame.display())), &mut out, &cfg)
            .run()
            .unwrap();

        assert_eq!(output_lines(&out)[2..], ["LEFT"]);
        assert!(!frame.exists());
    }

    #[test]
    fn unreadable_png_is_discarded_too() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"truncated").unwrap();

        let mut hook = DiscardConsumed;
        hook.after_turn(&path, Outcome::Dropped);
        assert!(!path.exists());
    }

    #[test]
    fn other_formats_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.bmp");
        std::fs::write(&path, b"bmp").unwrap();

        DiscardConsumed.after_turn(&path, Outcome::Emitted(Command::Noop));
        assert!(path.exists());
    }
}
