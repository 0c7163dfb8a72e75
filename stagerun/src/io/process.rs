//! Helpers for running child processes with streamed, merged output.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, instrument, warn};

use crate::core::types::{OutputSegment, Terminator};

/// How often the child is checked for exit while output is quiet.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long output already in the pipes is still read after the child exits.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Default)]
struct Tracked {
    child: Option<Child>,
    terminating: bool,
}

/// Shared handle on the stage process currently running.
///
/// A termination handler calls [`ChildTracker::terminate`] from another
/// thread; the streaming loop notices the killed child and fails the stage
/// normally. Once terminating, no further child is allowed to run.
#[derive(Clone, Default)]
pub struct ChildTracker {
    state: Arc<Mutex<Tracked>>,
}

impl ChildTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the running child, if any, and refuse new ones.
    ///
    /// Returns the pid of the killed child.
    pub fn terminate(&self) -> Option<u32> {
        let mut state = self.lock();
        state.terminating = true;
        let child = state.child.as_mut()?;
        let pid = child.id();
        if let Err(e) = child.kill() {
            warn!(pid, err = %e, "failed to kill child process");
        }
        Some(pid)
    }

    pub fn is_terminating(&self) -> bool {
        self.lock().terminating
    }

    fn lock(&self) -> MutexGuard<'_, Tracked> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registers the child with a [`ChildTracker`]; kills and reaps it unless it
/// was reaped by [`ChildGuard::try_wait`].
///
/// Keeps a stage process from outliving the runner when output handling
/// fails or the runner unwinds.
struct ChildGuard {
    tracker: ChildTracker,
}

impl ChildGuard {
    fn new(tracker: &ChildTracker, mut child: Child) -> Self {
        let mut state = tracker.lock();
        if state.terminating {
            // Spawned while a termination request was being handled.
            let _ = child.kill();
        }
        state.child = Some(child);
        drop(state);
        Self {
            tracker: tracker.clone(),
        }
    }

    fn take_pipes(&self) -> Result<(ChildStdout, ChildStderr)> {
        let mut state = self.tracker.lock();
        let child = state
            .child
            .as_mut()
            .ok_or_else(|| anyhow!("child already reaped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;
        Ok((stdout, stderr))
    }

    /// Exit status if the child has exited; the child is then reaped.
    fn try_wait(&self) -> Result<Option<ExitStatus>> {
        let mut state = self.tracker.lock();
        let child = state
            .child
            .as_mut()
            .ok_or_else(|| anyhow!("child already reaped"))?;
        let status = child.try_wait().context("poll command")?;
        if status.is_some() {
            state.child = None;
        }
        Ok(status)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let mut state = self.tracker.lock();
        if let Some(mut child) = state.child.take() {
            warn!(pid = child.id(), "killing unfinished child process");
            if let Err(e) = child.kill() {
                warn!(err = %e, "failed to kill child process");
            }
            let _ = child.wait();
        }
    }
}

/// Run a command, feeding its combined stdout/stderr to `on_segment` as it arrives.
///
/// Output is split on `\n` and `\r` so progress redraws arrive as separate
/// segments. Both pipes are drained on reader threads; segments are
/// delivered on the calling thread, which also polls the child for exit.
/// Once the child has exited, output already in the pipes is read for a
/// short grace period and descendants still holding the pipes are left
/// behind. There is no timeout. If `on_segment` fails, the child is killed
/// and the error returned.
#[instrument(skip_all, fields(program = ?cmd.get_program()))]
pub fn run_streaming<F>(
    mut cmd: Command,
    tracker: &ChildTracker,
    mut on_segment: F,
) -> Result<ExitStatus>
where
    F: FnMut(&OutputSegment) -> Result<()>,
{
    if tracker.is_terminating() {
        bail!("runner is terminating");
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    let guard = ChildGuard::new(tracker, child);
    let (stdout, stderr) = guard.take_pipes()?;

    let (tx, rx) = mpsc::channel();
    let stderr_tx = tx.clone();
    let stdout_handle = thread::spawn(move || forward_segments(stdout, tx));
    let stderr_handle = thread::spawn(move || forward_segments(stderr, stderr_tx));

    let mut output_open = true;
    let status = loop {
        if output_open {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(segment) => on_segment(&segment?)?,
                Err(RecvTimeoutError::Timeout) => {}
                // Both readers hit EOF and dropped their senders.
                Err(RecvTimeoutError::Disconnected) => output_open = false,
            }
        } else {
            thread::sleep(POLL_INTERVAL);
        }
        if let Some(status) = guard.try_wait()? {
            break status;
        }
    };

    if output_open {
        output_open = !drain_until(&rx, Instant::now() + DRAIN_GRACE, &mut on_segment)?;
    }
    if output_open {
        debug!("output still held open after exit; leaving readers behind");
    } else {
        join_reader(stdout_handle).context("join stdout")?;
        join_reader(stderr_handle).context("join stderr")?;
    }
    debug!(exit_code = ?status.code(), "command finished");
    Ok(status)
}

/// Deliver buffered segments until `deadline`. True if the channel closed.
fn drain_until<F>(
    rx: &Receiver<Result<OutputSegment>>,
    deadline: Instant,
    on_segment: &mut F,
) -> Result<bool>
where
    F: FnMut(&OutputSegment) -> Result<()>,
{
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(segment) => on_segment(&segment?)?,
            Err(RecvTimeoutError::Timeout) => return Ok(false),
            Err(RecvTimeoutError::Disconnected) => return Ok(true),
        }
    }
}

fn join_reader(handle: thread::JoinHandle<()>) -> Result<()> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))
}

/// Split a stream into segments and send them until EOF or the receiver hangs up.
fn forward_segments<R: Read>(reader: R, tx: Sender<Result<OutputSegment>>) {
    let mut reader = BufReader::new(reader);
    let mut pending: Vec<u8> = Vec::new();
    let mut after_cr = false;

    loop {
        let (consumed, terminator) = {
            let buf = match reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.send(Err(anyhow::Error::new(e).context("read child output")));
                    return;
                }
            };
            if buf.is_empty() {
                if !pending.is_empty() {
                    let text = String::from_utf8_lossy(&pending).into_owned();
                    let _ = tx.send(Ok(OutputSegment::new(text, Terminator::Eof)));
                }
                return;
            }
            match buf.iter().position(|b| matches!(b, b'\n' | b'\r')) {
                Some(pos) => {
                    pending.extend_from_slice(&buf[..pos]);
                    let terminator = if buf[pos] == b'\n' {
                        Terminator::Newline
                    } else {
                        Terminator::CarriageReturn
                    };
                    (pos + 1, Some(terminator))
                }
                None => {
                    pending.extend_from_slice(buf);
                    (buf.len(), None)
                }
            }
        };
        reader.consume(consumed);

        let Some(terminator) = terminator else {
            continue;
        };
        // `\r\n` line endings: the `\r` already delivered the line.
        let crlf_tail = after_cr && terminator == Terminator::Newline && pending.is_empty();
        after_cr = terminator == Terminator::CarriageReturn;
        if crlf_tail {
            continue;
        }
        let text = String::from_utf8_lossy(&pending).into_owned();
        pending.clear();
        if tx.send(Ok(OutputSegment::new(text, terminator))).is_err() {
            return;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn collect(script: &str) -> (Vec<OutputSegment>, ExitStatus) {
        let mut segments = Vec::new();
        let status = run_streaming(sh(script), &ChildTracker::new(), |segment| {
            segments.push(segment.clone());
            Ok(())
        })
        .expect("run");
        (segments, status)
    }

    #[test]
    fn splits_lines_and_carriage_returns() {
        let (segments, status) = collect(r"printf 'one\n 10%%|#\r 20%%|##\rtwo\n'");
        assert!(status.success());
        assert_eq!(
            segments,
            vec![
                OutputSegment::new("one", Terminator::Newline),
                OutputSegment::new(" 10%|#", Terminator::CarriageReturn),
                OutputSegment::new(" 20%|##", Terminator::CarriageReturn),
                OutputSegment::new("two", Terminator::Newline),
            ]
        );
    }

    #[test]
    fn merges_stderr_and_reports_exit_code() {
        let (segments, status) = collect("echo out; echo err >&2; exit 3");
        assert_eq!(status.code(), Some(3));
        let mut texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        texts.sort_unstable();
        assert_eq!(texts, vec!["err", "out"]);
    }

    #[test]
    fn crlf_yields_single_segment() {
        let (segments, _) = collect(r"printf 'a\r\nb'");
        assert_eq!(
            segments,
            vec![
                OutputSegment::new("a", Terminator::CarriageReturn),
                OutputSegment::new("b", Terminator::Eof),
            ]
        );
    }

    #[test]
    fn handler_error_stops_the_child() {
        let err = run_streaming(
            sh("echo first; exec sleep 30"),
            &ChildTracker::new(),
            |_| Err(anyhow!("log disk full")),
        )
        .unwrap_err();
        assert!(err.to_string().contains("log disk full"));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_streaming(
            Command::new("/nonexistent/stage-binary"),
            &ChildTracker::new(),
            |_| Ok(()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }

    #[test]
    fn returns_once_child_exits_even_if_a_descendant_holds_output() {
        let started = Instant::now();
        let (segments, status) = collect("sleep 8 & echo started; exit 0");
        assert!(status.success());
        assert_eq!(
            segments,
            vec![OutputSegment::new("started", Terminator::Newline)]
        );
        assert!(
            started.elapsed() < Duration::from_secs(4),
            "returned after {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn output_written_just_before_exit_is_delivered() {
        let (segments, status) =
            collect("i=0; while [ $i -lt 200 ]; do echo line$i; i=$((i+1)); done");
        assert!(status.success());
        assert_eq!(segments.len(), 200);
        assert_eq!(segments[199].text, "line199");
    }

    #[test]
    fn terminate_kills_the_running_child() {
        let tracker = ChildTracker::new();
        let killer = tracker.clone();
        let started = Instant::now();
        let mut killed = None;
        let status = run_streaming(sh("echo ready; exec sleep 30"), &tracker, |_| {
            killed = killer.terminate();
            Ok(())
        })
        .expect("run");

        assert!(killed.is_some());
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(tracker.is_terminating());
    }

    #[test]
    fn nothing_is_spawned_after_terminate() {
        let tracker = ChildTracker::new();
        assert_eq!(tracker.terminate(), None);
        let err = run_streaming(sh("echo never"), &tracker, |_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("terminating"));
    }
}
