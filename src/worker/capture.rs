use std::{
    ffi::OsStr,
    io::{self, Read},
    os::unix::process::CommandExt,
    process::{Child, Command, Stdio},
    sync::Arc,
    thread,
};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::error::ExitError;
use crate::models::task::Cancel;
use crate::worker::buffer::{OutputBuffer, OutputWriter};

const READ_CHUNK_SIZE: usize = 10 * 1024;

pub type TaskOutcome = Result<(), ExitError>;

pub struct Capture {
    pub output: OutputBuffer,
    pub done: Receiver<TaskOutcome>,
}

// Killing is refused once the waiter marked the process finished; until then the
// leader is an unreaped zombie, so its group id cannot be reused.
#[derive(Debug, Clone, Default)]
pub struct ProcessControl {
    state: Arc<Mutex<ControlState>>,
}

#[derive(Debug, Default)]
struct ControlState {
    pgid: Option<libc::pid_t>,
    pending_kill: bool,
    finished: bool,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn attach(&self, pid: u32) {
        let mut state = self.state.lock();
        state.pgid = Some(pid as libc::pid_t);
        if state.pending_kill {
            kill_group(pid as libc::pid_t);
        }
    }

    fn finish(&self) {
        self.state.lock().finished = true;
    }

    /// SIGKILLs the process group; a kill before start is applied on start.
    pub fn kill(&self) -> bool {
        let mut state = self.state.lock();
        if state.finished {
            return false;
        }
        match state.pgid {
            Some(pgid) => kill_group(pgid),
            None => {
                state.pending_kill = true;
                false
            }
        }
    }
}

fn kill_group(pgid: libc::pid_t) -> bool {
    // SAFETY: plain syscall; a negative pid addresses the whole group.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        warn!("kill process group {}: {}", pgid, io::Error::last_os_error());
    }
    rc == 0
}

impl Cancel for ProcessControl {
    fn cancel(&self) {
        self.kill();
    }
}

/// The done signal fires exactly once, also when the process never started.
pub fn start_capture<I, S>(program: &str, args: I, control: ProcessControl) -> Capture
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args);
    start(command, control)
}

fn start(mut command: Command, control: ProcessControl) -> Capture {
    let (writer, output) = OutputBuffer::channel();
    let (done_tx, done) = bounded(1);

    let (reader, pipe_writer) = match os_pipe::pipe() {
        Ok(pipe) => pipe,
        Err(e) => {
            error!("create output pipe: {}", e);
            control.finish();
            let _ = done_tx.send(Err(ExitError::Start(e)));
            return Capture { output, done };
        }
    };

    let spawned = pipe_writer.try_clone().and_then(|stderr_writer| {
        command
            .stdin(Stdio::null())
            .stdout(pipe_writer)
            .stderr(stderr_writer)
            .process_group(0)
            .spawn()
    });
    // The command still holds our copies of the write end; EOF needs them closed.
    let program = command.get_program().to_string_lossy().into_owned();
    drop(command);

    match spawned {
        Ok(child) => {
            debug!("started {} (pid {})", program, child.id());
            control.attach(child.id());
            let reader_thread = spawn_reader(reader, writer);
            spawn_waiter(child, reader_thread, control.clone(), done_tx);
        }
        Err(e) => {
            error!("start {}: {}", program, e);
            control.finish();
            let _ = done_tx.send(Err(ExitError::Start(e)));
        }
    }

    Capture { output, done }
}

fn spawn_reader(mut reader: os_pipe::PipeReader, mut writer: OutputWriter) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => writer.append(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("terminal output read err: {}", e);
                    break;
                }
            }
        }
    })
}

fn spawn_waiter(
    mut child: Child,
    reader_thread: thread::JoinHandle<()>,
    control: ProcessControl,
    done_tx: Sender<TaskOutcome>,
) {
    thread::spawn(move || {
        if let Err(e) = wait_exited(child.id()) {
            warn!("waitid {}: {}", child.id(), e);
        }
        if reader_thread.join().is_err() {
            error!("output reader of pid {} panicked", child.id());
        }

        control.finish();
        let outcome = match child.wait() {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(ExitError::Status(status)),
            Err(e) => Err(ExitError::Wait(e)),
        };
        debug!("pid {} finished: {:?}", child.id(), outcome);
        let _ = done_tx.send(outcome);
    });
}

// Waits for exit without reaping.
fn wait_exited(pid: u32) -> io::Result<()> {
    loop {
        // SAFETY: siginfo_t is plain data and waitid only writes into it.
        let rc = unsafe {
            let mut info: libc::siginfo_t = std::mem::zeroed();
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
