use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Condvar, Mutex};

use crate::trace::trace_log;
use crate::value::RuntimeError;

/// Lines the buffer holds before producers block.
const LINE_BUFFER_CAPACITY: usize = 1024;

/// Bounded multi-producer/single-consumer line queue with a completion
/// flag. Producers are the OS reader threads, the consumer is the
/// interpreter. The buffer is complete once every subscribed pipe has
/// delivered end-of-stream.
#[derive(Debug)]
pub struct LineBuffer {
    state: Mutex<BufferState>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

#[derive(Debug)]
struct BufferState {
    lines: VecDeque<String>,
    open_pipes: usize,
    complete: bool,
}

impl LineBuffer {
    pub fn new(open_pipes: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                lines: VecDeque::new(),
                open_pipes,
                complete: open_pipes == 0,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity: LINE_BUFFER_CAPACITY,
        }
    }

    /// Enqueue one line, blocking while the buffer is full. Lines pushed
    /// after cancellation are dropped.
    pub fn push(&self, line: String) {
        let mut state = self.state.lock().unwrap();
        while state.lines.len() >= self.capacity && !state.complete {
            state = self.writable.wait(state).unwrap();
        }
        if state.complete {
            return;
        }
        state.lines.push_back(line);
        self.readable.notify_one();
    }

    /// One subscribed pipe reached end-of-stream. The buffer is complete
    /// when the open-pipe counter reaches zero.
    pub fn close_pipe(&self) {
        let mut state = self.state.lock().unwrap();
        state.open_pipes = state.open_pipes.saturating_sub(1);
        if state.open_pipes == 0 {
            state.complete = true;
            self.readable.notify_all();
        }
    }

    /// Dequeue one line, blocking while the buffer is empty and not yet
    /// complete. Returns `None` once the buffer is drained and complete.
    pub fn pop(&self) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(line) = state.lines.pop_front() {
                self.writable.notify_one();
                return Some(line);
            }
            if state.complete {
                return None;
            }
            state = self.readable.wait(state).unwrap();
        }
    }

    /// Mark the buffer complete immediately, discarding queued lines and
    /// releasing blocked producers and the consumer.
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        state.lines.clear();
        state.complete = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().unwrap().complete
    }
}

/// The value written into a child's stdin. Plain values arrive as text;
/// a pipe value streams its lines lazily from the source buffer.
pub enum PipedInput {
    Text(String),
    Stream(Arc<PipeShared>),
}

/// Shared state of one redirected child process: its line buffer, the
/// process handle, and the exit code once reaped.
#[derive(Debug)]
pub struct PipeShared {
    program: String,
    buffer: LineBuffer,
    child: Mutex<Option<Child>>,
    exit: Mutex<Option<i32>>,
    allow_non_zero: bool,
}

impl PipeShared {
    pub fn program_name(&self) -> &str {
        &self.program
    }

    /// Blocking read of the next output line; `None` once every pipe has
    /// closed and the buffer drained.
    pub fn next_line(&self) -> Option<String> {
        self.buffer.pop()
    }

    /// Non-zero exit codes are tolerated when stderr was redirected away.
    pub fn allows_non_zero_exit(&self) -> bool {
        self.allow_non_zero
    }

    /// Reap the child and record its exit code. Safe to call repeatedly;
    /// later calls return the recorded code.
    pub fn finish(&self) -> i32 {
        let mut exit = self.exit.lock().unwrap();
        if let Some(code) = *exit {
            return code;
        }
        let code = match self.child.lock().unwrap().take() {
            Some(mut child) => child.wait().ok().and_then(|s| s.code()).unwrap_or(-1),
            None => -1,
        };
        *exit = Some(code);
        trace_log!("proc", "{} exited with {}", self.program, code);
        code
    }

    pub fn success(&self) -> bool {
        self.finish() == 0 || self.allow_non_zero
    }

    /// Kill the child unconditionally and cancel the buffer; iteration
    /// then terminates as the pipes close.
    pub fn stop(&self) {
        if let Some(child) = self.child.lock().unwrap().as_mut() {
            let _ = child.kill();
        }
        self.buffer.cancel();
    }
}

/// One child-process invocation: either run to completion with inherited
/// stdio (`start`) or stream stdout/stderr through a pipe value
/// (`start_with_redirect`).
#[derive(Debug)]
pub struct ProcessContext {
    program: String,
    args: Vec<String>,
    dispose_stdout: bool,
    dispose_stderr: bool,
}

impl ProcessContext {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            dispose_stdout: false,
            dispose_stderr: false,
        }
    }

    /// Redirect the stream away instead of subscribing to it.
    pub fn dispose_stdout(&mut self) {
        self.dispose_stdout = true;
    }

    pub fn dispose_stderr(&mut self) {
        self.dispose_stderr = true;
    }

    /// Launch with inherited stdio, feed any piped value into stdin, and
    /// wait for exit. Returns the exit code.
    pub fn start(self, piped: Option<PipedInput>) -> Result<i32, RuntimeError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if piped.is_some() {
            cmd.stdin(Stdio::piped());
        }
        if self.dispose_stdout {
            cmd.stdout(Stdio::null());
        }
        if self.dispose_stderr {
            cmd.stderr(Stdio::null());
        }
        let mut child = cmd.spawn().map_err(|e| spawn_error(&self.program, e))?;
        trace_log!("proc", "started {} (blocking)", self.program);
        if let (Some(stdin), Some(input)) = (child.stdin.take(), piped) {
            write_piped_input(stdin, input);
        }
        let code = child.wait().ok().and_then(|s| s.code()).unwrap_or(-1);
        trace_log!("proc", "{} exited with {}", self.program, code);
        Ok(code)
    }

    /// Launch with stdout/stderr subscribed into a line buffer consumed
    /// lazily through the returned pipe value. Disposed streams are
    /// redirected to the null device and never enter the buffer.
    pub fn start_with_redirect(
        self,
        piped: Option<PipedInput>,
    ) -> Result<Arc<PipeShared>, RuntimeError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdout(if self.dispose_stdout {
            Stdio::null()
        } else {
            Stdio::piped()
        });
        cmd.stderr(if self.dispose_stderr {
            Stdio::null()
        } else {
            Stdio::piped()
        });
        if piped.is_some() {
            cmd.stdin(Stdio::piped());
        }
        let mut child = cmd.spawn().map_err(|e| spawn_error(&self.program, e))?;
        trace_log!("proc", "started {} (redirected)", self.program);

        let subscribed =
            usize::from(!self.dispose_stdout) + usize::from(!self.dispose_stderr);
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();

        let shared = Arc::new(PipeShared {
            program: self.program,
            buffer: LineBuffer::new(subscribed),
            child: Mutex::new(Some(child)),
            exit: Mutex::new(None),
            allow_non_zero: self.dispose_stderr,
        });

        if let Some(stdout) = stdout {
            spawn_reader(Arc::clone(&shared), stdout);
        }
        if let Some(stderr) = stderr {
            spawn_reader(Arc::clone(&shared), stderr);
        }
        if let (Some(stdin), Some(input)) = (stdin, piped) {
            std::thread::spawn(move || write_piped_input(stdin, input));
        }
        Ok(shared)
    }
}

fn spawn_error(program: &str, err: std::io::Error) -> RuntimeError {
    if err.kind() == std::io::ErrorKind::NotFound {
        RuntimeError::not_found(format!("program {}", program))
    } else {
        RuntimeError::general(format!("failed to start {}: {}", program, err))
    }
}

fn spawn_reader<R: std::io::Read + Send + 'static>(shared: Arc<PipeShared>, stream: R) {
    std::thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(line) => shared.buffer.push(line),
                Err(_) => break,
            }
        }
        shared.buffer.close_pipe();
    });
}

/// Write a piped value into a child's stdin. A broken pipe stops the
/// source rather than propagating: the child simply stopped reading.
fn write_piped_input(mut stdin: ChildStdin, input: PipedInput) {
    match input {
        PipedInput::Text(text) => {
            let _ = stdin.write_all(text.as_bytes());
        }
        PipedInput::Stream(source) => {
            while let Some(line) = source.next_line() {
                let mut line = line;
                line.push('\n');
                if let Err(e) = stdin.write_all(line.as_bytes()) {
                    if e.kind() == std::io::ErrorKind::BrokenPipe {
                        source.stop();
                    }
                    break;
                }
            }
            source.finish();
        }
    }
}
