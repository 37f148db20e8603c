// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Run one Alloy command in an isolated solver process.
//!
//! The solver can exhaust memory or hang, and it does not reliably honor
//! cancellation, so every attempt gets its own process group. A watchdog
//! thread kills the whole group (including anything the solver spawned) once
//! the time limit passes: first SIGTERM, then SIGKILL after a grace period.
//!
//! The child is invoked as `<solver> <args>... <model> <command> <scope>`,
//! where `scope` is `-1` to keep the command's declared scope, and reports
//! back through its standard output (see [`crate::measurement`]).

use std::{
    env,
    io::{self, BufRead, BufReader},
    os::unix::process::{CommandExt, ExitStatusExt},
    path::Path,
    process::{Child, Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use nix::{
    errno::Errno,
    sys::{
        resource::{getrusage, UsageWho},
        signal::{killpg, Signal},
        time::TimeVal,
    },
    unistd::Pid,
};

use crate::{
    measurement::RunMeasurement,
    outcome::{classify, RunOutcome, TimeWindow},
};

/// Anything that can run command `command` of `model` at a scope.
///
/// `scope` is the overall scope to impose, overriding every per-signature
/// scope; `None` runs the command exactly as declared.
pub trait SolverRunner {
    /// Run once and classify the result. Failures of the run itself are
    /// reported as [`RunOutcome::Unknown`], never as a panic.
    fn run(&mut self, model: &Path, command: usize, scope: Option<u32>) -> RunOutcome;
}

impl<F> SolverRunner for F
where
    F: FnMut(&Path, usize, Option<u32>) -> RunOutcome,
{
    fn run(&mut self, model: &Path, command: usize, scope: Option<u32>) -> RunOutcome {
        self(model, command, scope)
    }
}

/// The full invocation of the solver program, minus the per-run arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverCmd {
    /// Binary to launch
    pub cmd: String,
    /// Leading arguments to pass
    pub args: Vec<String>,
}

impl SolverCmd {
    /// A solver invocation of `cmd` with no extra arguments.
    pub fn new<S: AsRef<str>>(cmd: S) -> Self {
        Self {
            cmd: cmd.as_ref().to_string(),
            args: vec![],
        }
    }

    /// Append leading arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    /// Build the command line string, for printing purposes.
    pub fn cmdline(&self) -> String {
        let mut cmdline = vec![self.cmd.clone()];
        for arg in &self.args {
            if arg.contains([' ', '"']) {
                cmdline.push(format!("\"{}\"", arg.replace('"', "\\\"")));
            } else {
                cmdline.push(arg.clone());
            }
        }
        cmdline.join(" ")
    }
}

/// Get the solver program with binary name `bin`.
///
/// The environment variable derived from the name (eg, `ALLOY_RUNNER_BIN`
/// for `alloy-runner`) takes priority; otherwise `bin` is used as-is and
/// looked up on `$PATH`.
pub fn solver_path(bin: &str) -> String {
    let var = bin.to_uppercase().replace('-', "_") + "_BIN";
    match env::var_os(var) {
        Some(val) => val.to_string_lossy().into(),
        None => bin.to_owned(),
    }
}

/// The scope argument as the child expects it.
pub fn scope_arg(scope: Option<u32>) -> String {
    match scope {
        Some(scope) => scope.to_string(),
        None => "-1".to_string(),
    }
}

fn time_val_to_duration(time: TimeVal) -> Duration {
    Duration::from_secs(time.tv_sec() as u64) + Duration::from_micros(time.tv_usec() as u64)
}

fn kill_group(pgid: Pid, signal: Signal) {
    match killpg(pgid, signal) {
        Ok(()) => debug!("sent {signal:?} to process group {pgid}"),
        // the whole group has already exited
        Err(Errno::ESRCH) | Err(Errno::EPERM) => {}
        Err(err) => warn!("could not send {signal:?} to process group {pgid}: {err}"),
    }
}

/// A [`SolverRunner`] that launches the solver as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    solver: SolverCmd,
    window: TimeWindow,
    grace: Duration,
}

impl ProcessRunner {
    /// Create a runner for `solver` classifying against `window`.
    pub fn new(solver: SolverCmd, window: TimeWindow) -> Self {
        Self {
            solver,
            window,
            grace: Duration::from_secs(1),
        }
    }

    /// The window runs are classified against.
    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    /// Read the protocol lines from the child until its stdout closes.
    fn read_output(child: &mut Child, m: &mut RunMeasurement) -> io::Result<()> {
        let Some(stdout) = child.stdout.take() else {
            return Err(io::Error::new(io::ErrorKind::Other, "solver stdout not captured"));
        };
        for line in BufReader::new(stdout).lines() {
            let line = line?;
            debug!("{line}");
            m.observe_line(&line);
        }
        Ok(())
    }

    /// Run the solver once and gather what it did, without classifying.
    pub fn measure(
        &self,
        model: &Path,
        command: usize,
        scope: Option<u32>,
    ) -> io::Result<RunMeasurement> {
        let before = getrusage(UsageWho::RUSAGE_CHILDREN)?;
        let start = Instant::now();
        let mut child = Command::new(&self.solver.cmd)
            .args(&self.solver.args)
            .arg(model)
            .arg(command.to_string())
            .arg(scope_arg(scope))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .process_group(0)
            .spawn()?;
        // the child leads its own group, so the group id is its pid
        let pgid = Pid::from_raw(child.id() as i32);

        let timed_out = Arc::new(AtomicBool::new(false));
        let (reaped, watch) = mpsc::channel::<()>();
        let watchdog = {
            let timed_out = timed_out.clone();
            let limit = self.window.time_limit();
            let grace = self.grace;
            thread::spawn(move || {
                if watch.recv_timeout(limit) != Err(RecvTimeoutError::Timeout) {
                    return;
                }
                timed_out.store(true, Ordering::SeqCst);
                kill_group(pgid, Signal::SIGTERM);
                // give the solver a chance to exit cleanly, then make sure
                // nothing in its group survives
                _ = watch.recv_timeout(grace);
                kill_group(pgid, Signal::SIGKILL);
            })
        };

        let mut measurement = RunMeasurement::default();
        let read = Self::read_output(&mut child, &mut measurement);
        if read.is_err() {
            kill_group(pgid, Signal::SIGKILL);
        }
        let status = child.wait();
        let real_time = start.elapsed();
        _ = reaped.send(());
        if watchdog.join().is_err() {
            warn!("solver watchdog panicked");
        }
        read?;
        let status = status?;

        let after = getrusage(UsageWho::RUSAGE_CHILDREN)?;
        measurement.real_time = real_time;
        measurement.user_time = time_val_to_duration(after.user_time())
            .saturating_sub(time_val_to_duration(before.user_time()));
        measurement.sys_time = time_val_to_duration(after.system_time())
            .saturating_sub(time_val_to_duration(before.system_time()));
        measurement.exit_code = status.code();
        measurement.signal = status.signal();
        measurement.timed_out = timed_out.load(Ordering::SeqCst);
        Ok(measurement)
    }
}

impl SolverRunner for ProcessRunner {
    fn run(&mut self, model: &Path, command: usize, scope: Option<u32>) -> RunOutcome {
        info!(
            "running command {command} of {} with overall scope {}",
            model.display(),
            scope_arg(scope)
        );
        let outcome = match self.measure(model, command, scope) {
            Ok(measurement) => classify(&measurement, &self.window),
            Err(err) => {
                warn!(
                    "could not run `{} {} {command} {}`: {err}",
                    self.solver.cmdline(),
                    model.display(),
                    scope_arg(scope)
                );
                RunOutcome::Unknown {
                    cause: err.to_string(),
                }
            }
        };
        match &outcome {
            RunOutcome::Exception => warn!(
                "solver raised an exception on command {command} of {} at scope {}",
                model.display(),
                scope_arg(scope)
            ),
            RunOutcome::Unknown { cause } => warn!(
                "unknown state on command {command} of {} at scope {}: {cause}",
                model.display(),
                scope_arg(scope)
            ),
            _ => info!("{outcome}"),
        }
        outcome
    }
}
