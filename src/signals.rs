// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Classification of native failures.
//!
//! A native call only reports failure. What went wrong is emitted as
//! diagnostics while the task runs; the bridge watches those and records
//! which of a few interesting conditions were seen, so that a failed run
//! can be reported as `Busy`, `IdExists` or `NoSuchDevice`.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc, Mutex,
};

use nix::errno::Errno;

use crate::{
    backend::{verbosity_level, Diagnostic, DiagnosticCallback, DmControl},
    core::errors,
    result::{DmError, DmResult, ErrorEnum},
    task::{CompletedTask, Task},
};

bitflags! {
    /// Conditions recognized in native diagnostics.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct Signals: u8 {
        /// the device was busy
        const BUSY = 1;
        /// the thin id, or device, already exists
        const EXISTS = 1 << 1;
        /// the device does not exist
        const NO_SUCH_DEVICE = 1 << 2;
    }
}

/// How one condition shows up in a diagnostic: the errno the failed call
/// reported, or a fragment of the message text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignalPattern {
    /// matches a diagnostic carrying this errno
    pub errno: Option<Errno>,
    /// matches a diagnostic whose message contains any of these
    pub substrings: Vec<String>,
}

impl SignalPattern {
    /// A pattern matching `errno` or the message `text`.
    pub fn new(errno: Errno, text: &str) -> SignalPattern {
        SignalPattern {
            errno: Some(errno),
            substrings: vec![text.to_owned()],
        }
    }

    fn matches(&self, diagnostic: &Diagnostic) -> bool {
        (self.errno.is_some() && diagnostic.errno == self.errno)
            || self
                .substrings
                .iter()
                .any(|s| diagnostic.message.contains(s.as_str()))
    }
}

/// The patterns for each recognized condition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignalPatterns {
    /// device busy
    pub busy: SignalPattern,
    /// id or device exists
    pub exists: SignalPattern,
    /// no such device
    pub no_such_device: SignalPattern,
}

impl Default for SignalPatterns {
    fn default() -> SignalPatterns {
        SignalPatterns {
            busy: SignalPattern::new(Errno::EBUSY, "Device or resource busy"),
            exists: SignalPattern::new(Errno::EEXIST, "File exists"),
            no_such_device: SignalPattern::new(Errno::ENXIO, "No such device or address"),
        }
    }
}

/// The conditions seen since the last reset, and the text of the last
/// error.
#[derive(Debug)]
pub struct ErrorSignals {
    patterns: SignalPatterns,
    seen: AtomicU8,
    last_error: Mutex<Option<String>>,
}

impl ErrorSignals {
    /// Nothing seen yet.
    pub fn new(patterns: SignalPatterns) -> ErrorSignals {
        ErrorSignals {
            patterns,
            seen: AtomicU8::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Record the conditions `diagnostic` shows. Only errors and warnings
    /// count.
    pub fn observe(&self, diagnostic: &Diagnostic) {
        if diagnostic.level > log::Level::Warn {
            return;
        }
        if diagnostic.level == log::Level::Error {
            *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) =
                Some(diagnostic.message.clone());
        }

        let mut found = Signals::empty();
        if self.patterns.busy.matches(diagnostic) {
            found |= Signals::BUSY;
        }
        if self.patterns.exists.matches(diagnostic) {
            found |= Signals::EXISTS;
        }
        if self.patterns.no_such_device.matches(diagnostic) {
            found |= Signals::NO_SUCH_DEVICE;
        }

        if !found.is_empty() {
            trace!("Diagnostic {:?} signals {:?}", diagnostic.message, found);
            self.seen.fetch_or(found.bits(), Ordering::SeqCst);
        }
    }

    /// Forget everything seen.
    pub fn reset(&self) {
        self.seen.store(0, Ordering::SeqCst);
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// The conditions seen since the last reset.
    pub fn seen(&self) -> Signals {
        Signals::from_bits_truncate(self.seen.load(Ordering::SeqCst))
    }

    /// The message of the last error seen since the last reset.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Runs tasks while watching their diagnostics.
///
/// The recorded conditions are shared by every task on the context, so
/// classified runs are serialized.
#[derive(Debug)]
pub struct ErrorBridge {
    signals: Arc<ErrorSignals>,
    lock: Mutex<()>,
    max_level: log::Level,
}

impl ErrorBridge {
    /// A bridge recognizing `patterns`, logging diagnostics as the native
    /// layer would at `verbosity`.
    pub fn new(patterns: SignalPatterns, verbosity: i32) -> ErrorBridge {
        ErrorBridge {
            signals: Arc::new(ErrorSignals::new(patterns)),
            lock: Mutex::new(()),
            max_level: verbosity_level(verbosity),
        }
    }

    /// The least severe level of diagnostic forwarded to the log.
    pub fn max_level(&self) -> log::Level {
        self.max_level
    }

    /// The callback to register with the native layer. Diagnostics within
    /// the verbosity are forwarded to the log; all are observed.
    pub fn callback(&self) -> DiagnosticCallback {
        let signals = Arc::clone(&self.signals);
        let max_level = self.max_level;
        Box::new(move |diagnostic: &Diagnostic| {
            if diagnostic.level <= max_level {
                log!(
                    diagnostic.level,
                    "{}:{} {}",
                    diagnostic.file,
                    diagnostic.line,
                    diagnostic.message
                );
            }
            signals.observe(diagnostic);
        })
    }

    /// The conditions recorded by the bridge.
    pub fn signals(&self) -> &ErrorSignals {
        &self.signals
    }

    /// Run `task`. If it fails and one of the conditions in `interest`
    /// was seen while it ran, report that condition instead of the generic
    /// failure. Busy wins over exists, which wins over no such device.
    /// A generic failure carries the last error emitted while it ran.
    pub fn run_classified<'a, B: DmControl>(
        &self,
        task: Task<'a, B>,
        interest: Signals,
    ) -> DmResult<CompletedTask<'a, B>> {
        let (result, seen, last_error) = {
            let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            self.signals.reset();
            let result = task.run();
            (result, self.signals.seen(), self.signals.last_error())
        };

        result.map_err(|err| {
            let seen = seen & interest;
            if seen.contains(Signals::BUSY) {
                DmError::Dm(ErrorEnum::Busy, "Device is Busy".into())
            } else if seen.contains(Signals::EXISTS) {
                DmError::Dm(ErrorEnum::IdExists, "Device Id Exists".into())
            } else if seen.contains(Signals::NO_SUCH_DEVICE) {
                DmError::Dm(
                    ErrorEnum::NoSuchDevice,
                    "No such device or address".into(),
                )
            } else {
                match (err, last_error) {
                    (DmError::Core(errors::Error::TaskRun(task)), Some(message)) => {
                        DmError::Core(errors::Error::TaskRun(format!("{task}: {message}")))
                    }
                    (err, _) => err,
                }
            }
        })
    }
}

/// Whether `err` reports that a thin id is already in use.
pub fn device_id_exists(err: &DmError) -> bool {
    err.kind() == Some(&ErrorEnum::IdExists)
}
