/// How a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub const fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub const fn with_signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub(crate) fn from_portable_pty(status: &portable_pty::ExitStatus) -> Self {
        let raw = i32::try_from(status.exit_code()).unwrap_or(i32::MAX);
        #[cfg(unix)]
        {
            if raw > 128 && raw < 128 + 65 {
                return Self::with_signal(raw - 128);
            }
        }
        Self::with_code(raw)
    }

    pub(crate) fn from_std(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::with_signal(signal);
            }
        }
        Self::with_code(status.code().unwrap_or(-1))
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Single integer for the sink: the exit code, or `128 + signal` the way
    /// shells report signal deaths.
    pub fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => -1,
        }
    }
}
