// Exit codes for the CLI.
//
//   0 = success
//   1 = configuration or unrecoverable error
//
// There is no daemon RPC surface in this system to classify further, so the
// wider typed mapping a collaborative-editing CLI would need collapses to
// just these two.

use std::process;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn exit(self) -> ! {
        process::exit(self.code())
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_values() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::Error.code(), 1);
    }

    #[test]
    fn exit_code_to_process_exit_code() {
        let code: process::ExitCode = ExitCode::Error.into();
        let _ = code;
    }
}
