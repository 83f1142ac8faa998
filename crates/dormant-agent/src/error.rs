use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("pipe setup failed: {0}")]
    PipeSetup(String),

    #[error("write to server stdin failed: {0}")]
    PipeWrite(#[source] std::io::Error),

    #[error("server process start failed: {0}")]
    ProcessStart(#[source] std::io::Error),

    #[error("terminal not active")]
    NotRunning,

    #[error("server not online")]
    NotOnline,

    #[error("server is suspended")]
    Suspended,

    #[error("encode game message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TerminalError {
    pub fn code(&self) -> &'static str {
        match self {
            TerminalError::PipeSetup(_) => "pipe_setup",
            TerminalError::PipeWrite(_) => "pipe_write",
            TerminalError::ProcessStart(_) => "process_start",
            TerminalError::NotRunning => "not_running",
            TerminalError::NotOnline => "not_online",
            TerminalError::Suspended => "suspended",
            TerminalError::Encode(_) => "encode",
        }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            TerminalError::NotRunning | TerminalError::NotOnline | TerminalError::Suspended
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_errors_are_recoverable() {
        assert!(TerminalError::NotRunning.is_precondition());
        assert!(TerminalError::NotOnline.is_precondition());
        assert!(TerminalError::Suspended.is_precondition());
        assert!(!TerminalError::PipeSetup("stdout".to_string()).is_precondition());
    }

    #[test]
    fn display_includes_source() {
        let err = TerminalError::ProcessStart(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such file",
        ));
        assert_eq!(err.code(), "process_start");
        assert!(err.to_string().contains("no such file"));
    }
}
