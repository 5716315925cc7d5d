use thiserror::Error;

/// Failure raised while parsing or running a script.
///
/// `line` is the 1-based source line of the statement that failed, when
/// known. Limit violations and uncaught script exceptions both land here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}{}", .line.map(|line| format!(" (line {line})")).unwrap_or_default())]
pub struct ExecutionError {
    pub message: String,
    pub line: Option<usize>,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }

    pub fn at(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionError;

    #[test]
    fn display_appends_line_when_known() {
        assert_eq!(
            ExecutionError::at("boom", 3).to_string(),
            "boom (line 3)"
        );
        assert_eq!(ExecutionError::new("boom").to_string(), "boom");
    }
}
