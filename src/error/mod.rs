use thiserror::Error;

/// Failures of the engine itself. Block compile and runtime errors of a
/// document are reported in its transcript instead.
///
/// Lua failures are kept as text: `mlua::Error` is not `Send` without mlua's
/// `send` feature, and hosts pass these errors on through `anyhow`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("lua error: {0}")]
    Lua(String),

    #[error("{message}")]
    Compile { block: usize, message: String },
}

impl From<mlua::Error> for EngineError {
    fn from(err: mlua::Error) -> Self {
        EngineError::Lua(describe_lua_error(&err))
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Converts a host error into a Lua runtime error so scripts can `pcall` it.
pub(crate) fn to_lua_err(err: anyhow::Error) -> mlua::Error {
    mlua::Error::external(err)
}

/// First line of the innermost cause, without mlua's wrapper text or traceback.
pub fn describe_lua_error(err: &mlua::Error) -> String {
    match err {
        mlua::Error::CallbackError { cause, .. } => describe_lua_error(cause),
        mlua::Error::RuntimeError(msg) => first_line(msg),
        mlua::Error::SyntaxError { message, .. } => first_line(message),
        other => first_line(&other.to_string()),
    }
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_innermost_cause() {
        let inner = mlua::Error::runtime("cannot redefine capability 'print'");
        let wrapped = mlua::Error::CallbackError {
            traceback: "stack traceback:\n\t[C]: in ?".into(),
            cause: std::sync::Arc::new(inner),
        };
        assert_eq!(describe_lua_error(&wrapped), "cannot redefine capability 'print'");
    }

    #[test]
    fn lua_failures_cross_into_anyhow() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<EngineError>();

        let err: EngineError = mlua::Error::runtime("state closed").into();
        let err = anyhow::Error::from(err);
        assert_eq!(err.to_string(), "lua error: state closed");
    }

    #[test]
    fn keeps_only_the_first_line() {
        let err = mlua::Error::RuntimeError("block 1:1: boom\nstack traceback:\n\t...".into());
        assert_eq!(describe_lua_error(&err), "block 1:1: boom");
    }
}
