mod admin;
mod health_check;
mod signup;
mod verify;

pub use admin::*;
pub use health_check::*;
pub use signup::*;
pub use verify::*;

/// Prints the whole `source()` chain, so `{:?}` in logs shows the root cause.
pub fn error_chain_fmt(
    err: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}", err)?;
    let mut current = err.source();

    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }

    Ok(())
}
