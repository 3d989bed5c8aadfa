use anyhow::{bail, Context, Result};
use std::process::Command;
use tempfile::NamedTempFile;

/// Writes the generated program to a temporary file and runs
/// `python -m py_compile` on it. Catches emitter bugs that produce
/// syntactically invalid Python; the program is never executed.
pub fn check_python_syntax(program: &str) -> Result<()> {
    let mut temp = NamedTempFile::with_suffix(".py")
        .context("Failed to create temporary file for the syntax check.")?;
    std::io::Write::write_all(&mut temp, program.as_bytes())?;

    let output = Command::new("python")
        .arg("-m")
        .arg("py_compile")
        .arg(temp.path())
        .output()
        .context("Failed to start Python. Ensure `python` is available or drop --check.")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        bail!(
            "Generated program failed the Python syntax check.\n{}\n{}",
            stdout.trim(),
            stderr.trim()
        );
    }
    Ok(())
}
