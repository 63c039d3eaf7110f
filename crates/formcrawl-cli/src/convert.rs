//! Converter that shells out to an external program per artifact

use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Result, bail};
use formcrawl_core::{ConvertError, Converter};

/// Runs `program args... <artifact path>`; a non-zero exit is a failure.
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    program: String,
    args: Vec<String>,
}

impl ExternalCommand {
    pub fn new(command: &[String]) -> Result<Self> {
        let Some((program, args)) = command.split_first() else {
            bail!("conversion.command is empty");
        };
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Converter for ExternalCommand {
    fn convert(&self, path: &Path) -> Result<(), ConvertError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| format!("{}: {e}", self.program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            );
            return Err(message.into());
        }
        Ok(())
    }
}
