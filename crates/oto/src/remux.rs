use std::{
    ffi::OsString,
    future::Future,
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::process::Command;

use crate::{
    error::{OtoError, OtoResult},
    keystore::ContentKeyState,
};

/// Hands an assembled container to a decrypt/remux tool.
pub trait Remuxer: Send + Sync {
    /// Returns the path of the file the tool produced.
    fn decrypt_and_remux(
        &self,
        key: &ContentKeyState,
        container: &Path,
    ) -> impl Future<Output = OtoResult<PathBuf>> + Send;
}

#[derive(Debug, Clone)]
pub struct RemuxOptions {
    /// Flag preceding the hex key, `-decryption_key` for ffmpeg.
    pub key_flag: String,
    /// Extension of the produced file.
    pub extension: String,
    /// Written next to the container when unset.
    pub output: Option<PathBuf>,
}

impl Default for RemuxOptions {
    fn default() -> Self {
        Self {
            key_flag: "-decryption_key".to_string(),
            extension: "m4a".to_string(),
            output: None,
        }
    }
}

/// Runs `<program> -y [<key flag> <hex key>] -i <container> -c copy <output>`.
#[derive(Debug, Clone)]
pub struct ExternalRemuxer {
    program: PathBuf,
    options: RemuxOptions,
}

impl ExternalRemuxer {
    /// Locate `program` on `PATH`, or check it when given as a path.
    pub fn new(program: impl AsRef<Path>) -> OtoResult<Self> {
        let program = which::which(program.as_ref())?;
        Ok(Self {
            program,
            options: RemuxOptions::default(),
        })
    }

    pub fn ffmpeg() -> OtoResult<Self> {
        Self::new("ffmpeg")
    }

    pub fn with_options(mut self, options: RemuxOptions) -> Self {
        self.options = options;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn output_path(&self, container: &Path) -> PathBuf {
        if let Some(output) = &self.options.output {
            return output.clone();
        }

        let output = container.with_extension(&self.options.extension);
        if output != container {
            return output;
        }

        let stem = container
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        container.with_file_name(format!("{stem}_remux.{}", self.options.extension))
    }

    fn args(&self, key: &ContentKeyState, container: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-y".into()];
        if let Some(hex) = key.hex() {
            args.push(self.options.key_flag.clone().into());
            args.push(hex.into());
        }
        args.push("-i".into());
        args.push(container.into());
        args.push("-c".into());
        args.push("copy".into());
        args.push(output.into());
        args
    }
}

impl Remuxer for ExternalRemuxer {
    async fn decrypt_and_remux(
        &self,
        key: &ContentKeyState,
        container: &Path,
    ) -> OtoResult<PathBuf> {
        let output = self.output_path(container);
        log::info!(
            "Remuxing {} into {} with {}",
            container.display(),
            output.display(),
            self.program.display()
        );

        let result = Command::new(&self.program)
            .args(self.args(key, container, &output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(OtoError::RemuxError(format!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                tail.join("\n")
            )));
        }

        Ok(output)
    }
}
