//! Camera subprocess management.
//!
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStdout, Command};

/// Errors around the camera subprocess lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("failed to spawn camera command")]
    Spawn(#[source] std::io::Error),
    #[error("failed to reap camera process")]
    Wait(#[source] std::io::Error),
    #[error("camera stdout was not captured")]
    MissingStdout,
}

/// Capture settings for the camera command line.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Program producing the motion-JPEG stream on stdout.
    pub command: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            command: "rpicam-vid".into(),
            width: 640,
            height: 640,
            framerate: 30,
        }
    }
}

impl CameraConfig {
    /// Build the capture command: unbounded motion-JPEG to stdout, no
    /// preview window.
    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(["-t", "0", "--codec", "mjpeg"])
            .args(["--width", &self.width.to_string()])
            .args(["--height", &self.height.to_string()])
            .args(["--framerate", &self.framerate.to_string()])
            .args(["-o", "-", "--nopreview"]);
        cmd
    }
}

/// A running camera subprocess.
///
/// The child is spawned with `kill_on_drop`, so the process is terminated
/// on every exit path of its owner, including a consumer abandoning the
/// stream mid-frame. Termination is forced; the camera command has no
/// graceful shutdown handshake.
pub struct CameraProcess {
    child: Child,
}

impl CameraProcess {
    pub fn spawn(config: &CameraConfig) -> Result<Self, CameraError> {
        Self::from_command(config.to_command())
    }

    pub fn from_command(mut command: Command) -> Result<Self, CameraError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(CameraError::Spawn)?;
        log::info!(
            "camera process started (pid {})",
            child.id().map_or_else(|| "unknown".into(), |id| id.to_string())
        );

        Ok(Self { child })
    }

    /// Take the readable end of the camera's output stream.
    pub fn take_stdout(&mut self) -> Result<ChildStdout, CameraError> {
        self.child.stdout.take().ok_or(CameraError::MissingStdout)
    }

    /// Kill the subprocess and reap it.
    pub async fn terminate(mut self) -> Result<ExitStatus, CameraError> {
        if let Err(err) = self.child.start_kill() {
            // Already exited on its own; wait below still reaps it.
            log::debug!("camera process was not running anymore: {err}");
        }
        let status = self.child.wait().await.map_err(CameraError::Wait)?;
        log::info!("camera process terminated ({status})");
        Ok(status)
    }
}
