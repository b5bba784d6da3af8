use serde::{Deserialize, Serialize};
use std::fmt;

/// Host integration enabled for containers started by the generated scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunFeature {
    Display,
    Gpu,
    Audio,
    AwsCredentials,
}

impl RunFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunFeature::Display => "display",
            RunFeature::Gpu => "gpu",
            RunFeature::Audio => "audio",
            RunFeature::AwsCredentials => "aws_credentials",
        }
    }

    /// Bash lines appending this feature's flags to the `RUN_ARGS` array
    ///
    /// `RUNTIME` must already be set; `container_home` is a shell word for the
    /// home directory inside the container.
    pub fn shell_lines(&self, container_home: &str) -> Vec<String> {
        match self {
            RunFeature::Display => vec![
                "RUN_ARGS+=(-e DISPLAY -v /tmp/.X11-unix:/tmp/.X11-unix:rw)".to_string(),
                "if [ -n \"${WAYLAND_DISPLAY:-}\" ]; then".to_string(),
                "    RUN_ARGS+=(-e WAYLAND_DISPLAY -e XDG_RUNTIME_DIR=/tmp/xdg -v \"${XDG_RUNTIME_DIR}/${WAYLAND_DISPLAY}:/tmp/xdg/${WAYLAND_DISPLAY}\")".to_string(),
                "fi".to_string(),
            ],
            RunFeature::Gpu => vec![
                "if [ \"$RUNTIME\" = \"podman\" ]; then".to_string(),
                "    RUN_ARGS+=(--device nvidia.com/gpu=all)".to_string(),
                "else".to_string(),
                "    RUN_ARGS+=(--gpus all)".to_string(),
                "fi".to_string(),
            ],
            RunFeature::Audio => vec![
                "RUN_ARGS+=(--device /dev/snd)".to_string(),
                "if [ -d \"/run/user/$(id -u)/pulse\" ]; then".to_string(),
                "    RUN_ARGS+=(-e PULSE_SERVER=unix:/tmp/pulse/native -v \"/run/user/$(id -u)/pulse:/tmp/pulse\")".to_string(),
                "fi".to_string(),
            ],
            RunFeature::AwsCredentials => vec![
                "if [ -d \"$HOME/.aws\" ]; then".to_string(),
                format!(
                    "    RUN_ARGS+=(-v \"$HOME/.aws:{}/.aws:ro\")",
                    container_home
                ),
                "fi".to_string(),
                "for var in AWS_PROFILE AWS_REGION AWS_DEFAULT_REGION AWS_ACCESS_KEY_ID AWS_SECRET_ACCESS_KEY AWS_SESSION_TOKEN; do".to_string(),
                "    if [ -n \"${!var:-}\" ]; then RUN_ARGS+=(-e \"$var\"); fi".to_string(),
                "done".to_string(),
            ],
        }
    }
}

impl fmt::Display for RunFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
