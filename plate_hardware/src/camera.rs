//! Still-capture backends implementing `plate_traits::Camera`.
use crate::error::{HwError, Result};
use plate_traits::{BoxError, Camera};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

/// Placeholder in command arguments that is replaced by the output path.
pub const PATH_PLACEHOLDER: &str = "{path}";

fn image_path(output_dir: &Path, name: Option<&str>) -> PathBuf {
    let stem = match name {
        Some(n) => n.to_string(),
        None => {
            let ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0);
            format!("well_plate_{ms}")
        }
    };
    output_dir.join(format!("{stem}.jpg"))
}

/// Captures by running an external program, e.g. `libcamera-still -n -o {path}`.
#[derive(Debug, Clone)]
pub struct CommandCamera {
    output_dir: PathBuf,
    program: String,
    args: Vec<String>,
}

impl CommandCamera {
    pub fn new(output_dir: impl Into<PathBuf>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            program: program.into(),
            args,
        }
    }

    /// Raspberry Pi camera via the libcamera still-capture tool.
    pub fn libcamera(output_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            output_dir,
            "libcamera-still",
            vec!["-n".into(), "-o".into(), PATH_PLACEHOLDER.into()],
        )
    }

    fn capture(&self, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(PATH_PLACEHOLDER, &path_str))
            .collect();
        let status = Command::new(&self.program).args(&args).status()?;
        if !status.success() {
            return Err(HwError::Camera(format!("{} exited with {status}", self.program)));
        }
        Ok(())
    }
}

impl Camera for CommandCamera {
    fn take_photo(&mut self, name: Option<&str>) -> std::result::Result<PathBuf, BoxError> {
        std::fs::create_dir_all(&self.output_dir).map_err(HwError::from)?;
        let path = image_path(&self.output_dir, name);
        self.capture(&path)?;
        tracing::debug!(path = %path.display(), "photo captured");
        Ok(path)
    }
}

/// Camera stand-in when no camera is connected: reports the path it would have written.
#[derive(Debug, Clone)]
pub struct NullCamera {
    output_dir: PathBuf,
}

impl NullCamera {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl Camera for NullCamera {
    fn take_photo(&mut self, name: Option<&str>) -> std::result::Result<PathBuf, BoxError> {
        Ok(image_path(&self.output_dir, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_camera_uses_given_name() {
        let mut cam = NullCamera::new("pics");
        let p = cam.take_photo(Some("well_001")).unwrap();
        assert_eq!(p, PathBuf::from("pics/well_001.jpg"));
    }

    #[test]
    fn null_camera_generates_timestamped_name() {
        let mut cam = NullCamera::new("pics");
        let p = cam.take_photo(None).unwrap();
        let name = p.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("well_plate_") && name.ends_with(".jpg"), "{name}");
    }
}
