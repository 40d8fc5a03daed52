use std::path::{Path, PathBuf};

/// The engine's one piece of process-global state: the `?` shell variable
/// and the path of the script being executed. All writes happen at the
/// process-context boundary; everything else reads through this surface.
#[derive(Debug, Default)]
pub struct ShellState {
    last_exit_code: i32,
    script_path: Option<PathBuf>,
}

impl ShellState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exit_code(&self) -> i32 {
        self.last_exit_code
    }

    pub fn set_exit_code(&mut self, code: i32) {
        self.last_exit_code = code;
    }

    pub fn set_script_path(&mut self, path: impl Into<PathBuf>) {
        self.script_path = Some(path.into());
    }

    /// Directory of the executing script, or the working directory when
    /// running without one (interactive mode).
    pub fn script_dir(&self) -> String {
        self.script_path
            .as_deref()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_string_lossy().into_owned())
            .or_else(|| {
                std::env::current_dir()
                    .ok()
                    .map(|p| p.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| ".".to_string())
    }

    /// Target directory for `cd`: the argument when given, `$HOME`
    /// otherwise.
    pub fn cd_target(&self, arg: Option<&str>) -> PathBuf {
        match arg {
            Some(path) => PathBuf::from(path),
            None => std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_dir_strips_the_file_name() {
        let mut shell = ShellState::new();
        shell.set_script_path("/opt/scripts/deploy.na");
        assert_eq!(shell.script_dir(), "/opt/scripts");
    }

    #[test]
    fn cd_target_prefers_the_argument() {
        let shell = ShellState::new();
        assert_eq!(shell.cd_target(Some("/tmp")), PathBuf::from("/tmp"));
    }
}
