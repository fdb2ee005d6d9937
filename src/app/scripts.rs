use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{info, warn};

use crate::error::ScriptError;
use crate::models::message::BotCommand;

/// Button data is `del:<name>`/`run:<name>` and Telegram caps callback data at 64 bytes.
const MAX_NAME_LEN: usize = 60;

/// Shell scripts the operator uploaded, runnable by name.
pub struct ScriptLibrary {
    dir: PathBuf,
}

pub fn default_commands() -> Vec<BotCommand> {
    vec![
        BotCommand::new("sh", "sh [your command]"),
        BotCommand::new("ps", "show all running tasks"),
        BotCommand::new("ls", "show script files"),
        BotCommand::new("stop", "stop a task by id"),
    ]
}

/// `backup.sh` -> `backup`
pub fn command_name(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(file_name)
}

impl ScriptLibrary {
    pub fn new(dir: PathBuf) -> Self {
        ScriptLibrary { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn list(&self) -> Result<Vec<String>, ScriptError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn path_of(&self, name: &str) -> Result<PathBuf, ScriptError> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }

    /// Finds the script that `/name` refers to.
    pub fn find_by_command(&self, command: &str) -> Option<String> {
        match self.list() {
            Ok(names) => names.into_iter().find(|name| command_name(name) == command),
            Err(e) => {
                warn!("error reading script folder: {}", e);
                None
            }
        }
    }

    /// Writes an uploaded script and keeps it only if `bash -n` accepts it.
    pub fn save(&self, name: &str, contents: &[u8]) -> Result<PathBuf, ScriptError> {
        let path = self.path_of(name)?;
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, contents)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o770))?;

        if let Err(e) = check_bash_syntax(&path) {
            fs::remove_file(&path)?;
            return Err(e);
        }
        info!("upload: {}", path.display());
        Ok(path)
    }

    pub fn remove(&self, name: &str) -> Result<(), ScriptError> {
        let path = self.path_of(name)?;
        fs::remove_file(&path)?;
        info!("delete file: {}", path.display());
        Ok(())
    }

    /// The default commands plus one `/stem` entry per script.
    pub fn commands(&self) -> Vec<BotCommand> {
        let mut commands = default_commands();
        match self.list() {
            Ok(names) => commands.extend(
                names
                    .iter()
                    .map(|name| BotCommand::new(command_name(name), "---")),
            ),
            Err(e) => warn!("error reading script folder: {}", e),
        }
        commands
    }
}

fn validate_name(name: &str) -> Result<(), ScriptError> {
    let plain = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && !command_name(name).is_empty();
    if plain {
        Ok(())
    } else {
        Err(ScriptError::InvalidName(name.to_string()))
    }
}

/// Parses the script with `bash -n` without running it.
pub fn check_bash_syntax(path: &Path) -> Result<(), ScriptError> {
    let output = Command::new("bash").arg("-n").arg(path).output()?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ScriptError::Syntax(stderr.trim_matches(['\n', ' ']).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn library() -> (tempfile::TempDir, ScriptLibrary) {
        let dir = tempfile::tempdir().unwrap();
        let library = ScriptLibrary::new(dir.path().join("scripts"));
        (dir, library)
    }

    #[test]
    fn missing_directory_lists_nothing() {
        let (_dir, library) = library();
        assert!(library.list().unwrap().is_empty());
    }

    #[test]
    fn saves_valid_script() {
        let (_dir, library) = library();
        let path = library.save("hello.sh", b"echo hello\n").unwrap();

        assert!(path.exists());
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o770);
        assert_eq!(library.list().unwrap(), vec!["hello.sh".to_string()]);
        assert_eq!(library.find_by_command("hello"), Some("hello.sh".to_string()));
    }

    #[test]
    fn rejects_and_removes_broken_script() {
        let (_dir, library) = library();
        let err = library.save("broken.sh", b"if then fi (\n").unwrap_err();

        assert!(matches!(err, ScriptError::Syntax(_)));
        assert!(!library.dir().join("broken.sh").exists());
    }

    #[test]
    fn refuses_path_like_names() {
        let (_dir, library) = library();
        for name in ["../evil.sh", ".hidden.sh", "", "a/b.sh"] {
            assert!(matches!(library.path_of(name), Err(ScriptError::InvalidName(_))), "{name}");
        }
    }

    #[test]
    fn rejects_names_too_long_for_button_data() {
        let (_dir, library) = library();
        let longest = format!("{}.sh", "a".repeat(MAX_NAME_LEN - 3));
        assert!(library.path_of(&longest).is_ok());

        let too_long = format!("{}.sh", "a".repeat(MAX_NAME_LEN - 2));
        assert!(matches!(
            library.save(&too_long, b"true\n"),
            Err(ScriptError::InvalidName(_))
        ));
        assert!(library.list().unwrap().is_empty());
    }

    #[test]
    fn remove_deletes_the_file() {
        let (_dir, library) = library();
        library.save("gone.sh", b"true\n").unwrap();
        library.remove("gone.sh").unwrap();
        assert!(library.list().unwrap().is_empty());
        assert!(library.remove("gone.sh").is_err());
    }

    #[test]
    fn commands_include_scripts() {
        let (_dir, library) = library();
        library.save("deploy.sh", b"true\n").unwrap();
        let names: Vec<String> = library.commands().into_iter().map(|c| c.command).collect();
        assert_eq!(names, vec!["sh", "ps", "ls", "stop", "deploy"]);
    }
}
