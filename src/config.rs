use std::{
    env,
    path::{Path, PathBuf},
    process::Command,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    io::paths::{settings_path, stems_cache_dir},
};

pub const ENV_ENGINE_PROGRAM: &str = "REMIX_ENGINE_PROGRAM";
pub const ENV_ENGINE_SCRIPT: &str = "REMIX_ENGINE_SCRIPT";
pub const ENV_CACHE_DIR: &str = "REMIX_CACHE_DIR";
pub const ENV_TMP_DIR: &str = "REMIX_TMP_DIR";
pub const ENV_SETTINGS_PATH: &str = "REMIX_SETTINGS_PATH";

const INPUT_PLACEHOLDER: &str = "{input}";
const OUTPUT_PLACEHOLDER: &str = "{output}";

/// How to launch the external separation engine.
///
/// `{input}` and `{output}` in `args` are replaced by the input file and the
/// job's output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl EngineCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `python3 demucs_separate.py {input} -o {output} --json`
    pub fn demucs(script: impl Into<String>) -> Self {
        Self::new(
            "python3",
            vec![
                script.into(),
                INPUT_PLACEHOLDER.into(),
                "-o".into(),
                OUTPUT_PLACEHOLDER.into(),
                "--json".into(),
            ],
        )
    }

    pub fn command(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        for arg in &self.args {
            let arg = arg
                .replace(INPUT_PLACEHOLDER, &input.to_string_lossy())
                .replace(OUTPUT_PLACEHOLDER, &output.to_string_lossy());
            cmd.arg(arg);
        }
        cmd
    }
}

impl Default for EngineCommand {
    fn default() -> Self {
        Self::demucs(default_script_path())
    }
}

fn default_script_path() -> String {
    format!("{}/scripts/demucs_separate.py", env!("CARGO_MANIFEST_DIR"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemixConfig {
    pub engine: EngineCommand,
    pub cache_root: PathBuf,
    pub work_dir: PathBuf,
    pub settings_path: PathBuf,
}

impl RemixConfig {
    /// Platform defaults, overridden by `REMIX_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let script = env::var(ENV_ENGINE_SCRIPT).unwrap_or_else(|_| default_script_path());
        let mut engine = EngineCommand::demucs(script);
        if let Ok(program) = env::var(ENV_ENGINE_PROGRAM) {
            engine.program = program;
        }

        let cache_root = match env::var(ENV_CACHE_DIR) {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => stems_cache_dir()?,
        };
        let settings_path = match env::var(ENV_SETTINGS_PATH) {
            Ok(p) => PathBuf::from(p),
            Err(_) => settings_path()?,
        };
        let work_dir = env::var(ENV_TMP_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("remix-core"));

        Ok(Self {
            engine,
            cache_root,
            work_dir,
            settings_path,
        })
    }

    /// Everything under one directory; handy for tests and portable setups.
    pub fn rooted_at<P: AsRef<Path>>(root: P, engine: EngineCommand) -> Self {
        let root = root.as_ref();
        Self {
            engine,
            cache_root: root.join("cache"),
            work_dir: root.join("work"),
            settings_path: root.join("settings.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_substituted() {
        let cmd = EngineCommand::demucs("sep.py")
            .command(Path::new("/music/song.wav"), Path::new("/tmp/job"));
        let args: Vec<_> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(cmd.get_program(), "python3");
        assert_eq!(
            args,
            vec!["sep.py", "/music/song.wav", "-o", "/tmp/job", "--json"]
        );
    }
}
