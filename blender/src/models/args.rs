use crate::models::{
    engine::Engine,
    format::Format,
    mode::{Mode, FRAME_PLACEHOLDER},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ref: https://docs.blender.org/manual/en/latest/advanced/command_line/render.html
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Args {
    file: PathBuf,                // required
    mode: Mode,                   // required
    pub scene: Option<String>,    // optional
    pub output: Option<PathBuf>,  // optional
    pub format: Option<Format>,   // optional
    pub engine: Option<Engine>,   // optional
    pub python: Option<PathBuf>,  // optional - script to run after the file is loaded
}

// Pieces of the command line. Only values get quoted when the line is turned into a shell command.
enum Token {
    Flag(&'static str),
    Value(String),
    Raw(String),
}

impl Args {
    pub fn new(file: impl AsRef<Path>, mode: Mode) -> Self {
        Args {
            file: file.as_ref().to_path_buf(),
            mode,
            ..Default::default()
        }
    }

    /// Arguments to load `file` in the background and run a python script against it.
    pub fn script(file: impl AsRef<Path>, script: impl AsRef<Path>) -> Self {
        Args {
            python: Some(script.as_ref().to_path_buf()),
            ..Self::new(file, Mode::None)
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    fn tokens(&self) -> Vec<Token> {
        // More context: https://docs.blender.org/manual/en/latest/advanced/command_line/arguments.html#argument-order
        // render options only apply to what comes after them, so the mode must stay last
        let mut col = vec![
            Token::Flag("-b"),
            Token::Value(self.file.to_string_lossy().into_owned()),
            // allow scripts stored in the file, drivers depend on them
            Token::Flag("-y"),
        ];

        if let Some(scene) = &self.scene {
            col.push(Token::Flag("-S"));
            col.push(Token::Value(scene.clone()));
        }
        if let Some(output) = &self.output {
            col.push(Token::Flag("-o"));
            col.push(Token::Value(output.to_string_lossy().into_owned()));
        }
        if let Some(format) = self.format.as_ref().filter(|f| f.is_known()) {
            col.push(Token::Flag("-F"));
            col.push(Token::Value(format.to_string()));
        }
        if let Some(engine) = &self.engine {
            col.push(Token::Flag("-E"));
            col.push(Token::Value(engine.to_string()));
        }
        if let Some(python) = &self.python {
            col.push(Token::Flag("-P"));
            col.push(Token::Value(python.to_string_lossy().into_owned()));
        }

        match self.mode {
            Mode::Frame(frame) => {
                col.push(Token::Flag("-f"));
                col.push(Token::Value(frame.to_string()));
            }
            // Render the whole animation using all the settings saved in the blend-file.
            Mode::Animation { start, end } => {
                col.push(Token::Flag("-s"));
                col.push(Token::Value(start.to_string()));
                col.push(Token::Flag("-e"));
                col.push(Token::Value(end.to_string()));
                col.push(Token::Flag("-a"));
            }
            Mode::Numeric { step } => {
                col.push(Token::Flag("-s"));
                col.push(Token::Raw(FRAME_PLACEHOLDER.to_owned()));
                col.push(Token::Flag("-e"));
                col.push(Token::Raw(FRAME_PLACEHOLDER.to_owned()));
                col.push(Token::Flag("-j"));
                col.push(Token::Value(step.to_string()));
                col.push(Token::Flag("-a"));
            }
            Mode::None => {}
        }

        col
    }

    /// Argument list for spawning blender directly.
    pub fn create_arg_list(&self) -> Vec<String> {
        self.tokens()
            .into_iter()
            .map(|token| match token {
                Token::Flag(flag) => flag.to_owned(),
                Token::Value(value) | Token::Raw(value) => value,
            })
            .collect()
    }

    /// Single command string, e.g. for a farm task. `quote` escapes the executable and
    /// every value, while flags and the frame placeholder stay bare.
    pub fn to_command(&self, executable: &Path, quote: impl Fn(&str) -> String) -> String {
        let mut parts = vec![quote(&executable.to_string_lossy())];
        parts.extend(self.tokens().into_iter().map(|token| match token {
            Token::Flag(flag) => flag.to_owned(),
            Token::Value(value) => quote(&value),
            Token::Raw(raw) => raw,
        }));
        parts.join(" ")
    }
}
