use std::{
    io::{self, BufWriter},
    path::PathBuf,
    str::FromStr,
};

/// Possible choices for output streams.
/// * "-" and "<out>" are treated as stdout.
/// * "<err>" is treated as stderr.
/// * "<null>" is treated as a null output stream.
/// * All other strings are treated as file paths.
#[derive(Debug, Clone, Default)]
pub enum OutputFile {
    Null,
    #[default]
    Stdout,
    Stderr,
    File(PathBuf),
}

impl OutputFile {
    pub fn file(path: PathBuf) -> Self {
        OutputFile::File(path)
    }

    pub fn as_path_string(&self) -> String {
        match self {
            OutputFile::Null => "<null>".to_string(),
            OutputFile::Stdout => "<stdout>".to_string(),
            OutputFile::Stderr => "<stderr>".to_string(),
            OutputFile::File(path) => path.to_string_lossy().to_string(),
        }
    }

    pub fn isatty(&self) -> bool {
        match self {
            OutputFile::Stdout => atty::is(atty::Stream::Stdout),
            OutputFile::Stderr => atty::is(atty::Stream::Stderr),
            OutputFile::Null | OutputFile::File(..) => false,
        }
    }

    pub fn get_write(&self) -> io::Result<Box<dyn io::Write>> {
        Ok(match self {
            OutputFile::Stdout => Box::new(BufWriter::new(io::stdout())),
            OutputFile::Stderr => Box::new(BufWriter::new(io::stderr())),
            OutputFile::File(path) => {
                Box::new(BufWriter::new(std::fs::File::create(path)?))
            }
            OutputFile::Null => Box::new(io::sink()),
        })
    }
}

impl FromStr for OutputFile {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "-" | "<out>" => Ok(OutputFile::Stdout),
            "<err>" => Ok(OutputFile::Stderr),
            "<null>" => Ok(OutputFile::Null),
            _ => Ok(OutputFile::file(PathBuf::from(s))),
        }
    }
}

impl std::fmt::Display for OutputFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFile::Stdout => write!(f, "-"),
            OutputFile::Stderr => write!(f, "<err>"),
            OutputFile::Null => write!(f, "<null>"),
            OutputFile::File(path) => write!(f, "{}", path.display()),
        }
    }
}
