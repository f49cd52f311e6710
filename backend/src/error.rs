use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    OpenCV(#[from] opencv::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unknown task {0}, expected 0..=3")]
    InvalidTask(u8),
    #[error("frame {} could not be read", .0.display())]
    UnreadableFrame(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn messages_name_the_cause() {
        assert!(Error::InvalidTask(7).to_string().contains('7'));
        let unreadable = Error::UnreadableFrame(PathBuf::from("/tmp/frame.png"));
        assert!(unreadable.to_string().contains("frame.png"));
    }
}
