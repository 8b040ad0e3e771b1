use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    NotFound,
    Open,
    Decode,
    Corrupt,
    Conversion,
    UnknownField,
    Template,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    path: Option<PathBuf>,
    key: Option<String>,
    page: Option<u64>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            path: None,
            key: None,
            page: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn page(&self) -> Option<u64> {
        self.page
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attaches the store key the failure relates to. Binary keys are
    /// rendered lossily so the error stays printable.
    pub fn with_key(mut self, key: impl AsRef<[u8]>) -> Self {
        self.key = Some(bstr::BStr::new(key.as_ref()).to_string());
        self
    }

    pub fn with_page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Fills in the path only when an inner layer has not already set one.
    pub fn or_path(mut self, path: impl Into<PathBuf>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(key) = &self.key {
            write!(f, " (key: {key})")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        if let Some(page) = self.page {
            write!(f, " (page: {page})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Open => 4,
        ErrorKind::Decode => 5,
        ErrorKind::Corrupt => 6,
        ErrorKind::Conversion => 7,
        ErrorKind::UnknownField => 8,
        ErrorKind::Template => 9,
        ErrorKind::Io => 10,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::NotFound, 3),
            (ErrorKind::Open, 4),
            (ErrorKind::Decode, 5),
            (ErrorKind::Corrupt, 6),
            (ErrorKind::Conversion, 7),
            (ErrorKind::UnknownField, 8),
            (ErrorKind::Template, 9),
            (ErrorKind::Io, 10),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::NotFound)
            .with_message("key not found")
            .with_key(b"/registry/pods/default/web")
            .with_path("/tmp/db");
        assert_eq!(
            err.to_string(),
            "NotFound: key not found (key: /registry/pods/default/web) (path: /tmp/db)"
        );
    }

    #[test]
    fn binary_keys_render_lossily() {
        let err = Error::new(ErrorKind::Decode).with_key([0xff, b'a']);
        assert_eq!(err.key(), Some("\u{FFFD}a"));
    }

    #[test]
    fn or_path_keeps_inner_path() {
        let err = Error::new(ErrorKind::Open)
            .with_path("/inner")
            .or_path("/outer");
        assert_eq!(err.path().unwrap().to_str(), Some("/inner"));
    }
}
