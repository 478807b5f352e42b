use std::fmt;

/// Every outcome the core distinguishes, besides plain success.
///
/// `KeyNotFound` and `Eof` are ordinary control-flow results, not defects;
/// everything else indicates a structural, configuration, or OS failure.
#[derive(Debug)]
pub enum Error {
    NoMemory,
    InvalidArgument(&'static str),
    KeyNotFound,
    KeyNotHidden,
    KeyExists,
    NoResource,
    BadFile,
    NoFile,
    NoTree,
    NoNode,
    NoPage,
    BadPage,
    NoRoot,
    NoIter,
    NoSub,
    NoState,
    BadState,
    BadSize,
    TooBig,
    NoMagic,
    NoVersion,
    UnknownVersion(u16),
    BadConfig(&'static str),
    UnknownType(u32),
    NotSupported(&'static str),
    NoSymbol(String),
    Eof,
    OneWay,
    /// An OS-level failure, tagged with the operation that triggered it.
    Os { op: &'static str, errno: i32 },
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoMemory => write!(f, "out of memory"),
            Error::InvalidArgument(what) => write!(f, "invalid argument: {what}"),
            Error::KeyNotFound => write!(f, "key not found"),
            Error::KeyNotHidden => write!(f, "key not hidden"),
            Error::KeyExists => write!(f, "key already exists"),
            Error::NoResource => write!(f, "no resource available (cache exhausted)"),
            Error::BadFile => write!(f, "bad file"),
            Error::NoFile => write!(f, "no such file"),
            Error::NoTree => write!(f, "no tree"),
            Error::NoNode => write!(f, "no node"),
            Error::NoPage => write!(f, "no page"),
            Error::BadPage => write!(f, "bad page"),
            Error::NoRoot => write!(f, "no root"),
            Error::NoIter => write!(f, "no iterator"),
            Error::NoSub => write!(f, "no subtree"),
            Error::NoState => write!(f, "no state"),
            Error::BadState => write!(f, "bad state"),
            Error::BadSize => write!(f, "bad size"),
            Error::TooBig => write!(f, "value too big"),
            Error::NoMagic => write!(f, "missing magic number"),
            Error::NoVersion => write!(f, "missing version"),
            Error::UnknownVersion(v) => write!(f, "unknown config version: {v}"),
            Error::BadConfig(why) => write!(f, "bad config: {why}"),
            Error::UnknownType(t) => write!(f, "unknown index type: {t}"),
            Error::NotSupported(what) => write!(f, "not supported: {what}"),
            Error::NoSymbol(name) => write!(f, "no such symbol: {name}"),
            Error::Eof => write!(f, "end of iteration"),
            Error::OneWay => write!(f, "iterator created one-way, enter() unavailable"),
            Error::Os { op, errno } => write!(f, "os error during {op}: errno {errno}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Error::NoFile,
            _ => Error::Os { op: "io", errno: e.raw_os_error().unwrap_or(-1) },
        }
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::Os { op: "nix", errno: e as i32 }
    }
}
