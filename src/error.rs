use std::error::Error as StdError;
use std::fmt::{self, Display};

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Runtime location attached to an error raised while a fiber is executing.
#[derive(Debug, Clone, Default)]
pub struct Site {
  pub module: String,
  pub line: i32,
}

/// The crate-wide error type.
///
/// Hand-rolled rather than built on `thiserror`: a plain enum with manual
/// `Display`/`StdError` impls is plenty for four variants, and avoids
/// pulling in a derive-macro crate for something this small.
#[derive(Debug)]
pub enum Error {
  /// A runtime error raised by the dispatch loop (type errors, arity
  /// mismatches, out-of-bounds access, arithmetic errors, stack overflow,
  /// native panics, `error()`/`throw` from script).
  Runtime { message: String, site: Site },
  /// The GC heap failed to satisfy an allocation request.
  Alloc,
  /// An error surfaced by the host through the embedding API (a `CFunction`
  /// returning a negative result count, or an exception converted at the
  /// trampoline boundary).
  Host(Box<dyn StdError + Send + Sync + 'static>),
  /// Opaque compile-time failure. The compiler is an external collaborator;
  /// this crate does not interpret the message, only carries it.
  Compile(String),
}

impl Error {
  pub fn runtime(module: impl Into<String>, line: i32, message: impl Into<String>) -> Self {
    Error::Runtime {
      message: message.into(),
      site: Site {
        module: module.into(),
        line,
      },
    }
  }

  pub fn simple(message: impl Into<String>) -> Self {
    Error::Runtime {
      message: message.into(),
      site: Site::default(),
    }
  }
}

impl From<crate::gc::AllocError> for Error {
  fn from(_: crate::gc::AllocError) -> Self {
    Error::Alloc
  }
}

impl Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::Runtime { message, site } => {
        if site.module.is_empty() {
          write!(f, "runtime error: {message}")
        } else {
          write!(f, "{}:{}: runtime error: {message}", site.module, site.line)
        }
      }
      Error::Alloc => write!(f, "out of memory"),
      Error::Host(e) => write!(f, "host error: {e}"),
      Error::Compile(msg) => write!(f, "compile error: {msg}"),
    }
  }
}

impl StdError for Error {}
