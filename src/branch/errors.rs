// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{error::Error, fmt, io, string};

pub type BranchResult<T> = Result<T, BranchError>;

/// Classifies engine errors so that callers can distinguish recoverable
/// conditions from plain backend failures.
#[derive(Debug, Clone)]
pub enum ErrorKind {
    /// The storage backend rejected or failed an operation.
    Backend,
    /// The daemon configuration is invalid.
    Config,
    /// The target exists but is busy or has dependents.
    InUse,
    /// The named object does not exist.
    NotFound,
    /// A record or stream could not be interpreted.
    Parse,
}

#[derive(Debug)]
pub enum BranchError {
    Engine(ErrorKind, String),
    Command(String),
    Io(io::Error),
    Nix(nix::Error),
    Utf8(string::FromUtf8Error),
    Serde(serde_json::error::Error),
    Join(tokio::task::JoinError),
}

impl fmt::Display for BranchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BranchError::Engine(_, ref msg) => write!(f, "Engine error: {}", msg),
            BranchError::Command(ref msg) => write!(f, "Command error: {}", msg),
            BranchError::Io(ref err) => write!(f, "IO error: {}", err),
            BranchError::Nix(ref err) => write!(f, "Nix error: {}", err),
            BranchError::Utf8(ref err) => write!(f, "Utf8 error: {}", err),
            BranchError::Serde(ref err) => write!(f, "Serde error: {}", err),
            BranchError::Join(ref err) => write!(f, "Thread joining error: {}", err),
        }
    }
}

impl Error for BranchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match *self {
            BranchError::Engine(_, _) | BranchError::Command(_) => None,
            BranchError::Io(ref err) => Some(err),
            BranchError::Nix(ref err) => Some(err),
            BranchError::Utf8(ref err) => Some(err),
            BranchError::Serde(ref err) => Some(err),
            BranchError::Join(ref err) => Some(err),
        }
    }
}

impl From<io::Error> for BranchError {
    fn from(err: io::Error) -> BranchError {
        BranchError::Io(err)
    }
}

impl From<nix::Error> for BranchError {
    fn from(err: nix::Error) -> BranchError {
        BranchError::Nix(err)
    }
}

impl From<string::FromUtf8Error> for BranchError {
    fn from(err: string::FromUtf8Error) -> BranchError {
        BranchError::Utf8(err)
    }
}

impl From<serde_json::error::Error> for BranchError {
    fn from(err: serde_json::error::Error) -> BranchError {
        BranchError::Serde(err)
    }
}

impl From<tokio::task::JoinError> for BranchError {
    fn from(err: tokio::task::JoinError) -> BranchError {
        BranchError::Join(err)
    }
}
