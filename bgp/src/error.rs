// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt::Display;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    // configuration
    #[error("expected 5 session parameters, found {0}")]
    ParameterCount(usize),

    #[error("invalid asn: {0}")]
    InvalidAsn(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid role: {0}")]
    InvalidRole(String),

    // codec
    #[error("too small: {0}")]
    TooSmall(String),

    #[error("too large: {0}")]
    TooLarge(String),

    #[error("no marker")]
    NoMarker,

    #[error("bad length: {0}")]
    BadLength(ExpectationMismatch<usize>),

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("message parse error")]
    Parse(nom::Err<(Vec<u8>, nom::error::ErrorKind)>),

    // transport
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("Attempt to send a message when not connected")]
    NotConnected,

    // event queue
    #[error("session stopped")]
    Stopped,

    #[error("disconnected")]
    Disconnected,
}

/// Coarse classification of errors, used by callers to decide whether a
/// failure should tear down a session or simply be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Codec,
    Transport,
    Queue,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ParameterCount(_)
            | Self::InvalidAsn(_)
            | Self::InvalidAddress(_)
            | Self::InvalidRole(_) => ErrorKind::Config,

            Self::TooSmall(_)
            | Self::TooLarge(_)
            | Self::NoMarker
            | Self::BadLength(_)
            | Self::UnknownMessageType(_)
            | Self::Parse(_) => ErrorKind::Codec,

            Self::Io(_)
            | Self::Timeout
            | Self::Cancelled
            | Self::NotConnected => ErrorKind::Transport,

            Self::Stopped | Self::Disconnected => ErrorKind::Queue,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ExpectationMismatch<T: Display> {
    pub expected: T,
    pub got: T,
}

impl<T: Display> Display for ExpectationMismatch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expected: {} got: {}", self.expected, self.got)
    }
}

impl<'a> From<nom::Err<(&'a [u8], nom::error::ErrorKind)>> for Error {
    fn from(e: nom::Err<(&'a [u8], nom::error::ErrorKind)>) -> Error {
        Error::Parse(e.to_owned())
    }
}
