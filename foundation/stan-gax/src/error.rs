use std::fmt;

/// The error-kind taxonomy from the store/broker error design. Every
/// fallible operation in `stan-store`, `stan-store-file`, `stan-store-sql`,
/// and `stan-broker` resolves to one of these kinds; transport layers map
/// them to their own wire status instead of the other way around.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Code {
    InvalidArgument,
    InvalidSubject,
    InvalidClientId,
    DuplicateClientId,
    UnknownClient,
    UnknownChannel,
    ChannelLimitReached,
    SubscriptionLimitReached,
    StartSequenceOutOfRange,
    VersionMismatch,
    ClusterIdMismatch,
    StoreUnavailable,
    StoreCorrupt,
}

impl Code {
    /// Whether a caller may reasonably retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Code::StoreUnavailable)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Code::InvalidArgument => "invalid argument",
            Code::InvalidSubject => "invalid subject",
            Code::InvalidClientId => "invalid client id",
            Code::DuplicateClientId => "duplicate client id",
            Code::UnknownClient => "unknown client",
            Code::UnknownChannel => "unknown channel",
            Code::ChannelLimitReached => "channel limit reached",
            Code::SubscriptionLimitReached => "subscription limit reached",
            Code::StartSequenceOutOfRange => "start sequence out of range",
            Code::VersionMismatch => "version mismatch",
            Code::ClusterIdMismatch => "cluster id mismatch",
            Code::StoreUnavailable => "store unavailable",
            Code::StoreCorrupt => "store corrupt",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// The error type returned by store and broker operations.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{code}: {message}")]
pub struct StanError {
    pub code: Code,
    pub message: String,
}

impl StanError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

macro_rules! ctor {
    ($name:ident, $code:ident) => {
        impl StanError {
            pub fn $name(message: impl Into<String>) -> Self {
                Self::new(Code::$code, message)
            }
        }
    };
}

ctor!(invalid_argument, InvalidArgument);
ctor!(invalid_subject, InvalidSubject);
ctor!(invalid_client_id, InvalidClientId);
ctor!(duplicate_client_id, DuplicateClientId);
ctor!(unknown_client, UnknownClient);
ctor!(unknown_channel, UnknownChannel);
ctor!(channel_limit_reached, ChannelLimitReached);
ctor!(subscription_limit_reached, SubscriptionLimitReached);
ctor!(start_sequence_out_of_range, StartSequenceOutOfRange);
ctor!(version_mismatch, VersionMismatch);
ctor!(cluster_id_mismatch, ClusterIdMismatch);
ctor!(store_unavailable, StoreUnavailable);
ctor!(store_corrupt, StoreCorrupt);
