//! Classifies a send failure as retryable or permanent.
//!
//! Grounded on `mail-send`'s own error taxonomy and on the
//! temporary/permanent split in
//! `examples/remails-com-remails/src/handler/mod.rs` (`SendError::{TemporaryFailure,PermanentFailure}`,
//! matched against `mail_send::Error` and `smtp_proto::Severity`).

use smtp_proto::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub retryable: bool,
    pub permanent: bool,
}

impl Classification {
    fn retryable() -> Self {
        Self {
            retryable: true,
            permanent: false,
        }
    }

    fn permanent() -> Self {
        Self {
            retryable: false,
            permanent: true,
        }
    }
}

/// Connection-timeout, connection-reset, and name-not-found are always
/// retryable; SMTP response codes in `[400, 500)` are retryable;
/// authentication failures are always permanent; everything else is
/// permanent.
pub fn classify(error: &mail_send::Error) -> Classification {
    match error {
        mail_send::Error::Io(_) => Classification::retryable(),
        mail_send::Error::Timeout => Classification::retryable(),
        mail_send::Error::Tls(_) => Classification::retryable(),
        mail_send::Error::Base64(_) => Classification::retryable(),
        mail_send::Error::UnparseableReply => Classification::retryable(),
        mail_send::Error::InvalidTLSName => Classification::retryable(),
        // Authentication failures (SMTP 535, auth-layer code) are always permanent.
        mail_send::Error::Auth(_) => Classification::permanent(),
        mail_send::Error::AuthenticationFailed(_) => Classification::permanent(),
        mail_send::Error::MissingCredentials => Classification::permanent(),
        mail_send::Error::UnsupportedAuthMechanism => Classification::permanent(),
        mail_send::Error::MissingMailFrom => Classification::permanent(),
        mail_send::Error::MissingRcptTo => Classification::permanent(),
        mail_send::Error::MissingStartTls => Classification::permanent(),
        mail_send::Error::UnexpectedReply(response) => {
            // 4xx SMTP replies are transient, 5xx are permanent.
            if response.severity() == Severity::TransientNegativeCompletion {
                Classification::retryable()
            } else {
                Classification::permanent()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn io_errors_are_retryable() {
        let err = mail_send::Error::Timeout;
        assert!(classify(&err).retryable);
        assert!(!classify(&err).permanent);
    }

    #[test]
    fn auth_failures_are_always_permanent() {
        assert!(classify(&mail_send::Error::MissingCredentials).permanent);
    }
}
