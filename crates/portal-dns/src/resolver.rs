use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    proto::op::ResponseCode,
    TokioAsyncResolver,
};
use portal_config::dns::Configuration as DnsConfig;
use std::{future::Future, str, time::Duration};

/// Classified failure of a TXT lookup
///
/// Everything in here is non-fatal to a verification sweep. `Timeout` is the
/// one class that points at resolver infrastructure rather than at the
/// registrant's DNS configuration, which is why it is logged at a higher
/// severity by the adapter.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The hostname exists but carries no TXT records
    #[error("hostname has no TXT records")]
    NoAnswer,

    /// The hostname does not exist in DNS
    #[error("hostname does not exist")]
    DomainNotFound,

    /// Resolution exceeded the bounded lookup deadline
    #[error("TXT lookup timed out")]
    Timeout,

    /// Any other resolver-level failure
    #[error(transparent)]
    Other(ResolveError),
}

/// Seam over TXT resolution
///
/// The verification engine talks to DNS exclusively through this trait, so
/// tests can substitute a scripted lookup.
pub trait TxtLookup {
    /// Resolve the TXT records of `hostname` and return their raw text values
    fn lookup_txt(
        &self,
        hostname: &str,
    ) -> impl Future<Output = Result<Vec<String>, LookupError>> + Send;
}

/// TXT resolution against the system's configured nameservers
#[derive(Clone)]
pub struct DnsResolver {
    inner: TokioAsyncResolver,
}

impl DnsResolver {
    #[must_use]
    pub fn new(config: &DnsConfig) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.lookup_timeout_secs);

        Self {
            inner: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
        }
    }
}

impl TxtLookup for DnsResolver {
    #[instrument(skip(self))]
    async fn lookup_txt(&self, hostname: &str) -> Result<Vec<String>, LookupError> {
        let records = match self.inner.txt_lookup(hostname).await {
            Ok(records) => records,
            Err(err) => {
                let err = classify(err);
                match err {
                    LookupError::NoAnswer | LookupError::DomainNotFound => {
                        warn!(%hostname, error = %err, "TXT lookup failed");
                    }
                    LookupError::Timeout => {
                        error!(%hostname, "TXT lookup timed out; resolver infrastructure may be in trouble");
                    }
                    LookupError::Other(ref inner) => {
                        warn!(%hostname, error = %inner, "TXT lookup failed");
                    }
                }

                return Err(err);
            }
        };

        let texts = records
            .iter()
            .flat_map(|record| {
                record
                    .txt_data()
                    .iter()
                    .filter_map(|data| str::from_utf8(data).ok())
                    .map(ToString::to_string)
            })
            .collect();

        Ok(texts)
    }
}

fn classify(err: ResolveError) -> LookupError {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => {
            if *response_code == ResponseCode::NXDomain {
                LookupError::DomainNotFound
            } else {
                LookupError::NoAnswer
            }
        }
        ResolveErrorKind::Timeout => LookupError::Timeout,
        _ => LookupError::Other(err),
    }
}

#[cfg(test)]
mod test {
    use super::{classify, LookupError};
    use hickory_resolver::error::{ResolveError, ResolveErrorKind};

    #[test]
    fn timeout_is_classified() {
        let err = ResolveError::from(ResolveErrorKind::Timeout);
        assert!(matches!(classify(err), LookupError::Timeout));
    }

    #[test]
    fn unknown_errors_stay_classified_as_other() {
        let err = ResolveError::from("something else entirely");
        assert!(matches!(classify(err), LookupError::Other(..)));
    }
}
