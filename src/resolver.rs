use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use crate::error::AgentError;

/// Hostname resolution seam. The default implementation delegates to the
/// system resolver via Tokio; callers who need split-horizon DNS, a
/// Proxy-Auto-Config script, or test fixtures can supply their own.
///
/// A trait object (not an enum) because, unlike the decoder set, resolvers
/// are an open-ended collaborator a caller plugs in from outside this
/// crate.
pub trait Resolver: Send + Sync {
    fn resolve<'a>(
        &'a self,
        host: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<IpAddr, AgentError>> + Send + 'a>>;
}

pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve<'a>(
        &'a self,
        host: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<IpAddr, AgentError>> + Send + 'a>> {
        Box::pin(async move {
            let mut addrs = tokio::net::lookup_host((host, 0))
                .await
                .map_err(AgentError::from)?;
            addrs
                .next()
                .map(|addr| addr.ip())
                .ok_or_else(|| AgentError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no addresses found for {}", host),
                )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_localhost() {
        let resolver = SystemResolver;
        let ip = resolver.resolve("localhost").await.unwrap();
        assert!(ip.is_loopback());
    }
}
