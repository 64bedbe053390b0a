// Single-route installation

use super::backend::RouteBackend;
use super::classify::{Outcome, RouteErrorKind, classify};
use super::{Destination, RouteSpec, RouteTarget};

/// Install one destination via the batch's resolved target.
///
/// A destination that does not parse, or whose address family differs from the
/// gateway's, is `InvalidArgument` and never reaches the kernel. Failures are terminal for the destination; nothing is retried here.
pub async fn install<B: RouteBackend>(
    backend: &B,
    destination: &str,
    target: &RouteTarget,
) -> Outcome {
    let Some(parsed) = Destination::parse(destination) else {
        tracing::debug!("Error parsing destination {:?}", destination);
        return Err(RouteErrorKind::InvalidArgument);
    };

    if parsed.network.is_ipv4() != target.gateway.is_ipv4() {
        tracing::debug!(
            "Destination {} and gateway {} are different address families",
            parsed,
            target.gateway
        );
        return Err(RouteErrorKind::InvalidArgument);
    }

    let route = RouteSpec {
        destination: parsed,
        gateway: target.gateway,
        interface_index: target.interface_index,
    };

    backend.add_route(&route).await.map_err(|e| {
        let kind = classify(&e);
        tracing::trace!("Error adding route {}: {} ({})", destination, e, kind);
        kind
    })
}
