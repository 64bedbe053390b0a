// Kernel routing table access over rtnetlink

use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use futures::TryStreamExt;
use rtnetlink::{LinkUnspec, RouteMessageBuilder};
use tokio::task::JoinHandle;

use super::RouteSpec;

/// Operations the installer needs from the kernel.
///
/// Errors are plain `io::Error`s whose text is the kernel's error string, so
/// they can be fed to [`classify`](super::classify::classify) unchanged.
pub trait RouteBackend: Send + Sync + 'static {
    /// Resolve an interface name to its index.
    fn link_index(&self, name: &str) -> impl Future<Output = io::Result<u32>> + Send;

    /// Add a single route. Fails with EEXIST if the route is already present.
    fn add_route(&self, route: &RouteSpec) -> impl Future<Output = io::Result<()>> + Send;
}

pub struct NetlinkBackend {
    handle: rtnetlink::Handle,
    /// Background task processing rtnetlink responses.
    _connection_task: JoinHandle<()>,
}

impl NetlinkBackend {
    /// Open an rtnetlink socket. Must be called inside a tokio runtime.
    pub fn connect() -> io::Result<Self> {
        let (connection, handle, _) = rtnetlink::new_connection()?;
        let connection_task = tokio::spawn(connection);

        Ok(NetlinkBackend {
            handle,
            _connection_task: connection_task,
        })
    }

    /// Assign `<gateway>/24` to the interface and bring it up.
    ///
    /// An address that is already assigned is not an error.
    pub async fn prepare_interface(&self, name: &str, gateway: IpAddr) -> io::Result<()> {
        let index = self.link_index(name).await?;

        match self.handle.address().add(index, gateway, 24).execute().await {
            Ok(()) => tracing::info!("Assigned {}/24 to interface {}", gateway, name),
            Err(e) => {
                let err = to_io_error(e);
                if err.kind() != io::ErrorKind::AlreadyExists {
                    return Err(err);
                }
                tracing::info!("IP {} is already set up on interface {}", gateway, name);
            }
        }

        self.handle
            .link()
            .set(LinkUnspec::new_with_index(index).up().build())
            .execute()
            .await
            .map_err(to_io_error)?;

        tracing::info!("Interface {} is up", name);
        Ok(())
    }
}

impl RouteBackend for NetlinkBackend {
    async fn link_index(&self, name: &str) -> io::Result<u32> {
        let mut links = self.handle.link().get().match_name(name.to_string()).execute();
        let link = links.try_next().await.map_err(to_io_error)?;

        link.map(|msg| msg.header.index).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("link {} not found", name))
        })
    }

    async fn add_route(&self, route: &RouteSpec) -> io::Result<()> {
        let dst = route.destination;

        let message = match (dst.network, route.gateway) {
            (IpAddr::V4(network), IpAddr::V4(gateway)) => RouteMessageBuilder::<Ipv4Addr>::new()
                .destination_prefix(network, dst.prefix_len)
                .gateway(gateway)
                .output_interface(route.interface_index)
                .build(),
            (IpAddr::V6(network), IpAddr::V6(gateway)) => RouteMessageBuilder::<Ipv6Addr>::new()
                .destination_prefix(network, dst.prefix_len)
                .gateway(gateway)
                .output_interface(route.interface_index)
                .build(),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "invalid argument: gateway {} does not match address family of {}",
                        route.gateway, dst
                    ),
                ));
            }
        };

        self.handle
            .route()
            .add(message)
            .execute()
            .await
            .map_err(to_io_error)
    }
}

/// Netlink error replies carry a negated errno; surface it as the matching OS error.
fn to_io_error(err: rtnetlink::Error) -> io::Error {
    match &err {
        rtnetlink::Error::NetlinkError(msg) => match msg.code {
            Some(code) => io::Error::from_raw_os_error(-code.get()),
            None => io::Error::other(err.to_string()),
        },
        _ => io::Error::other(err.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::routes::Destination;

    const EEXIST: i32 = 17;

    /// In-memory routing table that behaves like the kernel for the cases we care about.
    #[derive(Default)]
    pub struct MockBackend {
        links: HashMap<String, u32>,
        routes: Mutex<HashSet<(Destination, u32)>>,
        failures: HashMap<Destination, i32>,
        delay: Option<Duration>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_link(mut self, name: &str, index: u32) -> Self {
            self.links.insert(name.to_string(), index);
            self
        }

        /// Make `add_route` for this destination fail with the given errno.
        pub fn with_failure(mut self, destination: &str, errno: i32) -> Self {
            let dest = Destination::parse(destination).expect("valid destination");
            self.failures.insert(dest, errno);
            self
        }

        pub fn with_existing(self, destination: &str, index: u32) -> Self {
            let dest = Destination::parse(destination).expect("valid destination");
            self.routes.lock().unwrap().insert((dest, index));
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        pub fn route_count(&self) -> usize {
            self.routes.lock().unwrap().len()
        }
    }

    impl RouteBackend for MockBackend {
        async fn link_index(&self, name: &str) -> io::Result<u32> {
            self.links
                .get(name)
                .copied()
                .ok_or_else(|| io::Error::from_raw_os_error(19))
        }

        async fn add_route(&self, route: &RouteSpec) -> io::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            match self.delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => tokio::task::yield_now().await,
            }

            let result = if let Some(errno) = self.failures.get(&route.destination) {
                Err(io::Error::from_raw_os_error(*errno))
            } else if self
                .routes
                .lock()
                .unwrap()
                .insert((route.destination, route.interface_index))
            {
                Ok(())
            } else {
                Err(io::Error::from_raw_os_error(EEXIST))
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }
}
