//! Host discovery across /24 subnets.
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::address::{ReverseLookup, Subnet};
use crate::model::Device;
use crate::pool::TaskPool;
use crate::probe::{probe, EchoProbe};

/// Probes every host of a subnet and reports the ones that answer.
///
/// Each subnet gets its own pool, so the concurrency ceiling applies per
/// subnet. Devices come out in completion order, not address order.
pub struct Sweeper {
    prober: Arc<dyn EchoProbe>,
    resolver: Arc<dyn ReverseLookup>,
    concurrency: usize,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Sweeper {
    /// `concurrency` bounds the probes in flight per subnet and `timeout`
    /// is handed to every echo probe.
    pub fn new(
        prober: Arc<dyn EchoProbe>,
        resolver: Arc<dyn ReverseLookup>,
        concurrency: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            prober,
            resolver,
            concurrency,
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Lets the caller abort a sweep and keep what was found so far.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sweeps one subnet. Only responders are emitted; their MAC is left
    /// empty and their hostname is empty when reverse DNS fails.
    ///
    /// The stream ends once all 254 hosts have been probed.
    pub fn sweep(&self, subnet: Subnet) -> impl Stream<Item = Device> + Send + 'static {
        let prober = Arc::clone(&self.prober);
        let resolver = Arc::clone(&self.resolver);
        let timeout = self.timeout;

        debug!("Sweeping {subnet} with {} probes in flight", self.concurrency);
        let pool = TaskPool::new(self.concurrency).with_cancel(self.cancel.clone());
        let mut rx = pool.spawn_all(subnet.hosts(), move |ip| {
            let prober = Arc::clone(&prober);
            let resolver = Arc::clone(&resolver);
            async move {
                let os_guess = probe(prober.as_ref(), ip, timeout).await?;
                let hostname = resolver.reverse(IpAddr::V4(ip)).await.unwrap_or_default();
                debug!("{ip} is alive ({os_guess}) {hostname}");
                Some(Device::discovered(ip, hostname, os_guess))
            }
        });

        stream::poll_fn(move |cx| rx.poll_recv(cx))
    }

    /// Sweeps every subnet concurrently and gathers all responders.
    pub async fn sweep_all(&self, subnets: &[Subnet]) -> Vec<Device> {
        stream::select_all(subnets.iter().map(|subnet| self.sweep(*subnet).boxed()))
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::Sweeper;
    use crate::address::{ReverseLookup, Subnet};
    use crate::model::Device;
    use crate::probe::EchoProbe;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::collections::HashSet;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::{io, time};

    /// Answers for a fixed set of hosts and records how many probes overlap.
    #[derive(Default)]
    struct FakePing {
        alive: HashSet<Ipv4Addr>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        high_water: AtomicUsize,
    }

    #[async_trait]
    impl EchoProbe for FakePing {
        async fn echo(&self, ip: Ipv4Addr, _timeout: Duration) -> io::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.high_water.fetch_max(now, Ordering::SeqCst);
            time::sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.alive.contains(&ip) {
                Ok(format!("64 bytes from {ip}: icmp_seq=1 ttl=64 time=0.4 ms"))
            } else {
                Err(io::Error::new(io::ErrorKind::TimedOut, "no reply"))
            }
        }
    }

    struct NoNames;

    #[async_trait]
    impl ReverseLookup for NoNames {
        async fn reverse(&self, _ip: IpAddr) -> Option<String> {
            None
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sweep_respects_concurrency_ceiling() {
        let prober = Arc::new(FakePing::default());
        let sweeper = Sweeper::new(prober.clone(), Arc::new(NoNames), 16, Duration::from_secs(1));

        let devices = sweeper.sweep(Subnet::new(10, 0, 0)).collect::<Vec<_>>().await;

        assert!(devices.is_empty());
        assert_eq!(prober.calls.load(Ordering::SeqCst), 254);
        assert!(prober.high_water.load(Ordering::SeqCst) <= 16);
        assert_eq!(prober.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unresolved_hostname_is_empty() {
        let prober = Arc::new(FakePing {
            alive: HashSet::from([Ipv4Addr::new(10, 0, 0, 7)]),
            ..FakePing::default()
        });
        let sweeper = Sweeper::new(prober, Arc::new(NoNames), 100, Duration::from_secs(1));

        let devices = sweeper.sweep(Subnet::new(10, 0, 0)).collect::<Vec<_>>().await;

        assert_eq!(
            devices,
            vec![Device::discovered(Ipv4Addr::new(10, 0, 0, 7), String::new(), "Linux/macOS")]
        );
    }

    #[tokio::test]
    async fn sweep_all_fans_in_every_subnet() {
        let prober = Arc::new(FakePing {
            alive: HashSet::from([
                Ipv4Addr::new(10, 0, 0, 1),
                Ipv4Addr::new(10, 0, 1, 1),
                Ipv4Addr::new(10, 0, 1, 254),
            ]),
            ..FakePing::default()
        });
        let sweeper =
            Sweeper::new(prober.clone(), Arc::new(NoNames), 50, Duration::from_secs(1));

        let devices = sweeper
            .sweep_all(&[Subnet::new(10, 0, 0), Subnet::new(10, 0, 1)])
            .await;

        let found = devices.iter().map(|d| d.ip).collect::<HashSet<_>>();
        assert_eq!(found.len(), 3);
        assert!(found.contains(&Ipv4Addr::new(10, 0, 1, 254)));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 508);
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_the_sweep() {
        let prober = Arc::new(FakePing {
            alive: Subnet::new(10, 0, 0).hosts().collect(),
            ..FakePing::default()
        });
        let sweeper = Sweeper::new(prober.clone(), Arc::new(NoNames), 4, Duration::from_secs(1));

        let first = sweeper.sweep(Subnet::new(10, 0, 0)).take(1).collect::<Vec<_>>().await;
        assert_eq!(first.len(), 1);

        time::sleep(Duration::from_millis(50)).await;
        let settled = prober.calls.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(200)).await;

        assert_eq!(prober.calls.load(Ordering::SeqCst), settled);
        assert!(settled < 254);
    }

    #[tokio::test]
    async fn sweep_all_without_subnets_is_empty() {
        let sweeper = Sweeper::new(
            Arc::new(FakePing::default()),
            Arc::new(NoNames),
            10,
            Duration::from_secs(1),
        );
        assert!(sweeper.sweep_all(&[]).await.is_empty());
    }
}
