use crate::connection::ConnectionId;

/// Point-in-time load of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLoad {
    pub id: ConnectionId,
    pub ready: bool,
    pub outstanding: usize,
}

/// Load-threshold balancer for worker connections.
///
/// A connection is eligible when it is ready and carries no more than
/// `ceil(total / fleet_size)` outstanding jobs, where `total` counts every
/// job in flight across the pool and `fleet_size` is the configured number
/// of worker processes. Among eligible connections the least loaded wins,
/// ties going to the lowest connection id.
#[derive(Debug, Clone, Copy)]
pub struct LoadBalancer {
    fleet_size: usize,
}

impl LoadBalancer {
    /// Create a balancer for `fleet_size` workers. Zero is treated as one.
    pub fn new(fleet_size: usize) -> Self {
        Self {
            fleet_size: fleet_size.max(1),
        }
    }

    pub fn fleet_size(&self) -> usize {
        self.fleet_size
    }

    /// Highest per-connection load still accepting work.
    pub fn threshold(&self, total_outstanding: usize) -> usize {
        total_outstanding.div_ceil(self.fleet_size)
    }

    pub fn is_eligible(&self, load: &ConnectionLoad, total_outstanding: usize) -> bool {
        load.ready && load.outstanding <= self.threshold(total_outstanding)
    }

    /// Pick a connection for the next job, or `None` if nothing is eligible.
    pub fn select(&self, loads: &[ConnectionLoad], total_outstanding: usize) -> Option<ConnectionId> {
        loads
            .iter()
            .filter(|load| self.is_eligible(load, total_outstanding))
            .min_by_key(|load| (load.outstanding, load.id))
            .map(|load| load.id)
    }
}
