use console::style;
use std::collections::VecDeque;

/// Interconnect between requesters and memory sub partitions.
///
/// Node ids start at 0 for requesters and continue with the
/// global sub partition ids offset by the number of requesters.
pub trait Interconnect<P> {
    fn busy(&self) -> bool;

    fn push(&mut self, src: usize, dest: usize, packet: P, size: u32, time: u64);

    /// Pop the oldest packet delivered to `dest` by `time`.
    fn pop(&mut self, dest: usize, time: u64) -> Option<P>;

    /// Whether `src` can inject a packet of `size` bytes.
    fn has_buffer(&self, src: usize, size: u32) -> bool;
}

#[derive(Debug)]
struct InFlight<P> {
    src: usize,
    ready_cycle: u64,
    packet: P,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Stats {
    pub num_packets: u64,
    pub num_bytes: u64,
}

/// A crossbar with a fixed latency and bounded injection buffers.
#[derive(Debug)]
pub struct ToyInterconnect<P> {
    pub num_requesters: usize,
    pub num_mems: usize,
    latency: u64,
    /// Packets a node may have in flight
    buffer_size: Option<usize>,
    in_flight: Vec<usize>,
    output_queue: Vec<VecDeque<InFlight<P>>>,
    pub stats: Stats,
}

impl<P> ToyInterconnect<P> {
    #[must_use]
    pub fn new(
        num_requesters: usize,
        num_mems: usize,
        latency: u64,
        buffer_size: Option<usize>,
    ) -> Self {
        let num_nodes = num_requesters + num_mems;
        Self {
            num_requesters,
            num_mems,
            latency,
            buffer_size,
            in_flight: vec![0; num_nodes],
            output_queue: (0..num_nodes).map(|_| VecDeque::new()).collect(),
            stats: Stats::default(),
        }
    }

    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.num_requesters + self.num_mems
    }

    /// Node id of a global sub partition.
    #[must_use]
    pub fn mem_node(&self, sub_partition: usize) -> usize {
        self.num_requesters + sub_partition
    }

    /// Packets in flight towards `dest`.
    pub fn pending(&self, dest: usize) -> impl Iterator<Item = &P> + '_ {
        self.output_queue[dest].iter().map(|in_flight| &in_flight.packet)
    }

    /// Packets in flight towards any memory node.
    pub fn pending_to_mems(&self) -> impl Iterator<Item = &P> + '_ {
        self.output_queue[self.num_requesters..]
            .iter()
            .flatten()
            .map(|in_flight| &in_flight.packet)
    }
}

impl<P> Interconnect<P> for ToyInterconnect<P>
where
    P: std::fmt::Display,
{
    fn busy(&self) -> bool {
        self.output_queue.iter().any(|queue| !queue.is_empty())
    }

    fn push(&mut self, src: usize, dest: usize, packet: P, size: u32, time: u64) {
        assert!(self.has_buffer(src, size), "interconn: node {src} has no buffer");
        log::debug!(
            "{}: {size} bytes from node {src} to {dest}",
            style(format!("INTERCONN PUSH {packet}")).bold(),
        );
        self.in_flight[src] += 1;
        self.stats.num_packets += 1;
        self.stats.num_bytes += u64::from(size);
        self.output_queue[dest].push_back(InFlight {
            src,
            ready_cycle: time + self.latency,
            packet,
        });
    }

    fn pop(&mut self, dest: usize, time: u64) -> Option<P> {
        let queue = &mut self.output_queue[dest];
        if queue.front()?.ready_cycle > time {
            return None;
        }
        let in_flight = queue.pop_front()?;
        self.in_flight[in_flight.src] -= 1;
        log::trace!(
            "{}: {} at node {dest}",
            style("INTERCONN POP").bold(),
            in_flight.packet
        );
        Some(in_flight.packet)
    }

    fn has_buffer(&self, src: usize, _size: u32) -> bool {
        self.buffer_size
            .map_or(true, |buffer_size| self.in_flight[src] < buffer_size)
    }
}
