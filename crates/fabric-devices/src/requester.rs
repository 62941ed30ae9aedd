// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Traffic-generating host: an issue queue bounding outstanding requests, a
//! small LRU filter cache that shortcuts hits before they reach the fabric,
//! and a pluggable address-interleaving policy that decides what to issue
//! next.
//!
//! Grounded on `original_source/requester.hh`'s `Requester` and its
//! `Interleaving` hierarchy (`Stream`, `Random`, `Trace`).

use std::collections::{HashMap, HashSet, VecDeque};

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use fabric_core::{Addr, CompletedRequest, Context, Device, Packet, PacketType, PktId, StatKind, Tick, TopoId};

use crate::error::DevicesError;

/// Configuration for a [`Requester`].
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct RequesterConfig {
    /// Maximum outstanding (unacknowledged) requests.
    pub q_capacity: usize,
    /// Filter cache entry capacity.
    pub cache_capacity: usize,
    /// Latency a filter-cache hit or an invalidation response incurs.
    pub cache_delay: Tick,
    /// Fixed delay added between successive issues.
    pub issue_delay: Tick,
    /// Whether issued requests are coherent (`Rd`/`Wt`) or not (`NtRd`/`NtWt`).
    pub coherent: bool,
    /// Cache lines spanned by each request, passed through to burst splitting.
    pub burst_size: u32,
    /// Bytes per cache line.
    pub block_size: u32,
    /// One of `stream`, `random`, `trace`.
    pub interleave_type: String,
    /// For `stream`/`random`: total requests to issue before EOF.
    pub interleave_param: usize,
    /// For `trace`: path to the trace file.
    pub trace_file: String,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            q_capacity: 32,
            cache_capacity: 8192,
            cache_delay: 12,
            issue_delay: 0,
            coherent: false,
            burst_size: 1,
            block_size: 64,
            interleave_type: "stream".to_string(),
            interleave_param: 5,
            trace_file: String::new(),
        }
    }
}

/// A downstream memory endpoint a [`Requester`] can target.
#[derive(Debug, Clone, Copy)]
struct EndPoint {
    id: TopoId,
    start: Addr,
    capacity: u64,
    ratio: f64,
    cur: Addr,
}

struct Request {
    id: TopoId,
    addr: Addr,
    tick: Tick,
    is_write: bool,
}

/// An address-generation policy driving a [`Requester`]; produces a finite
/// sequence of [`Request`]s.
trait Interleaver {
    fn push_endpoint(&mut self, ep: EndPoint);
    fn endpoint_ids(&self) -> Vec<TopoId>;
    fn next(&mut self) -> Request;
    fn eof(&self) -> bool;
}

/// The round-robin endpoint cursor shared by [`Stream`] and [`Random`].
#[derive(Default)]
struct Endpoints {
    list: Vec<EndPoint>,
    cur: usize,
}

impl Endpoints {
    fn push(&mut self, ep: EndPoint) {
        self.list.push(ep);
    }

    fn ids(&self) -> Vec<TopoId> {
        self.list.iter().map(|ep| ep.id).collect()
    }

    fn advance(&mut self) {
        if !self.list.is_empty() {
            self.cur = (self.cur + 1) % self.list.len();
        }
    }
}

/// Box-Muller transform sampling `Normal(0.5, 0.5)` clamped to `[0, 1]` —
/// the original's `std::normal_distribution<>(0.5, 0.5)` capped with
/// `fmax`/`fmin`. Hand-rolled rather than pulling in a distributions crate
/// for one sampler.
fn sample_clamped_normal(rng: &mut Pcg64) -> f64 {
    let u1 = rng.gen::<f64>().max(f64::EPSILON);
    let u2 = rng.gen::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    (0.5 + 0.5 * z0).clamp(0.0, 1.0)
}

/// Round-robins endpoints, emitting the next block-aligned address on each,
/// wrapping within the endpoint's capacity window.
struct Stream {
    base: Endpoints,
    block_size: u64,
    total_count: usize,
    cur_count: usize,
    rng: Pcg64,
}

impl Stream {
    fn new(total_count: usize, block_size: u32) -> Self {
        Self {
            base: Endpoints::default(),
            block_size: u64::from(block_size),
            total_count,
            cur_count: 0,
            rng: Pcg64::from_entropy(),
        }
    }
}

impl Interleaver for Stream {
    fn push_endpoint(&mut self, ep: EndPoint) {
        self.base.push(ep);
    }

    fn endpoint_ids(&self) -> Vec<TopoId> {
        self.base.ids()
    }

    fn eof(&self) -> bool {
        self.cur_count >= self.total_count
    }

    fn next(&mut self) -> Request {
        let i = self.base.cur;
        let ratio = self.base.list[i].ratio;
        let is_write = self.rng.gen::<f64>() < ratio;
        let ep = &mut self.base.list[i];
        let id = ep.id;
        let addr = ep.cur;
        ep.cur += self.block_size;
        if ep.cur >= ep.start + ep.capacity {
            ep.cur = ep.start;
        }
        self.base.advance();
        self.cur_count += 1;
        Request { id, addr, tick: 0, is_write }
    }
}

/// Draws a clamped-normal-distributed offset into each endpoint's capacity
/// window, round-robin across endpoints.
struct Random {
    base: Endpoints,
    block_size: u64,
    total_count: usize,
    cur_count: usize,
    rng: Pcg64,
}

impl Random {
    fn new(total_count: usize, block_size: u32) -> Self {
        Self {
            base: Endpoints::default(),
            block_size: u64::from(block_size),
            total_count,
            cur_count: 0,
            rng: Pcg64::from_entropy(),
        }
    }
}

impl Interleaver for Random {
    fn push_endpoint(&mut self, ep: EndPoint) {
        self.base.push(ep);
    }

    fn endpoint_ids(&self) -> Vec<TopoId> {
        self.base.ids()
    }

    fn eof(&self) -> bool {
        self.cur_count >= self.total_count
    }

    fn next(&mut self) -> Request {
        let i = self.base.cur;
        let ep = self.base.list[i];
        let seed = sample_clamped_normal(&mut self.rng);
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let addr = ((ep.capacity as f64 / self.block_size as f64 * seed).floor() as u64) * self.block_size + ep.start;
        let is_write = self.rng.gen::<f64>() < ep.ratio;
        self.base.advance();
        self.cur_count += 1;
        Request {
            id: ep.id,
            addr,
            tick: 0,
            is_write,
        }
    }
}

/// Replays `(addr_hex, op_kind, tick)` records from a trace file, wrapping
/// each address into the round-robin endpoint's capacity window.
struct Trace {
    base: Endpoints,
    records: VecDeque<(Addr, bool, Tick)>,
}

impl Trace {
    fn new(path: &str) -> Result<Self, DevicesError> {
        let contents = std::fs::read_to_string(path).map_err(|e| DevicesError::TraceUnreadable {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let write_kinds: HashSet<&str> = ["W", "WR", "WRITE", "write", "P_MEM_WR", "BOFF"].into_iter().collect();
        let mut records = VecDeque::new();
        for line in contents.lines() {
            let mut fields = line.split_whitespace();
            let (Some(addr_field), Some(kind), Some(tick_field)) = (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let Ok(addr) = Addr::from_str_radix(addr_field.trim_start_matches("0x"), 16) else {
                continue;
            };
            let Ok(tick) = tick_field.parse::<Tick>() else {
                continue;
            };
            records.push_back((addr, write_kinds.contains(kind), tick));
        }
        Ok(Self {
            base: Endpoints::default(),
            records,
        })
    }
}

impl Interleaver for Trace {
    fn push_endpoint(&mut self, ep: EndPoint) {
        self.base.push(ep);
    }

    fn endpoint_ids(&self) -> Vec<TopoId> {
        self.base.ids()
    }

    fn eof(&self) -> bool {
        self.records.is_empty()
    }

    fn next(&mut self) -> Request {
        let ep = self.base.list[self.base.cur];
        let Some((addr, is_write, tick)) = self.records.pop_front() else {
            return Request {
                id: ep.id,
                addr: 0,
                tick: 0,
                is_write: false,
            };
        };
        let wrapped = if ep.capacity == 0 { ep.start } else { (addr % ep.capacity) + ep.start };
        self.base.advance();
        Request {
            id: ep.id,
            addr: wrapped,
            tick,
            is_write,
        }
    }
}

/// A capacity-bounded FIFO-eviction address cache: a hit promotes the
/// address to most-recently-used; `insert` is unconditional (can create
/// duplicate entries), matching `original_source/requester.hh`'s
/// `FakeLRUCache`.
struct FilterCache {
    entries: VecDeque<Addr>,
    capacity: usize,
    delay: Tick,
}

impl FilterCache {
    fn new(capacity: usize, delay: Tick) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            delay,
        }
    }

    fn insert(&mut self, addr: Addr) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(addr);
    }

    fn hit(&mut self, addr: Addr) -> bool {
        if let Some(pos) = self.entries.iter().position(|&a| a == addr) {
            self.entries.remove(pos);
            self.entries.push_back(addr);
            true
        } else {
            false
        }
    }

    fn invalidate(&mut self, addr: Addr) {
        if let Some(pos) = self.entries.iter().position(|&a| a == addr) {
            self.entries.remove(pos);
        }
    }
}

struct IssueQueue {
    ids: HashSet<PktId>,
    capacity: usize,
}

impl IssueQueue {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            capacity,
        }
    }

    fn full(&self) -> bool {
        self.ids.len() >= self.capacity
    }

    fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn push(&mut self, id: PktId) {
        if !self.full() {
            self.ids.insert(id);
        }
    }

    fn pop(&mut self, id: PktId) {
        self.ids.remove(&id);
    }
}

/// Per-endpoint traffic accumulators, exposed in full (the original reports
/// these per endpoint in addition to the aggregate `log_stats` view).
#[derive(Debug, Default, Clone, Copy)]
pub struct EndpointStats {
    /// Completed requests to this endpoint.
    pub count: f64,
    /// Total bytes moved (`burst * block_size` summed over completions).
    pub bandwidth: f64,
    /// Sum of `arrive - sent` over completions (divide by `count` for the mean).
    pub latency_sum: f64,
    /// Sum of `SnoopEvictDelay` over completions.
    pub wait_evict_sum: f64,
}

/// Source of packets: an issue queue, a filter cache, and a pluggable
/// interleaving policy; consumes responses and invalidation requests.
pub struct Requester {
    name: String,
    endpoints: Box<dyn Interleaver>,
    queue: IssueQueue,
    cache: FilterCache,
    cur: Tick,
    last_arrive: Tick,
    issued_count: usize,
    issue_delay: Tick,
    coherent: bool,
    burst_size: u32,
    block_size: u32,
    ended: bool,
    per_endpoint: HashMap<TopoId, EndpointStats>,
    cache_hit_count: f64,
    cache_evict_count: f64,
}

impl Requester {
    /// Builds a requester from its config.
    ///
    /// # Errors
    /// Returns [`DevicesError::UnknownInterleaveType`] for an unrecognized
    /// `interleave_type`, or [`DevicesError::TraceUnreadable`] if
    /// `interleave_type = "trace"` and `trace_file` can't be read.
    pub fn new(config: &RequesterConfig, name: impl Into<String>) -> Result<Self, DevicesError> {
        let endpoints: Box<dyn Interleaver> = match config.interleave_type.as_str() {
            "stream" => Box::new(Stream::new(config.interleave_param, config.block_size)),
            "random" => Box::new(Random::new(config.interleave_param, config.block_size)),
            "trace" => Box::new(Trace::new(&config.trace_file)?),
            other => return Err(DevicesError::UnknownInterleaveType(other.to_string())),
        };
        Ok(Self {
            name: name.into(),
            endpoints,
            queue: IssueQueue::new(config.q_capacity),
            cache: FilterCache::new(config.cache_capacity, config.cache_delay),
            cur: 0,
            last_arrive: 0,
            issued_count: 0,
            issue_delay: config.issue_delay,
            coherent: config.coherent,
            burst_size: config.burst_size,
            block_size: config.block_size,
            ended: false,
            per_endpoint: HashMap::new(),
            cache_hit_count: 0.0,
            cache_evict_count: 0.0,
        })
    }

    /// Registers a downstream endpoint this requester can target.
    pub fn add_end_point(&mut self, id: TopoId, start: Addr, capacity: u64, ratio: f64) {
        self.endpoints.push_endpoint(EndPoint {
            id,
            start,
            capacity,
            ratio,
            cur: start,
        });
        self.per_endpoint.entry(id).or_default();
    }

    /// Whether the interleaver's finite request sequence is exhausted.
    #[must_use]
    pub fn all_issued(&self) -> bool {
        self.endpoints.eof()
    }

    /// Whether every issued request has been acknowledged.
    #[must_use]
    pub fn q_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Read-only per-endpoint accumulators.
    #[must_use]
    pub const fn per_endpoint_stats(&self) -> &HashMap<TopoId, EndpointStats> {
        &self.per_endpoint
    }

    /// Total filter-cache hits across this requester's lifetime.
    #[must_use]
    pub const fn cache_hit_count(&self) -> f64 {
        self.cache_hit_count
    }

    /// Total filter-cache invalidations across this requester's lifetime.
    #[must_use]
    pub const fn cache_evict_count(&self) -> f64 {
        self.cache_evict_count
    }

    /// End-of-run human-readable lines: payload size, issued/evict/hit
    /// counts, per-endpoint bandwidth/latency/wait-for-evict, and an
    /// aggregate across endpoints. Mirrors
    /// `original_source/requester.hh`'s `log_stats`.
    #[must_use]
    pub fn log_stats(&self) -> Vec<String> {
        let mut lines = vec![
            format!("{} stats:", self.name),
            format!(" * Payload size: {} bytes", self.block_size),
            format!(" * Issued packets: {}", self.issued_count),
            format!(" * Evict count: {}", self.cache_evict_count),
            format!(" * Hit count: {}", self.cache_hit_count),
        ];

        let mut ids: Vec<TopoId> = self.per_endpoint.keys().copied().collect();
        ids.sort();

        let (mut agg_bw, mut agg_cnt, mut agg_lat, mut agg_wait) = (0.0_f64, 0.0_f64, 0.0_f64, 0.0_f64);
        let elapsed = (self.last_arrive as f64).max(1.0);
        for id in ids {
            let stat = self.per_endpoint[&id];
            agg_cnt += stat.count;
            let bw = stat.bandwidth / elapsed;
            agg_bw += bw;
            agg_lat += stat.latency_sum;
            agg_wait += stat.wait_evict_sum;
            lines.push(format!(" * Endpoint {id}:"));
            lines.push(format!("   - Bandwidth (GB/s): {bw}"));
            lines.push(format!(
                "   - Average latency (ns): {}",
                if stat.count > 0.0 { stat.latency_sum / stat.count } else { 0.0 }
            ));
            lines.push(format!(
                "   - Average wait for evict (ns): {}",
                if stat.count > 0.0 { stat.wait_evict_sum / stat.count } else { 0.0 }
            ));
        }

        lines.push(" * Aggregate:".to_string());
        lines.push(format!("   - Bandwidth (GB/s): {agg_bw}"));
        lines.push(format!(
            "   - Average latency (ns): {}",
            if agg_cnt > 0.0 { agg_lat / agg_cnt } else { 0.0 }
        ));
        lines.push(format!(
            "   - Average wait for evict (ns): {}",
            if agg_cnt > 0.0 { agg_wait / agg_cnt } else { 0.0 }
        ));
        lines
    }

    fn register_issue_event(&self, ctx: &mut Context, id: TopoId, tick: Tick) {
        ctx.schedule_event(id, tick.max(ctx.now()), 0);
    }

    /// One step of the issue state machine. Returns whether work happened
    /// (and thus whether another issue event should be armed).
    fn step(&mut self, ctx: &mut Context, id: TopoId) -> bool {
        if !self.endpoints.eof() {
            if self.queue.full() {
                if self.cur < self.last_arrive {
                    self.cur = self.last_arrive;
                }
                return false;
            }
            let req = self.endpoints.next();
            self.cur += self.issue_delay;
            if req.tick != 0 {
                self.cur = req.tick;
            }

            if self.cache.hit(req.addr) {
                let stat = self.per_endpoint.entry(req.id).or_default();
                stat.count += 1.0;
                stat.bandwidth += f64::from(self.burst_size) * f64::from(self.block_size);
                stat.latency_sum += self.cache.delay as f64;
                self.cache_hit_count += 1.0;
                self.cur += self.cache.delay;
                return true;
            }

            let ty = match (req.is_write, self.coherent) {
                (true, true) => PacketType::Wt,
                (true, false) => PacketType::NtWt,
                (false, true) => PacketType::Rd,
                (false, false) => PacketType::NtRd,
            };
            let length = if ty.is_write() { self.block_size } else { 0 };
            let mut pkt = Packet::new(ctx.pkt_ids(), ty, id, req.id, req.addr, length, self.cur);
            pkt.set_burst(self.burst_size);
            self.queue.push(pkt.id());
            self.issued_count += 1;
            let _ = ctx.send_pkt(id, pkt);
            true
        } else if self.ended {
            false
        } else {
            self.ended = true;
            for ep_id in self.endpoints.endpoint_ids() {
                let mut pkt = Packet::new(ctx.pkt_ids(), PacketType::NtRd, id, ep_id, 0, 0, self.cur);
                pkt.set_burst(0);
                self.queue.push(pkt.id());
                let _ = ctx.send_pkt(id, pkt);
            }
            true
        }
    }
}

impl Device for Requester {
    fn transit(&mut self, ctx: &mut Context, id: TopoId) {
        let Some(mut pkt) = ctx.receive(id) else {
            return;
        };

        if pkt.dst() != id {
            let _ = ctx.send_pkt(id, pkt);
            return;
        }

        if pkt.is_rsp() {
            self.last_arrive = pkt.arrive();
            self.cache.insert(pkt.addr());

            let wait_evict = ctx.stats().get(pkt.id(), StatKind::SnoopEvictDelay);
            let was_full = self.queue.full();
            let stat = self.per_endpoint.entry(pkt.src()).or_default();
            stat.count += 1.0;
            stat.bandwidth += f64::from(pkt.burst()) * f64::from(self.block_size);
            stat.latency_sum += pkt.arrive().saturating_sub(pkt.sent()) as f64;
            stat.wait_evict_sum += wait_evict;

            if was_full {
                self.register_issue_event(ctx, id, pkt.arrive());
            }
            self.queue.pop(pkt.id());
            ctx.record_completion(CompletedRequest {
                id: pkt.id(),
                host: id,
                ty: pkt.ty(),
                mem_id: pkt.src(),
                addr: pkt.addr(),
                sent: pkt.sent(),
                arrive: pkt.arrive(),
            });
        } else if pkt.ty() == PacketType::Inv {
            self.cache.invalidate(pkt.addr());
            self.cache_evict_count += 1.0;
            pkt.turn_around();
            pkt.set_length(self.block_size * pkt.burst());
            ctx.stats_mut().add(pkt.id(), StatKind::HostInvDelay, self.cache.delay as f64);
            pkt.set_arrive(pkt.arrive() + self.cache.delay);
            let _ = ctx.send_pkt(id, pkt);
        }
    }

    fn on_event(&mut self, ctx: &mut Context, id: TopoId, _tag: u64) {
        if self.step(ctx, id) {
            self.register_issue_event(ctx, id, self.cur);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn log_stats(&self) -> Vec<String> {
        self.log_stats()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    struct Sink {
        name: String,
    }
    impl Device for Sink {
        fn transit(&mut self, ctx: &mut Context, id: TopoId) {
            let _ = ctx.receive(id);
        }
        fn name(&self) -> &str {
            &self.name
        }
    }

    fn linked(config: &RequesterConfig) -> (Context, TopoId, TopoId) {
        let mut ctx = Context::new();
        let mut req = Requester::new(config, "host0").unwrap();
        let mem_placeholder = ctx.add_device(Box::new(Sink {
            name: "mem".to_string(),
        }));
        req.add_end_point(mem_placeholder, 0, 1 << 20, 0.5);
        let host = ctx.add_device(Box::new(req));
        ctx.add_edge(host, mem_placeholder).unwrap();
        ctx.build_routes();
        (ctx, host, mem_placeholder)
    }

    #[test]
    fn unknown_interleave_type_is_rejected() {
        let config = RequesterConfig {
            interleave_type: "bogus".to_string(),
            ..RequesterConfig::default()
        };
        assert_eq!(
            Requester::new(&config, "host0").unwrap_err(),
            DevicesError::UnknownInterleaveType("bogus".to_string())
        );
    }

    #[test]
    fn a_stream_requester_issues_and_terminates() {
        let config = RequesterConfig {
            interleave_type: "stream".to_string(),
            interleave_param: 3,
            q_capacity: 8,
            ..RequesterConfig::default()
        };
        let (mut ctx, host, _mem) = linked(&config);
        ctx.schedule_event(host, 0, 0);
        ctx.run_to_completion();
    }

    #[test]
    fn filter_cache_hit_shortcuts_without_reaching_the_fabric() {
        let mut cache = FilterCache::new(4, 12);
        cache.insert(0x1000);
        assert!(cache.hit(0x1000));
        assert!(!cache.hit(0x2000));
    }

    #[test]
    fn filter_cache_evicts_oldest_entry_when_full() {
        let mut cache = FilterCache::new(2, 12);
        cache.insert(1);
        cache.insert(2);
        cache.insert(3);
        assert!(!cache.hit(1));
        assert!(cache.hit(2) || cache.hit(3));
    }
}
