use crate::curves::CurveLookup;
use crate::log_warn;
use crate::models::{AggregationKey, Direction, MemoryMetrics, MemoryRecord, MetricSums};
use crate::processors::socket::SocketMemoryRecords;
use std::collections::{BTreeMap, HashMap};
use std::io;

/// is_processable 의 결과
#[derive(Debug, Clone, Copy)]
pub struct ProcessableData {
    pub processable: bool,
    pub smallest_time: u64, // 노드 내 최소 대기 시각, 없으면 u64::MAX
    pub socket_id: u32,
    pub controller_id: Option<u32>, // None = 소켓 단위 집계
}

/// 한 노드의 모든 소켓과 메트릭 누적 상태.
///
/// 샘플 라우팅, 처리 가능 판정, 곡선 조회를 통한 메트릭 벡터 완성,
/// 실행 종료 평균 계산, 직전 기록 값 기반 중복 제거를 담당한다.
pub struct NodeMemoryRecords {
    pub node_id: usize,
    pub name: String,
    pub sockets: BTreeMap<u32, SocketMemoryRecords>,
    pub per_socket: bool,
    cpu_freq_ghz: f64,
    cache_line_bytes: u32,
    last_written: HashMap<AggregationKey, MemoryMetrics>,
    sum_metrics: BTreeMap<AggregationKey, MetricSums>,
}

impl NodeMemoryRecords {
    pub fn new(
        node_id: usize,
        name: String,
        mcs_per_socket: &BTreeMap<u32, Vec<u32>>,
        per_socket: bool,
        cpu_freq_ghz: f64,
        cache_line_bytes: u32,
    ) -> Self {
        let mut sockets = BTreeMap::new();
        let mut sum_metrics = BTreeMap::new();
        for (&socket_id, controller_ids) in mcs_per_socket {
            sockets.insert(
                socket_id,
                SocketMemoryRecords::new(socket_id, controller_ids.clone()),
            );
            if per_socket {
                sum_metrics.insert(AggregationKey::Socket(socket_id), MetricSums::default());
            } else {
                for &mc in controller_ids {
                    sum_metrics.insert(
                        AggregationKey::Controller(socket_id, mc),
                        MetricSums::default(),
                    );
                }
            }
        }

        NodeMemoryRecords {
            node_id,
            name,
            sockets,
            per_socket,
            cpu_freq_ghz,
            cache_line_bytes,
            last_written: HashMap::new(),
            sum_metrics,
        }
    }

    pub fn aggregation_key(&self, socket_id: u32, controller_id: Option<u32>) -> AggregationKey {
        match (self.per_socket, controller_id) {
            (true, _) | (false, None) => AggregationKey::Socket(socket_id),
            (false, Some(mc)) => AggregationKey::Controller(socket_id, mc),
        }
    }

    pub fn add_sample(
        &mut self,
        socket_id: u32,
        controller_id: u32,
        direction: Direction,
        record: MemoryRecord,
    ) {
        self.sockets
            .get_mut(&socket_id)
            .expect("socket id not present in node")
            .push(direction, controller_id, record);
    }

    /// 같은 방향의 직전 구간 끝 시각 (새 구간의 t0 로 사용)
    pub fn last_time(&self, socket_id: u32, controller_id: u32, direction: Direction) -> u64 {
        self.sockets[&socket_id].last_time(direction, controller_id)
    }

    pub fn are_all_sockets_empty(&self) -> bool {
        self.sockets.values().all(|s| s.are_all_queues_empty())
    }

    /// 노드에서 가장 작은 대기 시각을 찾고 그 지점이 처리 가능한지 판정한다.
    ///
    /// 소켓 모드에서는 해당 소켓의 모든 컨트롤러가, 컨트롤러 모드에서는 그
    /// 컨트롤러만 준비되면 된다. allow_empty 는 스트림 종료 시 잔여 데이터를
    /// 비우기 위한 완화 조건이다.
    pub fn is_processable(&self, allow_empty: bool) -> ProcessableData {
        let mut smallest_time = u64::MAX;
        let mut smallest_socket = u32::MAX;
        let mut smallest_mc = u32::MAX;
        for (&socket_id, socket) in &self.sockets {
            let (time, mc) = socket.smallest_time();
            if time < smallest_time {
                smallest_time = time;
                smallest_socket = socket_id;
                smallest_mc = mc;
            }
        }

        if smallest_time != u64::MAX {
            let socket = &self.sockets[&smallest_socket];
            if self.per_socket && (allow_empty || socket.is_socket_ready()) {
                return ProcessableData {
                    processable: true,
                    smallest_time,
                    socket_id: smallest_socket,
                    controller_id: None,
                };
            }
            if !self.per_socket && (allow_empty || socket.is_controller_ready(smallest_mc)) {
                return ProcessableData {
                    processable: true,
                    smallest_time,
                    socket_id: smallest_socket,
                    controller_id: Some(smallest_mc),
                };
            }
        }

        ProcessableData {
            processable: false,
            smallest_time,
            socket_id: u32::MAX,
            controller_id: None,
        }
    }

    /// 준비된 큐 데이터를 pop 하여 완전한 메트릭 벡터로 변환한다.
    ///
    /// 전제: is_processable 로 처리 가능함을 확인한 뒤 호출해야 한다.
    pub fn process_memory_metrics(
        &mut self,
        lookup: &dyn CurveLookup,
        socket_id: u32,
        controller_id: Option<u32>,
        allow_empty: bool,
    ) -> io::Result<MemoryMetrics> {
        let controllers_in_socket = self.sockets[&socket_id].controller_ids.len();
        let sample = self
            .sockets
            .get_mut(&socket_id)
            .expect("socket id not present in node")
            .process_bandwidths(controller_id, self.cache_line_bytes, allow_empty)?;

        let mut metrics = MemoryMetrics::unavailable();

        if sample.read_bw == -1.0 || sample.write_bw == -1.0 {
            // 워밍업 구간 등 계산 불가 -> 센티널 그대로 반환
            return Ok(metrics);
        }

        let total_bw = sample.read_bw + sample.write_bw;
        if total_bw == 0.0 {
            metrics.bandwidth = 0.0;
            return Ok(metrics);
        }

        let write_ratio = sample.write_bw / total_bw;
        let mut mean_reads = sample.mean_reads;
        let mut mean_writes = sample.mean_writes;

        let curve = lookup.compute_memory_metrics(
            self.cpu_freq_ghz,
            write_ratio,
            total_bw,
            !self.per_socket,
            controllers_in_socket,
        )?;

        let mut write_ratio_pct = write_ratio * 100.0;
        let mut bandwidth = total_bw;
        if curve.bandwidth != total_bw {
            // 곡선 서비스가 보정한 대역폭을 채택하고, 재계산 표시로
            // 진단용 값들의 부호를 뒤집는다
            write_ratio_pct = -write_ratio_pct;
            bandwidth = curve.bandwidth;
            mean_reads = -mean_reads;
            mean_writes = -mean_writes;
        }

        if curve.latency > curve.max_latency || curve.bandwidth > curve.max_bandwidth {
            // 모델 한계를 벗어난 지점은 한계값으로 고정하고 스트레스 최대로 표시
            log_warn!(
                "Latency above the modeled maximum on node {} socket {socket_id}: \
                 clamping to {:.2} ns and {:.2} GB/s",
                self.name,
                curve.max_latency,
                curve.max_bandwidth
            );
            metrics.write_ratio = write_ratio_pct;
            metrics.latency = curve.max_latency;
            metrics.bandwidth = curve.max_bandwidth;
            metrics.stress_score = 1.0;
            return Ok(metrics);
        }

        metrics.write_ratio = write_ratio_pct;
        metrics.bandwidth = bandwidth;
        metrics.max_bandwidth = curve.max_bandwidth;
        metrics.latency = curve.latency;
        metrics.lead_off_latency = curve.lead_off_latency;
        metrics.max_latency = curve.max_latency;
        metrics.stress_score = curve.stress_score;
        metrics.mean_reads = mean_reads;
        metrics.mean_writes = mean_writes;

        // 완전히 계산된 벡터만 평균 통계에 포함한다
        let key = self.aggregation_key(socket_id, controller_id);
        self.sum_metrics.entry(key).or_default().accumulate(&metrics);

        Ok(metrics)
    }

    pub fn last_written_metrics(
        &self,
        socket_id: u32,
        controller_id: Option<u32>,
    ) -> Option<MemoryMetrics> {
        self.last_written
            .get(&self.aggregation_key(socket_id, controller_id))
            .copied()
    }

    pub fn set_last_written_metrics(
        &mut self,
        socket_id: u32,
        controller_id: Option<u32>,
        metrics: MemoryMetrics,
    ) {
        let key = self.aggregation_key(socket_id, controller_id);
        self.last_written.insert(key, metrics);
    }

    pub fn sum_metrics(&self) -> &BTreeMap<AggregationKey, MetricSums> {
        &self.sum_metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curves::CurveMetrics;

    // 고정 값을 돌려주는 곡선 서비스 스텁
    pub struct StubLookup {
        pub metrics: CurveMetrics,
    }

    impl StubLookup {
        pub fn passthrough() -> Self {
            StubLookup {
                metrics: CurveMetrics {
                    max_bandwidth: 100.0,
                    latency: 80.0,
                    lead_off_latency: 50.0,
                    max_latency: 200.0,
                    stress_score: 0.25,
                    bandwidth: f64::NAN, // 호출 시 입력 대역폭으로 대체
                },
            }
        }
    }

    impl CurveLookup for StubLookup {
        fn compute_memory_metrics(
            &self,
            _cpu_freq_ghz: f64,
            _write_ratio: f64,
            bandwidth: f64,
            _group_controllers: bool,
            _controllers_in_socket: usize,
        ) -> io::Result<CurveMetrics> {
            let mut m = self.metrics;
            if m.bandwidth.is_nan() {
                m.bandwidth = bandwidth;
            }
            Ok(m)
        }
    }

    fn layout() -> BTreeMap<u32, Vec<u32>> {
        let mut mcs = BTreeMap::new();
        mcs.insert(0, vec![0, 1]);
        mcs.insert(1, vec![0, 1]);
        mcs
    }

    fn fill_controller(node: &mut NodeMemoryRecords, socket: u32, mc: u32, t1: u64) {
        node.add_sample(socket, mc, Direction::Read, MemoryRecord::new(0, t1, 4));
        node.add_sample(socket, mc, Direction::Write, MemoryRecord::new(0, t1, 1));
    }

    #[test]
    fn test_per_controller_readiness_is_independent() {
        let mut node = NodeMemoryRecords::new(0, "node0".into(), &layout(), false, 2.0, 64);
        assert!(!node.is_processable(false).processable);

        fill_controller(&mut node, 0, 1, 1_000);
        let p = node.is_processable(false);
        assert!(p.processable);
        assert_eq!(p.socket_id, 0);
        assert_eq!(p.controller_id, Some(1));
        assert_eq!(p.smallest_time, 1_000);
    }

    #[test]
    fn test_per_socket_requires_full_coverage() {
        let mut node = NodeMemoryRecords::new(0, "node0".into(), &layout(), true, 2.0, 64);
        fill_controller(&mut node, 0, 0, 1_000);
        // 소켓 0의 MC 1 이 아직 비어 있으므로 처리 불가
        assert!(!node.is_processable(false).processable);

        fill_controller(&mut node, 0, 1, 2_000);
        let p = node.is_processable(false);
        assert!(p.processable);
        assert_eq!(p.socket_id, 0);
        assert_eq!(p.controller_id, None);

        // 스트림 종료 시에는 완화 조건으로 처리 가능해야 한다
        let mut partial = NodeMemoryRecords::new(0, "node0".into(), &layout(), true, 2.0, 64);
        fill_controller(&mut partial, 1, 0, 500);
        assert!(!partial.is_processable(false).processable);
        assert!(partial.is_processable(true).processable);
    }

    #[test]
    fn test_metrics_computation_with_stub() {
        let mut node = NodeMemoryRecords::new(0, "node0".into(), &layout(), false, 2.0, 64);
        fill_controller(&mut node, 0, 0, 1_000_000_000);

        let lookup = StubLookup::passthrough();
        let metrics = node
            .process_memory_metrics(&lookup, 0, Some(0), false)
            .unwrap();

        // 읽기 4, 쓰기 1 -> 쓰기 비율 20%
        assert!((metrics.write_ratio - 20.0).abs() < 1e-9);
        assert!((metrics.bandwidth - 64.0 * 5.0 / 1e9).abs() < 1e-18);
        assert_eq!(metrics.latency, 80.0);
        assert_eq!(metrics.stress_score, 0.25);

        let sums = node.sum_metrics();
        let sums = &sums[&AggregationKey::Controller(0, 0)];
        assert_eq!(sums.n, 1);
        assert!((sums.write_ratio - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_reconciliation_sign_flip() {
        let mut node = NodeMemoryRecords::new(0, "node0".into(), &layout(), false, 2.0, 64);
        fill_controller(&mut node, 0, 0, 1_000_000_000);

        // 곡선 서비스가 다른 대역폭을 돌려주는 경우
        let mut lookup = StubLookup::passthrough();
        lookup.metrics.bandwidth = 42.0;
        let metrics = node
            .process_memory_metrics(&lookup, 0, Some(0), false)
            .unwrap();

        assert!(metrics.write_ratio < 0.0);
        assert_eq!(metrics.bandwidth, 42.0);
        assert!(metrics.mean_reads < 0.0);
        assert!(metrics.mean_writes < 0.0);
    }

    #[test]
    fn test_envelope_clamp() {
        let mut node = NodeMemoryRecords::new(0, "node0".into(), &layout(), false, 2.0, 64);
        fill_controller(&mut node, 0, 0, 1_000_000_000);

        let mut lookup = StubLookup::passthrough();
        lookup.metrics.latency = 500.0; // max_latency(200.0) 초과
        let metrics = node
            .process_memory_metrics(&lookup, 0, Some(0), false)
            .unwrap();

        assert_eq!(metrics.latency, 200.0);
        assert_eq!(metrics.bandwidth, 100.0);
        assert_eq!(metrics.stress_score, 1.0);
        // 한계 초과 구간은 평균 통계에 포함하지 않는다
        assert_eq!(node.sum_metrics()[&AggregationKey::Controller(0, 0)].n, 0);
    }

    #[test]
    fn test_aggregation_key_modes() {
        let node_mc = NodeMemoryRecords::new(0, "n".into(), &layout(), false, 2.0, 64);
        let node_skt = NodeMemoryRecords::new(0, "n".into(), &layout(), true, 2.0, 64);
        assert_eq!(
            node_mc.aggregation_key(1, Some(0)),
            AggregationKey::Controller(1, 0)
        );
        assert_eq!(node_skt.aggregation_key(1, None), AggregationKey::Socket(1));
    }
}
