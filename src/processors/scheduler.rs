use crate::curves::CurveLookup;
use crate::models::{MemoryEvent, MemoryRecord};
use crate::output::writer::{write_metric_event, PendingOutputBuffer};
use crate::output::MetricCsvRow;
use crate::parsers::prv::{parse_record_line, ProcessModel, RecordKind, TraceHeader};
use crate::processors::NodeMemoryRecords;
use crate::utils::constants::{BASE_EVENT_TYPE, METRIC_PRECISION};
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

// 두 번째 애플리케이션(0 기준 1)이 메모리 카운터 전용 앱이다.
// 그 레코드는 집계에만 쓰이고 출력 트레이스로는 통과시키지 않는다.
const COUNTER_APP: usize = 1;

/// 스케줄러 동작 옵션. 집계 단위(소켓/컨트롤러)는 노드 집계기가 이미 알고
/// 있으므로 여기에는 출력 관련 토글만 둔다.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    pub keep_original: bool,
    pub export_csv: bool,
}

/// 한 번의 실행 결과 통계
#[derive(Debug, Default)]
pub struct RunStats {
    pub input_records: u64,
    pub passthrough_records: u64,
    pub metric_vectors: u64, // 중복 제거 후 실제 기록된 메트릭 묶음 수
    pub metric_events: u64,  // 기록된 개별 이벤트 레코드 수
    pub csv_rows: Vec<MetricCsvRow>,
}

/// 메모리 카운터 이벤트 맵에서 소켓별 컨트롤러 배치를 복원한다.
/// 읽기 이벤트만 보면 충분하다 (쓰기는 같은 소켓/컨트롤러 조합을 가진다).
pub fn controllers_per_socket(
    mem_event_types: &BTreeMap<u64, MemoryEvent>,
) -> BTreeMap<u32, Vec<u32>> {
    let mut mcs_per_socket: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for event in mem_event_types.values() {
        if event.is_read() {
            let mcs = mcs_per_socket.entry(event.socket).or_default();
            if !mcs.contains(&event.controller) {
                mcs.push(event.controller);
            }
        }
    }
    for mcs in mcs_per_socket.values_mut() {
        mcs.sort_unstable();
    }
    mcs_per_socket
}

/// 출력 프로세스 모델 구성: 앱 0 은 원본 첫 번째 앱을 그대로 복사하고,
/// 노드마다 합성 앱 하나(태스크 = 소켓, 스레드 = 소켓 또는 컨트롤러)를 더한다.
pub fn build_output_process_model(
    input: &ProcessModel,
    nodes: &[NodeMemoryRecords],
    per_socket: bool,
) -> ProcessModel {
    let mut out = ProcessModel::new();

    out.add_application();
    if let Some(tasks) = input.apps.first() {
        for (i_task, task) in tasks.iter().enumerate() {
            out.add_task(0);
            for _ in 0..task.n_threads {
                out.add_thread(0, i_task, task.node);
            }
        }
    }

    for node in nodes {
        let app = out.add_application();
        for (i_task, socket) in node.sockets.values().enumerate() {
            out.add_task(app);
            if per_socket {
                out.add_thread(app, i_task, node.node_id);
            } else {
                for _ in 0..socket.controller_ids.len() {
                    out.add_thread(app, i_task, node.node_id);
                }
            }
        }
    }

    out
}

/// 스트리밍 본체: 입력 트레이스를 한 줄씩 읽어 통과 레코드는 버퍼에 쌓고,
/// 메모리 카운터 이벤트는 집계기에 밀어 넣은 뒤, 준비된 집계가 있을 때마다
/// 시간 순서를 지키며 병합 출력한다.
///
/// 출력 스트림의 타임스탬프가 단조 증가한다는 불변식은 두 가지로 보장된다.
/// 메트릭은 항상 전 노드에서 가장 작은 준비 시각부터 기록되고, 기록 직전에
/// 그 시각 이하의 통과 레코드를 모두 내보낸다.
pub fn run_scheduler<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    header: &TraceHeader,
    output_process: &ProcessModel,
    mem_event_types: &BTreeMap<u64, MemoryEvent>,
    nodes: &mut [NodeMemoryRecords],
    lookup: &dyn CurveLookup,
    options: SchedulerOptions,
) -> io::Result<RunStats> {
    let mut stats = RunStats::default();
    let mut pending = PendingOutputBuffer::new();

    // 헤더와 커뮤니케이터 라인 기록
    writeln!(writer, "{}", header.to_string_with(output_process))?;
    for comm in &header.communicators {
        writeln!(writer, "{comm}")?;
    }

    let has_counter_app = header.process.apps.len() > COUNTER_APP;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let raw = line.trim_end_matches(['\n', '\r']);
        if raw.is_empty() {
            continue;
        }

        if raw.starts_with('#') {
            // 본문 메타데이터는 순서 제약이 없으므로 바로 통과
            if options.keep_original {
                writeln!(writer, "{raw}")?;
            }
            continue;
        }

        let Some(record) = parse_record_line(raw)? else {
            continue;
        };
        stats.input_records += 1;

        // 카운터 앱 레코드는 소비 대상, 나머지는 원문 그대로 보존
        if (!has_counter_app || record.app != COUNTER_APP) && options.keep_original {
            pending.push(record.time, raw.to_string());
            stats.passthrough_records += 1;
        }

        if record.kind != RecordKind::Event {
            continue;
        }

        for &(event_type, value) in &record.events {
            let Some(&mem_event) = mem_event_types.get(&event_type) else {
                continue;
            };

            let i_node = header.process.node_of(record.app, record.task)?;
            if i_node >= nodes.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "Counter record references node {i_node} but the trace declares {}",
                        nodes.len()
                    ),
                ));
            }
            if value < 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "Negative access count {value} for event type {event_type} at t={}",
                        record.time
                    ),
                ));
            }

            // 직전 같은 방향 구간의 끝이 새 구간의 시작이 된다
            let node = &mut nodes[i_node];
            let t0 = node.last_time(mem_event.socket, mem_event.controller, mem_event.direction);
            node.add_sample(
                mem_event.socket,
                mem_event.controller,
                mem_event.direction,
                MemoryRecord::new(t0, record.time, value as u64),
            );

            // 방금 건드린 노드뿐 아니라 어느 노드든 준비됐을 수 있으므로 전역 재검사
            while process_ready_metrics(
                nodes,
                lookup,
                false,
                &mut pending,
                output_process,
                writer,
                &mut stats,
                &options,
            )? {}
        }
    }

    // 스트림 종료: 완화 조건으로 잔여 큐 데이터를 모두 비운다
    while process_ready_metrics(
        nodes,
        lookup,
        true,
        &mut pending,
        output_process,
        writer,
        &mut stats,
        &options,
    )? {}

    // 남은 통과 레코드는 더 이상 끼워 넣을 메트릭이 없으므로 전부 출력
    pending.flush_all(writer)?;

    Ok(stats)
}

// 전 노드를 훑어 가장 작은 준비 시각을 가진 집계를 찾아 처리한다.
// 처리한 것이 있으면 true (호출측은 false 가 될 때까지 반복한다).
#[allow(clippy::too_many_arguments)]
fn process_ready_metrics<W: Write>(
    nodes: &mut [NodeMemoryRecords],
    lookup: &dyn CurveLookup,
    allow_empty: bool,
    pending: &mut PendingOutputBuffer,
    output_process: &ProcessModel,
    writer: &mut W,
    stats: &mut RunStats,
    options: &SchedulerOptions,
) -> io::Result<bool> {
    let mut smallest_time = u64::MAX;
    let mut target: Option<(usize, u32, Option<u32>)> = None;

    for (i_node, node) in nodes.iter().enumerate() {
        let p = node.is_processable(allow_empty);
        if p.smallest_time < smallest_time {
            smallest_time = p.smallest_time;
            target = if p.processable {
                Some((i_node, p.socket_id, p.controller_id))
            } else {
                None
            };
        }
    }

    let Some((i_node, socket_id, controller_id)) = target else {
        return Ok(false);
    };

    let node = &mut nodes[i_node];
    let last_written = node.last_written_metrics(socket_id, controller_id);
    let metrics = node.process_memory_metrics(lookup, socket_id, controller_id, allow_empty)?;

    // 메트릭 기록 전에 그 시각 이하의 통과 레코드를 먼저 내보내야
    // 전역 타임스탬프 순서가 유지된다
    pending.drain_until(smallest_time, writer)?;

    let socket = &node.sockets[&socket_id];
    let time = socket.last_popped_time();
    let app = node.node_id + 1;
    let task = node.sockets.keys().position(|&s| s == socket_id).unwrap();
    let thread = match controller_id {
        Some(mc) => socket.controller_index(mc),
        None => 0,
    };

    // prv 는 소수를 받지 않으므로 10^precision 배 정수로 기록한다.
    // 음수(센티널)는 이론상 불가능한 값이므로 0 으로 내린다.
    let pow10 = 10f64.powi(METRIC_PRECISION as i32);
    let current = metrics.as_array();
    let mut wrote_any = false;
    for (i_metric, &value) in current.iter().enumerate() {
        let changed = match last_written {
            None => true,
            Some(last) => last.as_array()[i_metric] != value,
        };
        if !changed {
            continue;
        }

        let int_value = if value >= 0.0 {
            (value * pow10).round() as i64
        } else {
            0
        };
        write_metric_event(
            writer,
            output_process,
            app,
            task,
            thread,
            time,
            BASE_EVENT_TYPE + 1 + i_metric as u64,
            int_value,
        )?;
        stats.metric_events += 1;
        wrote_any = true;
    }

    if wrote_any {
        stats.metric_vectors += 1;
        if options.export_csv {
            stats.csv_rows.push(MetricCsvRow::new(
                time,
                node.name.clone(),
                socket_id,
                controller_id,
                &metrics,
            ));
        }
    }

    node.set_last_written_metrics(socket_id, controller_id, metrics);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curves::CurveMetrics;
    use crate::models::Direction;
    use crate::parsers::prv::TraceHeader;
    use rand::prelude::*;
    use std::io::BufReader;

    // 고정 값을 돌려주는 곡선 서비스 스텁
    struct StubLookup;

    impl CurveLookup for StubLookup {
        fn compute_memory_metrics(
            &self,
            _cpu_freq_ghz: f64,
            _write_ratio: f64,
            bandwidth: f64,
            _group_controllers: bool,
            _controllers_in_socket: usize,
        ) -> io::Result<CurveMetrics> {
            Ok(CurveMetrics {
                max_bandwidth: 100.0,
                latency: 80.0,
                lead_off_latency: 50.0,
                max_latency: 200.0,
                stress_score: 0.5,
                bandwidth,
            })
        }
    }

    // 2노드 x 2소켓 x 1컨트롤러 구성의 이벤트 타입 맵
    fn two_node_event_map() -> BTreeMap<u64, MemoryEvent> {
        let mut map = BTreeMap::new();
        for socket in 0..2u32 {
            map.insert(
                1000 + socket as u64 * 2,
                MemoryEvent { socket, controller: 0, direction: Direction::Read },
            );
            map.insert(
                1001 + socket as u64 * 2,
                MemoryEvent { socket, controller: 0, direction: Direction::Write },
            );
        }
        map
    }

    fn make_nodes(per_socket: bool) -> Vec<NodeMemoryRecords> {
        let mcs = controllers_per_socket(&two_node_event_map());
        vec![
            NodeMemoryRecords::new(0, "nodeA".into(), &mcs, per_socket, 2.0, 64),
            NodeMemoryRecords::new(1, "nodeB".into(), &mcs, per_socket, 2.0, 64),
        ]
    }

    // 앱 0 = 일반 앱 (노드별 태스크 1개), 앱 1 = 카운터 앱 (노드별 태스크 1개)
    const TEST_HEADER: &str = "#Paraver (01/02/2024 at 09:30):10000000_ns:2(4,4):2:2(1:1,1:2):2(1:1,1:2)";

    fn parse_test_header() -> TraceHeader {
        let text = format!("{TEST_HEADER}\n");
        let mut reader = BufReader::new(text.as_bytes());
        TraceHeader::parse(&mut reader).unwrap()
    }

    fn options() -> SchedulerOptions {
        SchedulerOptions { keep_original: true, export_csv: true }
    }

    fn run_on(
        body: &str,
        per_socket: bool,
        opts: SchedulerOptions,
    ) -> (String, RunStats, Vec<NodeMemoryRecords>) {
        let header = parse_test_header();
        let mem_events = two_node_event_map();
        let mut nodes = make_nodes(per_socket);
        let output_process = build_output_process_model(&header.process, &nodes, per_socket);

        let mut reader = BufReader::new(body.as_bytes());
        let mut out = Vec::new();
        let stats = run_scheduler(
            &mut reader,
            &mut out,
            &header,
            &output_process,
            &mem_events,
            &mut nodes,
            &StubLookup,
            opts,
        )
        .unwrap();

        (String::from_utf8(out).unwrap(), stats, nodes)
    }

    fn output_times(output: &str) -> Vec<u64> {
        output
            .lines()
            .skip(1) // 헤더
            .filter(|l| !l.starts_with('#') && !l.starts_with('c'))
            .map(|l| l.split(':').nth(5).unwrap().parse::<u64>().unwrap())
            .collect()
    }

    // 카운터 이벤트 라인 생성 (앱 2 = 카운터 앱, 태스크 = 노드)
    fn counter_line(node: usize, event_type: u64, time: u64, value: u64) -> String {
        format!("2:1:2:{}:1:{time}:{event_type}:{value}", node + 1)
    }

    // 일반 앱 레코드 라인 생성
    fn app_line(node: usize, time: u64) -> String {
        format!("1:1:1:{}:1:{time}:{}:1", node + 1, time + 10)
    }

    #[test]
    fn test_end_to_end_two_nodes() {
        let mut body = String::new();
        // 노드 0: 읽기/쓰기 구간 두 개
        body.push_str(&app_line(0, 500));
        body.push_str("\n");
        body.push_str(&counter_line(0, 1000, 1_000_000, 400));
        body.push_str("\n");
        body.push_str(&counter_line(0, 1001, 1_000_000, 100));
        body.push_str("\n");
        // 노드 1: 다른 주기의 카운터
        body.push_str(&counter_line(1, 1000, 1_500_000, 50));
        body.push_str("\n");
        body.push_str(&counter_line(1, 1001, 1_500_000, 25));
        body.push_str("\n");
        body.push_str(&app_line(1, 2_000_000));
        body.push_str("\n");
        body.push_str(&counter_line(0, 1000, 3_000_000, 80));
        body.push_str("\n");
        body.push_str(&counter_line(0, 1001, 3_000_000, 20));
        body.push_str("\n");

        let (output, stats, _) = run_on(&body, false, options());

        // 모든 출력 타임스탬프가 단조 비감소
        let times = output_times(&output);
        let mut sorted = times.clone();
        sorted.sort_unstable();
        assert_eq!(times, sorted);

        // 통과 레코드 2개가 모두 보존된다
        assert_eq!(stats.passthrough_records, 2);
        assert!(output.contains(&app_line(0, 500)));
        assert!(output.contains(&app_line(1, 2_000_000)));

        // 합성 이벤트 수 = 중복 제거 후 기록된 메트릭 이벤트 수
        let synthetic = output
            .lines()
            .filter(|l| l.split(':').nth(6).map_or(false, |t| t.starts_with("9400000")))
            .count() as u64;
        assert_eq!(synthetic, stats.metric_events);
        assert_eq!(stats.metric_vectors as usize, stats.csv_rows.len());
        assert!(stats.metric_vectors >= 3);

        // 카운터 앱 레코드 원문은 출력에 남지 않는다
        assert!(!output.contains(":1000:400"));
    }

    #[test]
    fn test_metric_records_reference_synthetic_apps() {
        let body = format!(
            "{}\n{}\n",
            counter_line(0, 1000, 1_000_000, 400),
            counter_line(0, 1001, 1_000_000, 100)
        );
        let (output, _, _) = run_on(&body, false, options());

        for line in output.lines().skip(1) {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.first() == Some(&"2") && fields[6].starts_with("9400000") {
                // 앱 2 (노드 0 의 합성 앱), 소켓 태스크 1, 컨트롤러 스레드 1
                assert_eq!(fields[2], "2");
                assert_eq!(fields[3], "1");
                assert_eq!(fields[4], "1");
                assert_eq!(fields[5], "1000000");
            }
        }
    }

    #[test]
    fn test_dedup_suppresses_identical_vectors() {
        // 같은 속도의 카운터 구간 두 번 -> 두 번째는 모든 메트릭이 동일
        let body = format!(
            "{}\n{}\n{}\n{}\n",
            counter_line(0, 1000, 1_000_000, 400),
            counter_line(0, 1001, 1_000_000, 100),
            counter_line(0, 1000, 2_000_000, 400),
            counter_line(0, 1001, 2_000_000, 100)
        );
        let (_, stats, _) = run_on(&body, false, options());

        // 첫 묶음만 기록된다 (7개 이벤트), 두 번째는 완전 중복
        assert_eq!(stats.metric_vectors, 1);
        assert_eq!(stats.metric_events, 7);
    }

    #[test]
    fn test_keep_original_toggle() {
        let body = format!(
            "{}\n{}\n{}\n",
            app_line(0, 500),
            counter_line(0, 1000, 1_000_000, 400),
            counter_line(0, 1001, 1_000_000, 100)
        );
        let opts = SchedulerOptions { keep_original: false, export_csv: false };
        let (output, stats, _) = run_on(&body, false, opts);

        assert_eq!(stats.passthrough_records, 0);
        assert!(!output.contains(&app_line(0, 500)));
        // 메트릭 이벤트는 여전히 기록된다
        assert!(stats.metric_events > 0);
    }

    #[test]
    fn test_per_socket_mode_emits_one_thread_per_socket() {
        // 소켓 0, 1 에 컨트롤러가 하나씩이므로 소켓 모드에서도 즉시 처리 가능
        let body = format!(
            "{}\n{}\n",
            counter_line(0, 1000, 1_000_000, 400),
            counter_line(0, 1001, 1_000_000, 100)
        );
        let opts = SchedulerOptions { keep_original: true, export_csv: false };
        let (output, stats, _) = run_on(&body, true, opts);
        assert!(stats.metric_events > 0);

        // 소켓 모드의 스레드 필드는 항상 1 (태스크당 스레드 1개)
        for line in output.lines().skip(1) {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.first() == Some(&"2") && fields[6].starts_with("9400000") {
                assert_eq!(fields[4], "1");
            }
        }
    }

    #[test]
    fn test_negative_counter_value_is_fatal() {
        let header = parse_test_header();
        let mem_events = two_node_event_map();
        let mut nodes = make_nodes(false);
        let output_process = build_output_process_model(&header.process, &nodes, false);

        let body = "2:1:2:1:1:1000000:1000:-5\n";
        let mut reader = BufReader::new(body.as_bytes());
        let mut out = Vec::new();
        let result = run_scheduler(
            &mut reader,
            &mut out,
            &header,
            &output_process,
            &mem_events,
            &mut nodes,
            &StubLookup,
            options(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_ordering_property_random_interleavings() {
        // 여러 소켓/노드에 걸친 무작위 카운터 순서에서도
        // 출력 타임스탬프는 항상 단조 비감소여야 한다
        let mut rng = StdRng::seed_from_u64(20240201);

        for _ in 0..20 {
            // 노드별 카운터 스트림 생성: 방향마다 독립적인 증가 시각
            let mut lines: Vec<(u64, String)> = Vec::new();
            for node in 0..2usize {
                for socket in 0..2u64 {
                    for dir_offset in 0..2u64 {
                        let event_type = 1000 + socket * 2 + dir_offset;
                        let mut t = 0u64;
                        for _ in 0..rng.random_range(3..8) {
                            t += rng.random_range(100_000..1_000_000);
                            let n = rng.random_range(0..500);
                            lines.push((t, counter_line(node, event_type, t, n)));
                        }
                    }
                }
                // 일반 앱 레코드도 섞는다
                for _ in 0..5 {
                    let t = rng.random_range(1..4_000_000);
                    lines.push((t, app_line(node, t)));
                }
            }

            // 트레이스 본문은 시간순이어야 한다 (스레드별 단조 증가 전제)
            lines.sort_by_key(|(t, _)| *t);
            let body: String = lines
                .iter()
                .map(|(_, l)| format!("{l}\n"))
                .collect();

            let (output, _, _) = run_on(&body, false, options());
            let times = output_times(&output);
            let mut sorted = times.clone();
            sorted.sort_unstable();
            assert_eq!(times, sorted, "unsorted output for body:\n{body}");
        }
    }

    #[test]
    fn test_final_flush_drains_everything() {
        // 쓰기 카운터가 없는 읽기 전용 스트림: 본문 처리 중에는 준비되지
        // 않지만 종료 시 완화 조건으로 모두 비워져야 한다
        let body = format!(
            "{}\n{}\n{}\n",
            counter_line(0, 1000, 1_000_000, 10),
            counter_line(0, 1000, 2_000_000, 20),
            app_line(0, 3_000_000)
        );
        let (output, stats, nodes) = run_on(&body, false, options());

        assert!(nodes.iter().all(|n| n.are_all_sockets_empty()));
        assert!(stats.metric_events > 0);
        assert!(output.contains(&app_line(0, 3_000_000)));
    }
}
