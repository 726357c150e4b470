use crate::log;
use crate::processors::NodeMemoryRecords;

// 소수점 둘째 자리 반올림
fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// 실행 종료 시 노드별, 집계 키별 평균 메트릭을 출력한다
pub fn print_final_summary(nodes: &[NodeMemoryRecords], output_trace: &str) {
    log!("Processing complete!\n");

    for node in nodes {
        log!("======================");
        log!("      {}", node.name);
        log!("======================");
        for (key, sums) in node.sum_metrics() {
            if sums.n == 0 {
                log!("{key}: no complete metric intervals");
                log!("----------------------");
                continue;
            }
            let n = sums.n as f64;
            log!("{key}");
            log!("----------------------");
            log!("Average Write Ratio: {} %", round2(sums.write_ratio / n));
            log!("Average Bandwidth: {} GB/s", round2(sums.bandwidth / n));
            log!(
                "Average Max. Bandwidth: {} GB/s",
                round2(sums.max_bandwidth / n)
            );
            log!("Average Latency: {} ns", round2(sums.latency / n));
            log!(
                "Average Lead-off Latency: {} ns",
                round2(sums.lead_off_latency / n)
            );
            log!("Average Max. Latency: {} ns", round2(sums.max_latency / n));
            log!("Average Stress Score: {}\n", round2(sums.stress_score / n));
        }
    }

    log!("Output trace: {output_trace}");
}
