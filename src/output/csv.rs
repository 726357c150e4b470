use crate::models::MemoryMetrics;
use serde::Serialize;
use std::io;
use std::path::Path;

/// --csv 옵션으로 내보내는 메트릭 행 하나
#[derive(Serialize, Debug, Clone)]
pub struct MetricCsvRow {
    pub timestamp: u64,
    pub node_name: String,
    pub socket: u32,
    // 소켓 단위 집계에서는 비워 둔다
    pub mc: Option<u32>,
    pub write_ratio: f64,
    pub bandwidth: f64,
    pub max_bandwidth: f64,
    pub latency: f64,
    pub lead_off_latency: f64,
    pub max_latency: f64,
    pub stress_score: f64,
}

impl MetricCsvRow {
    pub fn new(
        timestamp: u64,
        node_name: String,
        socket: u32,
        mc: Option<u32>,
        metrics: &MemoryMetrics,
    ) -> Self {
        MetricCsvRow {
            timestamp,
            node_name,
            socket,
            mc,
            write_ratio: metrics.write_ratio,
            bandwidth: metrics.bandwidth,
            max_bandwidth: metrics.max_bandwidth,
            latency: metrics.latency,
            lead_off_latency: metrics.lead_off_latency,
            max_latency: metrics.max_latency,
            stress_score: metrics.stress_score,
        }
    }
}

/// 계산된 메트릭 전체를 CSV 파일로 저장한다.
/// 대시보드 같은 외부 도구로 데이터를 넘길 때 사용한다.
pub fn save_metrics_to_csv(path: &Path, rows: &[MetricCsvRow]) -> io::Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| {
        io::Error::new(
            io::ErrorKind::Other,
            format!("Cannot create CSV file '{}': {e}", path.display()),
        )
    })?;

    for row in rows {
        writer.serialize(row).map_err(|e| {
            io::Error::new(io::ErrorKind::Other, format!("CSV write error: {e}"))
        })?;
    }

    writer
        .flush()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("CSV flush error: {e}")))
}
